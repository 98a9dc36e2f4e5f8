//! Deployment task declarations.

use std::{collections::BTreeSet, fmt};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::accounts::NamedAccounts;

/// Tag carried by every task.
pub const ALL_TAG: &str = "all";

/// Prefix marking a constructor argument as a named-account reference.
pub const ACCOUNT_REF_PREFIX: char = '@';

/// A single constructor argument as authored in a deploy declaration.
///
/// Values are coerced to the constructor's ABI types at encoding time, so
/// `"1000000000000000000000"` is a valid `uint256` and `"0xabc…"` a valid
/// `address`. A string starting with `@` names an account (`@deployer`) and is
/// replaced by its address before the task runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Uint(u64),
    Int(i64),
    Text(String),
}

impl ArgValue {
    /// Replace a named-account reference with the account's address.
    pub fn resolve(&self, accounts: &NamedAccounts) -> anyhow::Result<Self> {
        match self {
            Self::Text(text) => match text.strip_prefix(ACCOUNT_REF_PREFIX) {
                Some(name) => {
                    let address = accounts
                        .by_name(name)
                        .with_context(|| format!("Unknown named account `{name}`"))?;
                    Ok(Self::Text(address.to_checksum(None)))
                }
                None => Ok(self.clone()),
            },
            other => Ok(other.clone()),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Uint(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for ArgValue {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// The shape of a task as written in `mintbake.toml`.
#[derive(Debug, Clone, Deserialize)]
struct TaskDeclaration {
    contract: String,
    #[serde(default)]
    args: Vec<ArgValue>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    depends_on: BTreeSet<String>,
}

impl From<TaskDeclaration> for DeploymentTask {
    fn from(decl: TaskDeclaration) -> Self {
        let mut task = Self::new(decl.contract).args(decl.args);
        task.tags.extend(decl.tags);
        task.depends_on_tags.extend(decl.depends_on);
        task
    }
}

/// One deployable contract: what to deploy, with which arguments, and after what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TaskDeclaration")]
pub struct DeploymentTask {
    #[serde(rename = "contract")]
    pub contract_name: String,
    #[serde(rename = "args")]
    pub constructor_args: Vec<ArgValue>,
    /// Identity tags. Always contains [`ALL_TAG`] and the contract name.
    pub tags: BTreeSet<String>,
    /// Tags that must have run before this task.
    #[serde(rename = "depends_on")]
    pub depends_on_tags: BTreeSet<String>,
}

impl DeploymentTask {
    /// Declare a task for `contract_name` with no arguments and no dependencies.
    pub fn new(contract_name: impl Into<String>) -> Self {
        let contract_name = contract_name.into();
        let tags = BTreeSet::from([ALL_TAG.to_string(), contract_name.clone()]);
        Self {
            contract_name,
            constructor_args: Vec::new(),
            tags,
            depends_on_tags: BTreeSet::new(),
        }
    }

    /// Set the constructor arguments.
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ArgValue>,
    {
        self.constructor_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one constructor argument.
    pub fn arg(mut self, arg: impl Into<ArgValue>) -> Self {
        self.constructor_args.push(arg.into());
        self
    }

    /// Add an identity tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Require every task carrying `tag` to run first.
    pub fn depends_on(mut self, tag: impl Into<String>) -> Self {
        self.depends_on_tags.insert(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Constructor arguments with named-account references replaced.
    pub fn resolved_args(&self, accounts: &NamedAccounts) -> anyhow::Result<Vec<ArgValue>> {
        self.constructor_args
            .iter()
            .map(|arg| arg.resolve(accounts))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("Failed to resolve arguments of `{}`", self.contract_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_carries_default_tags() {
        let task = DeploymentTask::new("Greeter");
        assert!(task.has_tag(ALL_TAG));
        assert!(task.has_tag("Greeter"));
        assert!(task.depends_on_tags.is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let task = DeploymentTask::new("DropAlbum")
            .args(["TestDropAlbum", "TDA", "@deployer"])
            .arg(500u64)
            .tag("nft")
            .depends_on("base");

        assert_eq!(
            task.constructor_args,
            vec![
                ArgValue::from("TestDropAlbum"),
                ArgValue::from("TDA"),
                ArgValue::from("@deployer"),
                ArgValue::Uint(500),
            ]
        );
        assert!(task.has_tag("nft"));
        assert!(task.depends_on_tags.contains("base"));
    }

    #[test]
    fn test_deserialize_declaration_adds_default_tags() {
        let task: DeploymentTask = toml::from_str(
            r#"
            contract = "DropAlbum"
            args = ["TestDropAlbum", "TDA", "@deployer", 500, true]
            depends_on = ["base"]
            "#,
        )
        .expect("Failed to parse task declaration");

        assert_eq!(task.contract_name, "DropAlbum");
        assert!(task.has_tag(ALL_TAG));
        assert!(task.has_tag("DropAlbum"));
        assert_eq!(task.constructor_args[3], ArgValue::Uint(500));
        assert_eq!(task.constructor_args[4], ArgValue::Bool(true));
        assert!(task.depends_on_tags.contains("base"));
    }

    #[test]
    fn test_resolve_named_account() {
        let accounts = NamedAccounts::from_mnemonic(
            crate::DEFAULT_MNEMONIC,
            crate::DEFAULT_DERIVATION_PATH,
            2,
        )
        .expect("Failed to derive accounts");

        let resolved = ArgValue::from("@deployer")
            .resolve(&accounts)
            .expect("Failed to resolve deployer");
        assert_eq!(
            resolved,
            ArgValue::Text(accounts.deployer().to_checksum(None))
        );

        assert!(ArgValue::from("@nobody").resolve(&accounts).is_err());
        assert_eq!(
            ArgValue::from("plain").resolve(&accounts).expect("plain text"),
            ArgValue::from("plain")
        );
    }
}
