//! Project configuration and startup secrets.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{network::explorer_key_vars, task::DeploymentTask};

/// The default name of the project configuration file.
pub const CONFIG_FILENAME: &str = "mintbake.toml";

/// Prefix of environment variables overriding the project configuration.
pub const ENV_PREFIX: &str = "MINTBAKE_";

/// Variable pointing at an alternative `.env` file.
pub const DOTENV_PATH_VAR: &str = "DOTENV_CONFIG_PATH";

/// Default time to wait for a deployment to reach its confirmation depth.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 600;

/// Filesystem layout of the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the compiler's artifact output.
    pub artifacts: PathBuf,
    /// Root of the persisted deployment records.
    pub deployments: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts: PathBuf::from("artifacts"),
            deployments: PathBuf::from("deployments"),
        }
    }
}

/// Per-network settings that override the chain table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
}

/// Contents of `mintbake.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Seconds to wait for confirmations before reporting a timeout.
    pub confirmation_timeout_secs: u64,
    pub paths: PathsConfig,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, NetworkOverride>,
    /// The deploy declarations, in declaration order.
    pub tasks: Vec<DeploymentTask>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            paths: PathsConfig::default(),
            networks: BTreeMap::new(),
            tasks: Vec::new(),
        }
    }
}

impl ProjectConfig {
    /// Load the configuration from a TOML file, layered over the defaults and
    /// under `MINTBAKE_`-prefixed environment variables.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }

        let mut config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(root) = path.parent() {
            config.paths.artifacts = root.join(&config.paths.artifacts);
            config.paths.deployments = root.join(&config.paths.deployments);
        }

        tracing::info!(
            path = %path.display(),
            tasks = config.tasks.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// RPC URL overrides keyed by network name.
    pub fn rpc_overrides(&self) -> BTreeMap<String, Url> {
        self.networks
            .iter()
            .filter_map(|(name, network)| network.rpc_url.clone().map(|url| (name.clone(), url)))
            .collect()
    }
}

/// Signer material and API credentials, read once at startup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub mnemonic: Option<String>,
    pub private_key: Option<String>,
    pub infura_api_key: Option<String>,
    /// Explorer API keys keyed by environment variable name.
    pub explorer_api_keys: BTreeMap<String, String>,
}

impl Secrets {
    /// Read secrets from the process environment, after loading the `.env`
    /// file named by `DOTENV_CONFIG_PATH` (or `./.env`) if it exists.
    ///
    /// Empty values count as unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let dotenv_path =
            std::env::var(DOTENV_PATH_VAR).unwrap_or_else(|_| ".env".to_string());
        match dotenvy::from_path(&dotenv_path) {
            Ok(()) => tracing::debug!(path = %dotenv_path, "Loaded environment file"),
            Err(err) if err.not_found() => {
                tracing::debug!(path = %dotenv_path, "No environment file found")
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to load environment file {dotenv_path}"));
            }
        }

        let explorer_api_keys = explorer_key_vars()
            .filter_map(|var| read_var(var).map(|value| (var.to_string(), value)))
            .collect();

        Ok(Self {
            mnemonic: read_var("MNEMONIC"),
            private_key: read_var("PRIVATE_KEY"),
            infura_api_key: read_var("INFURA_API_KEY"),
            explorer_api_keys,
        })
    }

    pub fn explorer_api_key(&self, var: &str) -> Option<String> {
        self.explorer_api_keys.get(var).cloned()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("Secrets")
            .field("mnemonic", &redact(&self.mnemonic))
            .field("private_key", &redact(&self.private_key))
            .field("infura_api_key", &redact(&self.infura_api_key))
            .field(
                "explorer_api_keys",
                &self.explorer_api_keys.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
