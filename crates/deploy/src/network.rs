//! Network resolution: logical network name to connection parameters.
//!
//! Everything downstream that behaves differently on local and live networks
//! asks the resolved [`NetworkProfile`] instead of re-deriving "is this live".

use std::{collections::BTreeMap, fmt};

use anyhow::Context;
use url::Url;

use crate::{config::Secrets, error::DeployError};

/// Confirmations awaited on live networks before a deployment is recorded.
pub const VERIFICATION_BLOCK_CONFIRMATIONS: u64 = 6;

/// Default BIP-44 prefix; accounts are derived at `<path>/<index>`.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0";

/// Number of accounts derived from a mnemonic.
pub const DEFAULT_ACCOUNT_COUNT: u32 = 10;

/// Development mnemonic used when none is configured.
pub const DEFAULT_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// RPC endpoint of a locally running development node.
pub const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";

/// The two ephemeral network identifiers. Every other network is live.
pub const LOCAL_NETWORKS: [&str; 2] = ["hardhat", "localhost"];

/// How the RPC URL of a chain is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcRule {
    /// A local development node.
    Local,
    /// A fixed public endpoint.
    Fixed(&'static str),
    /// `https://<subdomain>.infura.io/v3/<INFURA_API_KEY>`.
    Infura(&'static str),
}

/// Block explorer verification endpoint of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorerEntry {
    pub api_url: &'static str,
    /// Environment variable holding the explorer API key.
    pub api_key_env: &'static str,
}

/// One row of the static chain table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub name: &'static str,
    pub chain_id: u64,
    pub rpc: RpcRule,
    pub explorer: Option<ExplorerEntry>,
}

const fn live(
    name: &'static str,
    chain_id: u64,
    rpc: RpcRule,
    api_url: &'static str,
    api_key_env: &'static str,
) -> ChainEntry {
    ChainEntry {
        name,
        chain_id,
        rpc,
        explorer: Some(ExplorerEntry {
            api_url,
            api_key_env,
        }),
    }
}

/// Networks known to the resolver.
pub const CHAIN_TABLE: &[ChainEntry] = &[
    ChainEntry {
        name: "hardhat",
        chain_id: 31337,
        rpc: RpcRule::Local,
        explorer: None,
    },
    ChainEntry {
        name: "localhost",
        chain_id: 1337,
        rpc: RpcRule::Local,
        explorer: None,
    },
    live(
        "arbitrum",
        42161,
        RpcRule::Infura("arbitrum-mainnet"),
        "https://api.arbiscan.io/api",
        "ARBISCAN_API_KEY",
    ),
    live(
        "avalanche",
        43114,
        RpcRule::Fixed("https://api.avax.network/ext/bc/C/rpc"),
        "https://api.snowtrace.io/api",
        "SNOWTRACE_API_KEY",
    ),
    live(
        "bsc",
        56,
        RpcRule::Fixed("https://bsc-dataseed1.binance.org"),
        "https://api.bscscan.com/api",
        "BSCSCAN_API_KEY",
    ),
    live(
        "mainnet",
        1,
        RpcRule::Infura("mainnet"),
        "https://api.etherscan.io/api",
        "ETHERSCAN_API_KEY",
    ),
    live(
        "optimism",
        10,
        RpcRule::Infura("optimism-mainnet"),
        "https://api-optimistic.etherscan.io/api",
        "OPTIMISM_API_KEY",
    ),
    live(
        "polygon-mainnet",
        137,
        RpcRule::Infura("polygon-mainnet"),
        "https://api.polygonscan.com/api",
        "POLYGONSCAN_API_KEY",
    ),
    live(
        "polygon-mumbai",
        80001,
        RpcRule::Infura("polygon-mumbai"),
        "https://api-testnet.polygonscan.com/api",
        "POLYGONSCAN_API_KEY",
    ),
    live(
        "goerli",
        5,
        RpcRule::Infura("goerli"),
        "https://api-goerli.etherscan.io/api",
        "ETHERSCAN_API_KEY",
    ),
    live(
        "fantom-opera",
        250,
        RpcRule::Fixed("https://rpc.ankr.com/fantom"),
        "https://api.ftmscan.com/api",
        "FTMSCAN_API_KEY",
    ),
    live(
        "fantom-testnet",
        4002,
        RpcRule::Fixed("https://rpc.testnet.fantom.network"),
        "https://api-testnet.ftmscan.com/api",
        "FTMSCAN_API_KEY",
    ),
    live(
        "aurora-mainnet",
        1313161554,
        RpcRule::Infura("aurora-mainnet"),
        "https://explorer.mainnet.aurora.dev/api",
        "AURORASCAN_API_KEY",
    ),
    live(
        "aurora-testnet",
        1313161555,
        RpcRule::Infura("aurora-testnet"),
        "https://explorer.testnet.aurora.dev/api",
        "AURORASCAN_API_KEY",
    ),
];

/// Every explorer API key variable referenced by the chain table.
pub fn explorer_key_vars() -> impl Iterator<Item = &'static str> {
    let mut vars: Vec<_> = CHAIN_TABLE
        .iter()
        .filter_map(|entry| entry.explorer.map(|explorer| explorer.api_key_env))
        .collect();
    vars.sort_unstable();
    vars.dedup();
    vars.into_iter()
}

/// Where the signing accounts of a run come from.
#[derive(Clone, PartialEq, Eq)]
pub enum AccountStrategy {
    /// Single-signer mode.
    ExplicitPrivateKey { key: String },
    /// Derive `count` accounts at `<path>/<index>`.
    MnemonicDerivation {
        phrase: String,
        count: u32,
        path: String,
    },
}

impl fmt::Debug for AccountStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitPrivateKey { .. } => f
                .debug_struct("ExplicitPrivateKey")
                .field("key", &"<redacted>")
                .finish(),
            Self::MnemonicDerivation { count, path, .. } => f
                .debug_struct("MnemonicDerivation")
                .field("phrase", &"<redacted>")
                .field("count", count)
                .field("path", path)
                .finish(),
        }
    }
}

/// Explorer endpoint and credential for a live network.
#[derive(Clone, PartialEq, Eq)]
pub struct ExplorerConfig {
    pub api_url: Url,
    pub api_key: Option<String>,
    pub api_key_env: &'static str,
}

impl fmt::Debug for ExplorerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerConfig")
            .field("api_url", &self.api_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

/// Connection parameters of one network, immutable for the duration of a run.
///
/// `rpc_url` may embed an API key in its path; log [`Self::redacted_rpc_url`].
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: Url,
    pub is_live: bool,
    pub account_strategy: AccountStrategy,
    pub explorer: Option<ExplorerConfig>,
}

impl fmt::Debug for NetworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkProfile")
            .field("name", &self.name)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.redacted_rpc_url())
            .field("is_live", &self.is_live)
            .field("account_strategy", &self.account_strategy)
            .field("explorer", &self.explorer)
            .finish()
    }
}

impl NetworkProfile {
    /// The RPC endpoint without credentials, path or query: scheme, host and
    /// port only.
    pub fn redacted_rpc_url(&self) -> String {
        let url = &self.rpc_url;
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        }
    }

    /// Block depth to wait for after a deployment transaction is mined.
    ///
    /// Local networks auto-mine, so nothing beyond the receipt is awaited.
    pub fn confirmation_depth(&self) -> u64 {
        if self.is_live {
            VERIFICATION_BLOCK_CONFIRMATIONS
        } else {
            0
        }
    }

    /// Whether newly recorded deployments are submitted for source verification.
    pub fn verification_enabled(&self) -> bool {
        self.is_live
    }
}

/// Resolves network names against [`CHAIN_TABLE`].
///
/// Holds the startup configuration (secrets and RPC overrides); it never
/// reads the environment itself.
#[derive(Debug, Clone)]
pub struct NetworkResolver {
    secrets: Secrets,
    rpc_overrides: BTreeMap<String, Url>,
}

impl NetworkResolver {
    pub fn new(secrets: Secrets) -> Self {
        Self {
            secrets,
            rpc_overrides: BTreeMap::new(),
        }
    }

    /// Replace the table's RPC rule for `network`.
    pub fn rpc_override(mut self, network: impl Into<String>, url: Url) -> Self {
        self.rpc_overrides.insert(network.into(), url);
        self
    }

    pub fn rpc_overrides(mut self, overrides: BTreeMap<String, Url>) -> Self {
        self.rpc_overrides.extend(overrides);
        self
    }

    /// The chain table rows, in declaration order.
    pub fn networks(&self) -> impl Iterator<Item = &'static ChainEntry> {
        CHAIN_TABLE.iter()
    }

    /// Resolve a logical network name into a [`NetworkProfile`].
    pub fn resolve(&self, name: &str) -> anyhow::Result<NetworkProfile> {
        let entry = CHAIN_TABLE
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| DeployError::UnknownNetwork {
                name: name.to_string(),
            })?;

        let rpc_url = match self.rpc_overrides.get(name) {
            Some(url) => url.clone(),
            None => self.rpc_url(entry)?,
        };

        let explorer = entry
            .explorer
            .map(|explorer| -> anyhow::Result<ExplorerConfig> {
                Ok(ExplorerConfig {
                    api_url: Url::parse(explorer.api_url)
                        .context("Failed to parse explorer API URL")?,
                    api_key: self.secrets.explorer_api_key(explorer.api_key_env),
                    api_key_env: explorer.api_key_env,
                })
            })
            .transpose()?;

        Ok(NetworkProfile {
            name: entry.name.to_string(),
            chain_id: entry.chain_id,
            rpc_url,
            is_live: !LOCAL_NETWORKS.contains(&entry.name),
            account_strategy: self.account_strategy(),
            explorer,
        })
    }

    fn rpc_url(&self, entry: &ChainEntry) -> anyhow::Result<Url> {
        let url = match entry.rpc {
            RpcRule::Local => LOCAL_RPC_URL.to_string(),
            RpcRule::Fixed(url) => url.to_string(),
            RpcRule::Infura(subdomain) => format!(
                "https://{}.infura.io/v3/{}",
                subdomain,
                self.secrets.infura_api_key.as_deref().unwrap_or_default()
            ),
        };
        Url::parse(&url).with_context(|| format!("Failed to parse RPC URL of `{}`", entry.name))
    }

    /// An explicit private key wins; otherwise accounts come from the mnemonic.
    fn account_strategy(&self) -> AccountStrategy {
        match &self.secrets.private_key {
            Some(key) => AccountStrategy::ExplicitPrivateKey { key: key.clone() },
            None => AccountStrategy::MnemonicDerivation {
                phrase: self
                    .secrets
                    .mnemonic
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MNEMONIC.to_string()),
                count: DEFAULT_ACCOUNT_COUNT,
                path: DEFAULT_DERIVATION_PATH.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> Secrets {
        Secrets {
            infura_api_key: Some("infura-key".to_string()),
            explorer_api_keys: BTreeMap::from([(
                "ETHERSCAN_API_KEY".to_string(),
                "etherscan-key".to_string(),
            )]),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_local_networks() {
        let resolver = NetworkResolver::new(Secrets::default());

        let hardhat = resolver.resolve("hardhat").expect("hardhat resolves");
        assert_eq!(hardhat.chain_id, 31337);
        assert!(!hardhat.is_live);
        assert_eq!(hardhat.confirmation_depth(), 0);
        assert!(!hardhat.verification_enabled());
        assert!(hardhat.explorer.is_none());
        assert_eq!(hardhat.rpc_url.as_str(), "http://127.0.0.1:8545/");

        let localhost = resolver.resolve("localhost").expect("localhost resolves");
        assert_eq!(localhost.chain_id, 1337);
        assert!(!localhost.is_live);
    }

    #[test]
    fn test_resolve_live_network() {
        let profile = NetworkResolver::new(secrets())
            .resolve("mainnet")
            .expect("mainnet resolves");

        assert!(profile.is_live);
        assert_eq!(profile.chain_id, 1);
        assert_eq!(profile.confirmation_depth(), VERIFICATION_BLOCK_CONFIRMATIONS);
        assert!(profile.verification_enabled());
        assert_eq!(
            profile.rpc_url.as_str(),
            "https://mainnet.infura.io/v3/infura-key"
        );

        let explorer = profile.explorer.expect("mainnet has an explorer");
        assert_eq!(explorer.api_key.as_deref(), Some("etherscan-key"));
        assert_eq!(explorer.api_key_env, "ETHERSCAN_API_KEY");
    }

    #[test]
    fn test_infura_key_never_shown() {
        let secrets = Secrets {
            infura_api_key: Some("SECRETKEY123".to_string()),
            ..Default::default()
        };
        let profile = NetworkResolver::new(secrets)
            .resolve("mainnet")
            .expect("mainnet resolves");

        assert!(profile.rpc_url.as_str().contains("SECRETKEY123"));
        assert_eq!(profile.redacted_rpc_url(), "https://mainnet.infura.io");
        assert!(!format!("{profile:?}").contains("SECRETKEY123"));

        let local = NetworkResolver::new(Secrets::default())
            .resolve("hardhat")
            .expect("hardhat resolves");
        assert_eq!(local.redacted_rpc_url(), "http://127.0.0.1:8545");
    }

    #[test]
    fn test_fixed_rpc_and_missing_explorer_key() {
        let profile = NetworkResolver::new(secrets())
            .resolve("bsc")
            .expect("bsc resolves");

        assert_eq!(profile.rpc_url.as_str(), "https://bsc-dataseed1.binance.org/");
        assert_eq!(profile.explorer.and_then(|e| e.api_key), None);
    }

    #[test]
    fn test_unknown_network() {
        let err = NetworkResolver::new(Secrets::default())
            .resolve("atlantis")
            .expect_err("atlantis is not a network");

        assert_eq!(
            err.downcast_ref::<DeployError>(),
            Some(&DeployError::UnknownNetwork {
                name: "atlantis".to_string()
            })
        );
    }

    #[test]
    fn test_account_strategy_selection() {
        let resolver = NetworkResolver::new(Secrets::default());
        let profile = resolver.resolve("goerli").expect("goerli resolves");
        assert_eq!(
            profile.account_strategy,
            AccountStrategy::MnemonicDerivation {
                phrase: DEFAULT_MNEMONIC.to_string(),
                count: DEFAULT_ACCOUNT_COUNT,
                path: DEFAULT_DERIVATION_PATH.to_string(),
            }
        );

        let resolver = NetworkResolver::new(Secrets {
            private_key: Some("0x01".to_string()),
            mnemonic: Some("ignored words".to_string()),
            ..Default::default()
        });
        let profile = resolver.resolve("goerli").expect("goerli resolves");
        assert_eq!(
            profile.account_strategy,
            AccountStrategy::ExplicitPrivateKey {
                key: "0x01".to_string()
            }
        );
        assert!(!format!("{:?}", profile.account_strategy).contains("0x01"));
    }

    #[test]
    fn test_rpc_override() {
        let url = Url::parse("http://10.0.0.2:8545").unwrap();
        let profile = NetworkResolver::new(Secrets::default())
            .rpc_override("localhost", url.clone())
            .resolve("localhost")
            .expect("localhost resolves");
        assert_eq!(profile.rpc_url, url);
    }

    #[test]
    fn test_explorer_key_vars_are_unique() {
        let vars: Vec<_> = explorer_key_vars().collect();
        assert!(vars.contains(&"ETHERSCAN_API_KEY"));
        assert_eq!(
            vars.iter().filter(|v| **v == "POLYGONSCAN_API_KEY").count(),
            1
        );
    }
}
