//! Builder module for creating a [`Deployer`].
//!
//! This module provides the [`DeployerBuilder`] struct which turns the project
//! configuration, the startup secrets and a network name into a [`Deployer`]:
//! it resolves the network profile, derives the named accounts, opens the
//! deployment store and wires the RPC client, artifacts and verifier.

use anyhow::{Context, Result};

use crate::{
    Deployer,
    accounts::NamedAccounts,
    artifact::HardhatArtifacts,
    chain::RpcChainClient,
    config::{ProjectConfig, Secrets},
    network::{NetworkProfile, NetworkResolver},
    pipeline::Pipeline,
    store::DeploymentStore,
    verify::EtherscanVerifier,
};

/// Builder for creating a [`Deployer`].
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use mintbake_deploy::{DeployerBuilder, ProjectConfig, Secrets};
///
/// # async fn example() -> anyhow::Result<()> {
/// let deployer = DeployerBuilder::new("localhost")
///     .config(ProjectConfig::load_from_file(Path::new("mintbake.toml"))?)
///     .secrets(Secrets::from_env()?)
///     .build()?;
/// let report = deployer.deploy("all").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeployerBuilder {
    /// The logical network name (required).
    network: String,
    /// The project configuration.
    config: ProjectConfig,
    /// Signer material and API keys.
    secrets: Secrets,
}

impl DeployerBuilder {
    /// Create a new [`DeployerBuilder`] targeting `network`.
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            config: ProjectConfig::default(),
            secrets: Secrets::default(),
        }
    }

    /// Set the project configuration.
    pub fn config(mut self, config: ProjectConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the secrets.
    ///
    /// If not set, the default development mnemonic is used and no explorer
    /// keys are available.
    pub fn secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    /// Resolve the network profile without opening anything.
    pub fn profile(&self) -> Result<NetworkProfile> {
        NetworkResolver::new(self.secrets.clone())
            .rpc_overrides(self.config.rpc_overrides())
            .resolve(&self.network)
    }

    /// Build the [`Deployer`].
    ///
    /// Fails if the network is unknown, the accounts cannot be derived, or
    /// the network's deployment store is locked or belongs to another chain.
    pub fn build(self) -> Result<Deployer> {
        let profile = self.profile()?;
        let accounts = NamedAccounts::derive(&profile.account_strategy)
            .with_context(|| format!("Failed to derive accounts for `{}`", profile.name))?;

        let store = DeploymentStore::open(
            &self.config.paths.deployments,
            &profile.name,
            profile.chain_id,
        )?;

        let chain = RpcChainClient::new(profile.rpc_url.clone())?;
        let artifacts = HardhatArtifacts::new(self.config.paths.artifacts.clone());
        let verifier = EtherscanVerifier::new(artifacts.clone())?;

        tracing::info!(
            network = %profile.name,
            chain_id = profile.chain_id,
            live = profile.is_live,
            deployer = %accounts.deployer(),
            artifacts = %artifacts.root().display(),
            "Building deployer..."
        );

        let pipeline = Pipeline::new(profile, accounts, chain, artifacts, verifier)
            .confirmation_timeout(self.config.confirmation_timeout());

        Ok(Deployer {
            pipeline,
            store,
            tasks: self.config.tasks,
        })
    }
}
