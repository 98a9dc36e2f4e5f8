use anyhow::Result;

use crate::{
    artifact::HardhatArtifacts,
    chain::RpcChainClient,
    pipeline::{Pipeline, PlannedTask, RunReport},
    store::DeploymentStore,
    task::DeploymentTask,
    verify::EtherscanVerifier,
};

/// The pipeline wired to a JSON-RPC node, hardhat artifacts and an
/// Etherscan-compatible explorer.
pub type StandardPipeline =
    Pipeline<RpcChainClient, HardhatArtifacts, EtherscanVerifier<HardhatArtifacts>>;

/// A project bound to one network, ready to deploy.
///
/// Built by [`crate::DeployerBuilder`]. Holds the network's deployment store,
/// and with it the store's lock, until dropped.
#[derive(Debug)]
pub struct Deployer {
    pub pipeline: StandardPipeline,
    pub store: DeploymentStore,
    pub tasks: Vec<DeploymentTask>,
}

impl Deployer {
    /// Deploy the tasks selected by `tag` (and their dependencies).
    pub async fn deploy(&self, tag: &str) -> Result<RunReport> {
        tracing::info!(
            network = %self.pipeline.profile().name,
            rpc_url = %self.pipeline.profile().redacted_rpc_url(),
            store = %self.store.dir().display(),
            "Starting deployment process..."
        );

        self.pipeline.run(self.tasks.clone(), tag, &self.store).await
    }

    /// Dry run of [`Self::deploy`].
    pub async fn plan(&self, tag: &str) -> Result<Vec<PlannedTask>> {
        self.pipeline.plan(self.tasks.clone(), tag, &self.store).await
    }
}
