//! mintbake-deploy - Declarative smart-contract deployment.
//!
//! This crate orders deploy declarations by tag dependency, deploys each
//! contract whose build output or constructor arguments changed since its last
//! recorded deployment, and submits new deployments on live networks for
//! source verification.

mod accounts;
pub use accounts::NamedAccounts;

mod artifact;
pub use artifact::{
    Artifact, ArtifactSource, BuildInfo, Fingerprint, HardhatArtifacts, encode_constructor_args,
};

mod builder;
pub use builder::DeployerBuilder;

mod chain;
pub use chain::{ChainClient, Receipt, RpcChainClient, TransactionStatus};

mod config;
pub use config::{
    CONFIG_FILENAME, DEFAULT_CONFIRMATION_TIMEOUT_SECS, DOTENV_PATH_VAR, ENV_PREFIX,
    NetworkOverride, PathsConfig, ProjectConfig, Secrets,
};

mod deployer;
pub use deployer::{Deployer, StandardPipeline};

mod error;
pub use error::DeployError;

mod executor;
pub use executor::{
    Assessment, Decision, DeployReason, DeploymentExecutor, DeploymentOutcome, TaskState, decide,
};

mod graph;
pub use graph::{TaskGraph, order};

mod network;
pub use network::{
    AccountStrategy, CHAIN_TABLE, ChainEntry, DEFAULT_ACCOUNT_COUNT, DEFAULT_DERIVATION_PATH,
    DEFAULT_MNEMONIC, ExplorerConfig, ExplorerEntry, LOCAL_NETWORKS, LOCAL_RPC_URL,
    NetworkProfile, NetworkResolver, RpcRule, VERIFICATION_BLOCK_CONFIRMATIONS,
};

mod pipeline;
pub use pipeline::{Pipeline, PlannedTask, RunReport, TaskReport, TaskStatus, render_plan};

mod rpc;

mod store;
pub use store::{DeploymentRecord, DeploymentStore, PendingDeployment};

mod task;
pub use task::{ACCOUNT_REF_PREFIX, ALL_TAG, ArgValue, DeploymentTask};

mod verify;
pub use verify::{EtherscanVerifier, VerificationOutcome, Verifier};
