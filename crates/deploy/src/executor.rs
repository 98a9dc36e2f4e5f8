//! Per-task deployment state machine.
//!
//! ```text
//! Pending -> Fingerprinting -> Skipped
//!                           -> Deploying -> Confirming -> Recorded
//! ```
//!
//! Any error moves the task to `Failed`. A transaction broadcast but not
//! confirmed in time stays pending in the store; the next execution of the
//! task goes back to `Confirming` for it before fingerprinting.

use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};

use crate::{
    accounts::NamedAccounts,
    artifact::{Artifact, ArtifactSource, Fingerprint},
    chain::{ChainClient, TransactionStatus},
    error::DeployError,
    network::NetworkProfile,
    store::{DeploymentRecord, DeploymentStore, PendingDeployment},
    task::{ArgValue, DeploymentTask},
};

/// Lifecycle of one task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TaskState {
    Pending,
    Fingerprinting,
    Skipped,
    Deploying,
    Confirming,
    Recorded,
    Failed,
}

/// Why a task has to send a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DeployReason {
    NotDeployed,
    CodeChanged,
    ArgsChanged,
    /// The record exists but its address holds no code (reset local chain).
    CodeMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Deploy(DeployReason),
}

/// Compare the current build and arguments against the stored record.
///
/// Either a fingerprint or an argument difference triggers a redeploy.
pub fn decide(
    existing: Option<&DeploymentRecord>,
    fingerprint: &Fingerprint,
    args: &[ArgValue],
) -> Decision {
    match existing {
        None => Decision::Deploy(DeployReason::NotDeployed),
        Some(record) if record.matches(fingerprint, args) => Decision::Skip,
        Some(record) if &record.fingerprint != fingerprint => {
            Decision::Deploy(DeployReason::CodeChanged)
        }
        Some(_) => Decision::Deploy(DeployReason::ArgsChanged),
    }
}

/// Everything known about a task before a transaction is sent.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub artifact: Artifact,
    pub fingerprint: Fingerprint,
    /// Constructor arguments with named accounts resolved.
    pub args: Vec<ArgValue>,
    pub existing: Option<DeploymentRecord>,
    /// A creation transaction of an earlier run whose outcome is unknown.
    pub pending: Option<PendingDeployment>,
    pub decision: Decision,
}

/// Result of a successfully executed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// The stored record is current; nothing was sent.
    Skipped(DeploymentRecord),
    /// A new contract was deployed and recorded, possibly by a transaction
    /// sent in an earlier run.
    Deployed(DeploymentRecord),
}

impl DeploymentOutcome {
    pub fn record(&self) -> &DeploymentRecord {
        match self {
            Self::Skipped(record) | Self::Deployed(record) => record,
        }
    }
}

/// Drives tasks through [`TaskState`] against one chain.
#[derive(Debug)]
pub struct DeploymentExecutor<'a, C, A> {
    chain: &'a C,
    artifacts: &'a A,
    accounts: &'a NamedAccounts,
    confirmation_timeout: Duration,
}

impl<'a, C: ChainClient, A: ArtifactSource> DeploymentExecutor<'a, C, A> {
    pub fn new(
        chain: &'a C,
        artifacts: &'a A,
        accounts: &'a NamedAccounts,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            artifacts,
            accounts,
            confirmation_timeout,
        }
    }

    /// Fingerprint the task and decide whether it must be deployed.
    ///
    /// Reads only; used both by [`Self::execute`] and by dry runs.
    pub async fn assess(
        &self,
        task: &DeploymentTask,
        profile: &NetworkProfile,
        store: &DeploymentStore,
    ) -> Result<Assessment> {
        let contract = task.contract_name.as_str();
        transition(contract, TaskState::Fingerprinting);

        let artifact = self.artifacts.load(contract)?;
        let fingerprint = artifact.fingerprint()?;
        let args = task.resolved_args(self.accounts)?;
        let existing = store.get(contract)?;
        let pending = store.pending(contract)?;

        let mut decision = decide(existing.as_ref(), &fingerprint, &args);

        // Local chains are routinely restarted from genesis while the
        // deployments directory survives.
        if let (Decision::Skip, Some(record)) = (decision, existing.as_ref()) {
            if !profile.is_live && !self.code_exists(record.address).await? {
                decision = Decision::Deploy(DeployReason::CodeMissing);
            }
        }

        tracing::debug!(
            contract,
            fingerprint = %fingerprint,
            decision = ?decision,
            "Task assessed"
        );

        Ok(Assessment {
            artifact,
            fingerprint,
            args,
            existing,
            pending,
            decision,
        })
    }

    /// Run one task to completion: skip it, or deploy, confirm and record it.
    pub async fn execute(
        &self,
        task: &DeploymentTask,
        profile: &NetworkProfile,
        store: &DeploymentStore,
    ) -> Result<DeploymentOutcome> {
        transition(&task.contract_name, TaskState::Pending);

        let result = self.run(task, profile, store).await;
        if let Err(err) = &result {
            tracing::error!(
                contract = %task.contract_name,
                state = %TaskState::Failed,
                error = %format!("{err:#}"),
                "Task failed"
            );
        }
        result
    }

    async fn run(
        &self,
        task: &DeploymentTask,
        profile: &NetworkProfile,
        store: &DeploymentStore,
    ) -> Result<DeploymentOutcome> {
        let contract = task.contract_name.as_str();
        let reconciled = self.reconcile(contract, profile, store).await?;
        let assessment = self.assess(task, profile, store).await?;

        let reason = match (assessment.decision, assessment.existing) {
            (Decision::Skip, Some(record)) if reconciled.as_ref() == Some(&record) => {
                return Ok(DeploymentOutcome::Deployed(record));
            }
            (Decision::Skip, Some(record)) => {
                transition(contract, TaskState::Skipped);
                tracing::info!(
                    contract,
                    address = %record.address,
                    network = %profile.name,
                    "Reusing existing deployment"
                );
                return Ok(DeploymentOutcome::Skipped(record));
            }
            (Decision::Deploy(reason), _) => reason,
            (Decision::Skip, None) => {
                anyhow::bail!("Skip decided for `{contract}` without a stored record")
            }
        };

        transition(contract, TaskState::Deploying);
        tracing::info!(
            contract,
            reason = %reason,
            network = %profile.name,
            deployer = %self.accounts.deployer(),
            "Deploying contract"
        );

        let creation_code = assessment.artifact.creation_code(&assessment.args)?;
        let transaction_hash = self
            .chain
            .send_creation(self.accounts.signer(), creation_code)
            .await
            .map_err(|err| DeployError::DeploymentTransaction {
                contract: contract.to_string(),
                reason: format!("{err:#}"),
            })?;

        let pending = PendingDeployment {
            contract_name: contract.to_string(),
            transaction_hash,
            fingerprint: assessment.fingerprint,
            args: assessment.args,
            abi: assessment.artifact.abi,
            sent_at: chrono::Utc::now().timestamp(),
        };
        store
            .put_pending(&pending)
            .with_context(|| format!("Failed to remember transaction {transaction_hash}"))?;

        let record = self.confirm(pending, profile, store).await?;
        Ok(DeploymentOutcome::Deployed(record))
    }

    /// Settle a creation transaction left unconfirmed by an earlier run.
    ///
    /// Returns the record written when that transaction landed. A dropped or
    /// reverted transaction is forgotten so the task can deploy afresh.
    async fn reconcile(
        &self,
        contract: &str,
        profile: &NetworkProfile,
        store: &DeploymentStore,
    ) -> Result<Option<DeploymentRecord>> {
        let Some(pending) = store.pending(contract)? else {
            return Ok(None);
        };
        let transaction_hash = pending.transaction_hash;

        let status = self
            .chain
            .transaction_status(transaction_hash)
            .await
            .with_context(|| format!("Failed to look up pending transaction {transaction_hash}"))?;

        match status {
            TransactionStatus::Dropped => {
                tracing::warn!(
                    contract,
                    tx = %transaction_hash,
                    "Pending deployment transaction was dropped"
                );
                store.clear_pending(contract)?;
                Ok(None)
            }
            TransactionStatus::Mined(receipt)
                if !receipt.success || receipt.contract_address.is_none() =>
            {
                tracing::warn!(
                    contract,
                    tx = %transaction_hash,
                    block = receipt.block_number,
                    "Pending deployment transaction reverted"
                );
                store.clear_pending(contract)?;
                Ok(None)
            }
            TransactionStatus::Mined(_) | TransactionStatus::Pending => {
                tracing::info!(
                    contract,
                    tx = %transaction_hash,
                    "Reconciling deployment transaction from an earlier run"
                );
                self.confirm(pending, profile, store).await.map(Some)
            }
        }
    }

    /// Wait for `pending` to reach the profile's confirmation depth, then
    /// record it.
    ///
    /// On timeout the pending entry is kept. It is dropped once the outcome
    /// is definite: recorded, reverted, or without a created contract.
    async fn confirm(
        &self,
        pending: PendingDeployment,
        profile: &NetworkProfile,
        store: &DeploymentStore,
    ) -> Result<DeploymentRecord> {
        let contract = pending.contract_name.as_str();
        let transaction_hash = pending.transaction_hash;

        transition(contract, TaskState::Confirming);
        let confirmations = profile.confirmation_depth();
        tracing::info!(
            contract,
            tx = %transaction_hash,
            confirmations,
            "Waiting for deployment receipt"
        );

        let receipt = tokio::time::timeout(
            self.confirmation_timeout,
            self.chain.wait_for_receipt(transaction_hash, confirmations),
        )
        .await
        .map_err(|_| DeployError::ConfirmationTimeout {
            contract: contract.to_string(),
            transaction_hash: transaction_hash.to_string(),
            waited_secs: self.confirmation_timeout.as_secs(),
        })??;

        let address = match (receipt.success, receipt.contract_address) {
            (true, Some(address)) => address,
            (success, _) => {
                store.clear_pending(contract)?;
                let reason = if success {
                    format!("receipt of {transaction_hash} has no contract address")
                } else {
                    format!("transaction {transaction_hash} reverted")
                };
                return Err(DeployError::DeploymentTransaction {
                    contract: contract.to_string(),
                    reason,
                }
                .into());
            }
        };

        let record = DeploymentRecord {
            contract_name: contract.to_string(),
            network: profile.name.clone(),
            chain_id: profile.chain_id,
            address,
            fingerprint: pending.fingerprint,
            args: pending.args,
            transaction_hash,
            block_number: receipt.block_number,
            confirmations,
            abi: pending.abi,
            deployed_at: chrono::Utc::now().timestamp(),
        };
        store
            .put(&record)
            .with_context(|| format!("Failed to record deployment of `{contract}`"))?;
        store.clear_pending(contract)?;

        transition(contract, TaskState::Recorded);
        tracing::info!(
            contract,
            address = %record.address,
            block = record.block_number,
            "Contract deployed"
        );

        Ok(record)
    }

    async fn code_exists(&self, address: Address) -> Result<bool> {
        self.chain
            .has_code(address)
            .await
            .with_context(|| format!("Failed to read code at {address}"))
    }
}

fn transition(contract: &str, state: TaskState) {
    tracing::debug!(contract, state = %state, "Task state changed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::{json_abi::JsonAbi, primitives::B256};

    fn record(fingerprint: &str, greeting: &str) -> DeploymentRecord {
        DeploymentRecord {
            contract_name: "Greeter".to_string(),
            network: "localhost".to_string(),
            chain_id: 1337,
            address: Address::repeat_byte(0x11),
            fingerprint: Fingerprint::from(fingerprint.to_string()),
            args: vec![ArgValue::from(greeting)],
            transaction_hash: B256::repeat_byte(0x22),
            block_number: 1,
            confirmations: 0,
            abi: JsonAbi::default(),
            deployed_at: 0,
        }
    }

    #[test]
    fn test_decide_without_record() {
        let fingerprint = Fingerprint::from("aa".to_string());
        assert_eq!(
            decide(None, &fingerprint, &[]),
            Decision::Deploy(DeployReason::NotDeployed)
        );
    }

    #[test]
    fn test_decide_matching_record_is_skipped() {
        let existing = record("aa", "Hello, World!");
        assert_eq!(
            decide(
                Some(&existing),
                &Fingerprint::from("aa".to_string()),
                &[ArgValue::from("Hello, World!")]
            ),
            Decision::Skip
        );
    }

    #[test]
    fn test_decide_code_change() {
        let existing = record("aa", "Hello, World!");
        assert_eq!(
            decide(
                Some(&existing),
                &Fingerprint::from("bb".to_string()),
                &[ArgValue::from("Hello, World!")]
            ),
            Decision::Deploy(DeployReason::CodeChanged)
        );
    }

    #[test]
    fn test_decide_args_change_alone_redeploys() {
        let existing = record("aa", "Hello, World!");
        assert_eq!(
            decide(
                Some(&existing),
                &Fingerprint::from("aa".to_string()),
                &[ArgValue::from("Hola, Mundo!")]
            ),
            Decision::Deploy(DeployReason::ArgsChanged)
        );
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TaskState::Fingerprinting.to_string(), "fingerprinting");
        assert_eq!(DeployReason::CodeMissing.to_string(), "code-missing");
    }
}
