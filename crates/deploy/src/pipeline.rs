//! Runs an ordered task collection against one network.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use comfy_table::{Attribute, Cell, Color, Table, presets::ASCII_MARKDOWN};

use crate::{
    accounts::NamedAccounts,
    artifact::ArtifactSource,
    chain::ChainClient,
    config::DEFAULT_CONFIRMATION_TIMEOUT_SECS,
    error::DeployError,
    executor::{Decision, DeploymentExecutor, DeploymentOutcome},
    graph::TaskGraph,
    network::NetworkProfile,
    store::DeploymentStore,
    task::DeploymentTask,
    verify::Verifier,
};

/// Final status of one task in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TaskStatus {
    Skipped,
    Deployed,
    Failed,
    /// Sent but not confirmed in time. The next run reconciles it.
    Unconfirmed,
    /// Deployed and recorded; the explorer submission failed.
    VerificationFailed,
    /// Not attempted because an earlier task failed.
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub contract_name: String,
    pub status: TaskStatus,
    pub address: Option<Address>,
    pub detail: Option<String>,
}

/// Per-task results of a pipeline run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub network: String,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// `false` if any task failed or is unconfirmed. Verification failures do
    /// not count.
    pub fn success(&self) -> bool {
        !self.tasks.iter().any(|task| {
            matches!(
                task.status,
                TaskStatus::Failed | TaskStatus::Unconfirmed | TaskStatus::NotRun
            )
        })
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|task| task.status == status).count()
    }

    pub fn task(&self, contract_name: &str) -> Option<&TaskReport> {
        self.tasks
            .iter()
            .find(|task| task.contract_name == contract_name)
    }

    pub fn render(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(ASCII_MARKDOWN);
        table.set_header([
            header_cell("Contract"),
            header_cell("Status"),
            header_cell("Address"),
            header_cell("Detail"),
        ]);

        for task in &self.tasks {
            let color = match task.status {
                TaskStatus::Deployed => Color::Green,
                TaskStatus::Skipped => Color::Blue,
                TaskStatus::VerificationFailed | TaskStatus::Unconfirmed => Color::Yellow,
                TaskStatus::Failed | TaskStatus::NotRun => Color::Red,
            };
            table.add_row([
                Cell::new(&task.contract_name),
                Cell::new(task.status).fg(color),
                Cell::new(task.address.map(|a| a.to_string()).unwrap_or_default()),
                Cell::new(task.detail.as_deref().unwrap_or_default()),
            ]);
        }
        table
    }
}

/// Predicted action for one task of a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub contract_name: String,
    pub decision: Decision,
    /// Address of the current record, if any.
    pub address: Option<Address>,
    /// Unconfirmed transaction of an earlier run, reconciled first.
    pub pending: Option<B256>,
}

/// Render a dry run as a table.
pub fn render_plan(plan: &[PlannedTask]) -> Table {
    let mut table = Table::new();
    table.load_preset(ASCII_MARKDOWN);
    table.set_header([
        header_cell("#"),
        header_cell("Contract"),
        header_cell("Action"),
        header_cell("Current address"),
    ]);

    for (index, task) in plan.iter().enumerate() {
        let action = match (task.pending, task.decision) {
            (Some(hash), _) => Cell::new(format!("reconcile tx {hash}")).fg(Color::Yellow),
            (None, Decision::Skip) => Cell::new("skip").fg(Color::Blue),
            (None, Decision::Deploy(reason)) => {
                Cell::new(format!("deploy ({reason})")).fg(Color::Green)
            }
        };
        table.add_row([
            Cell::new(index + 1),
            Cell::new(&task.contract_name),
            action,
            Cell::new(task.address.map(|a| a.to_string()).unwrap_or_default()),
        ]);
    }
    table
}

fn header_cell(name: &str) -> Cell {
    Cell::new(name).add_attribute(Attribute::Bold)
}

/// Everything needed to deploy to one network.
///
/// Generic over the chain, the artifact source and the verifier so runs can
/// be exercised without a node or an explorer.
#[derive(Debug)]
pub struct Pipeline<C, A, V> {
    profile: NetworkProfile,
    accounts: NamedAccounts,
    chain: C,
    artifacts: A,
    verifier: V,
    confirmation_timeout: Duration,
}

impl<C: ChainClient, A: ArtifactSource, V: Verifier> Pipeline<C, A, V> {
    pub fn new(
        profile: NetworkProfile,
        accounts: NamedAccounts,
        chain: C,
        artifacts: A,
        verifier: V,
    ) -> Self {
        Self {
            profile,
            accounts,
            chain,
            artifacts,
            verifier,
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        }
    }

    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn accounts(&self) -> &NamedAccounts {
        &self.accounts
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    fn executor(&self) -> DeploymentExecutor<'_, C, A> {
        DeploymentExecutor::new(
            &self.chain,
            &self.artifacts,
            &self.accounts,
            self.confirmation_timeout,
        )
    }

    /// Order `tasks`, keep those selected by `tag`, and validate the store
    /// and the endpoint against the profile.
    ///
    /// Every error here happens before any transaction is sent.
    async fn prepare<'t>(
        &self,
        graph: &'t TaskGraph,
        tag: &str,
        store: &DeploymentStore,
    ) -> Result<Vec<&'t DeploymentTask>> {
        let selected = graph.select(tag)?;

        if store.network() != self.profile.name {
            anyhow::bail!(
                "Deployment store belongs to `{}`, not `{}`",
                store.network(),
                self.profile.name
            );
        }

        let chain_id = self.chain.chain_id().await?;
        if chain_id != self.profile.chain_id {
            anyhow::bail!(
                "RPC endpoint {} reports chain id {}, but `{}` is chain {}",
                self.profile.redacted_rpc_url(),
                chain_id,
                self.profile.name,
                self.profile.chain_id
            );
        }

        Ok(selected)
    }

    /// Deploy every selected task in dependency order.
    ///
    /// Configuration problems (unknown tag, cycle, wrong chain) are returned
    /// as `Err` before anything is sent. Task failures are reported in the
    /// [`RunReport`]; the first one stops the run.
    pub async fn run(
        &self,
        tasks: Vec<DeploymentTask>,
        tag: &str,
        store: &DeploymentStore,
    ) -> Result<RunReport> {
        let graph = TaskGraph::new(tasks)?;
        let selected = self.prepare(&graph, tag, store).await?;

        tracing::info!(
            network = %self.profile.name,
            chain_id = self.profile.chain_id,
            live = self.profile.is_live,
            tag,
            tasks = selected.len(),
            deployer = %self.accounts.deployer(),
            "Starting deployment run"
        );

        let executor = self.executor();
        let mut reports = Vec::with_capacity(selected.len());
        let mut aborted = false;

        for task in selected {
            if aborted {
                reports.push(TaskReport {
                    contract_name: task.contract_name.clone(),
                    status: TaskStatus::NotRun,
                    address: None,
                    detail: None,
                });
                continue;
            }

            let report = match executor.execute(task, &self.profile, store).await {
                Ok(DeploymentOutcome::Skipped(record)) => TaskReport {
                    contract_name: task.contract_name.clone(),
                    status: TaskStatus::Skipped,
                    address: Some(record.address),
                    detail: None,
                },
                Ok(DeploymentOutcome::Deployed(record)) => {
                    let mut report = TaskReport {
                        contract_name: task.contract_name.clone(),
                        status: TaskStatus::Deployed,
                        address: Some(record.address),
                        detail: Some(format!("tx {}", record.transaction_hash)),
                    };

                    if self.profile.verification_enabled() {
                        match self.verifier.submit(&record, &self.profile).await {
                            Ok(outcome) => {
                                tracing::info!(
                                    contract = %record.contract_name,
                                    outcome = %outcome,
                                    "Verification finished"
                                );
                                report.detail = Some(outcome.to_string());
                            }
                            Err(err) => {
                                tracing::warn!(
                                    contract = %record.contract_name,
                                    error = %format!("{err:#}"),
                                    "Verification failed, continuing"
                                );
                                report.status = TaskStatus::VerificationFailed;
                                report.detail = Some(format!("{err:#}"));
                            }
                        }
                    }
                    report
                }
                Err(err) => {
                    aborted = true;
                    let status = match err.downcast_ref::<DeployError>() {
                        Some(DeployError::ConfirmationTimeout { .. }) => TaskStatus::Unconfirmed,
                        _ => TaskStatus::Failed,
                    };
                    TaskReport {
                        contract_name: task.contract_name.clone(),
                        status,
                        address: None,
                        detail: Some(format!("{err:#}")),
                    }
                }
            };
            reports.push(report);
        }

        let report = RunReport {
            network: self.profile.name.clone(),
            tasks: reports,
        };

        tracing::info!(
            network = %report.network,
            deployed = report.count(TaskStatus::Deployed)
                + report.count(TaskStatus::VerificationFailed),
            skipped = report.count(TaskStatus::Skipped),
            failed = report.count(TaskStatus::Failed),
            unconfirmed = report.count(TaskStatus::Unconfirmed),
            "Deployment run finished"
        );

        Ok(report)
    }

    /// Predict what [`Self::run`] would do, without sending anything.
    pub async fn plan(
        &self,
        tasks: Vec<DeploymentTask>,
        tag: &str,
        store: &DeploymentStore,
    ) -> Result<Vec<PlannedTask>> {
        let graph = TaskGraph::new(tasks)?;
        let selected = self.prepare(&graph, tag, store).await?;
        let executor = self.executor();

        let mut plan = Vec::with_capacity(selected.len());
        for task in selected {
            let assessment = executor
                .assess(task, &self.profile, store)
                .await
                .with_context(|| format!("Failed to assess `{}`", task.contract_name))?;
            plan.push(PlannedTask {
                contract_name: task.contract_name.clone(),
                decision: assessment.decision,
                address: assessment.existing.map(|record| record.address),
                pending: assessment.pending.map(|pending| pending.transaction_hash),
            });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: &[TaskStatus]) -> RunReport {
        RunReport {
            network: "localhost".to_string(),
            tasks: statuses
                .iter()
                .enumerate()
                .map(|(index, &status)| TaskReport {
                    contract_name: format!("C{index}"),
                    status,
                    address: None,
                    detail: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_verification_failure_is_not_a_run_failure() {
        assert!(report(&[TaskStatus::Deployed, TaskStatus::VerificationFailed]).success());
        assert!(report(&[TaskStatus::Skipped]).success());
        assert!(!report(&[TaskStatus::Failed, TaskStatus::NotRun]).success());
        assert!(!report(&[TaskStatus::Unconfirmed]).success());
    }

    #[test]
    fn test_render_lists_every_task() {
        let rendered = report(&[TaskStatus::Deployed, TaskStatus::NotRun])
            .render()
            .to_string();
        assert!(rendered.contains("C0"));
        assert!(rendered.contains("deployed"));
        assert!(rendered.contains("not-run"));
    }

    #[test]
    fn test_render_plan() {
        let plan = vec![
            PlannedTask {
                contract_name: "Greeter".to_string(),
                decision: Decision::Skip,
                address: Some(Address::repeat_byte(0x11)),
                pending: None,
            },
            PlannedTask {
                contract_name: "DropAlbum".to_string(),
                decision: Decision::Deploy(crate::executor::DeployReason::NotDeployed),
                address: None,
                pending: None,
            },
            PlannedTask {
                contract_name: "Vault".to_string(),
                decision: Decision::Deploy(crate::executor::DeployReason::NotDeployed),
                address: None,
                pending: Some(B256::repeat_byte(0x44)),
            },
        ];

        let rendered = render_plan(&plan).to_string();
        assert!(rendered.contains("skip"));
        assert!(rendered.contains("deploy (not-deployed)"));
        assert!(rendered.contains(&format!("reconcile tx {}", B256::repeat_byte(0x44))));
    }
}
