//! Error taxonomy for the deployment pipeline.
//!
//! Plumbing failures (I/O, RPC transport, parsing) travel as plain
//! [`anyhow::Error`] with context attached. The variants below are the ones a
//! caller has to tell apart, so they are raised as [`DeployError`] and can be
//! recovered with [`anyhow::Error::downcast_ref`].

use std::fmt;

/// Errors the orchestration layer distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    /// The network name is not in the chain table.
    UnknownNetwork { name: String },
    /// Two tasks declare the same contract; they would share one record.
    DuplicateContract { contract: String },
    /// No valid execution order exists for the task collection.
    CyclicDependency { contracts: Vec<String> },
    /// A tag was referenced that no task declares.
    ///
    /// `required_by` is the contract that depends on the tag, or `None` when the
    /// tag came from the run filter.
    UnresolvedTag {
        tag: String,
        required_by: Option<String>,
    },
    /// The creation transaction was rejected, reverted or could not be sent.
    DeploymentTransaction { contract: String, reason: String },
    /// The confirmation depth was not reached in time.
    ///
    /// The transaction may still land later. It stays pending in the store and
    /// the next run reconciles it before deciding to send anything.
    ConfirmationTimeout {
        contract: String,
        transaction_hash: String,
        waited_secs: u64,
    },
    /// Source verification failed. Never fatal for the run.
    Verification { contract: String, reason: String },
}

impl DeployError {
    /// Whether this error is detected before any transaction is sent.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownNetwork { .. }
                | Self::DuplicateContract { .. }
                | Self::CyclicDependency { .. }
                | Self::UnresolvedTag { .. }
        )
    }
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNetwork { name } => {
                write!(f, "unknown network `{name}`: not present in the chain table")
            }
            Self::DuplicateContract { contract } => {
                write!(f, "contract `{contract}` is declared by more than one task")
            }
            Self::CyclicDependency { contracts } => write!(
                f,
                "cyclic tag dependency between tasks: {}",
                contracts.join(" <-> ")
            ),
            Self::UnresolvedTag {
                tag,
                required_by: Some(contract),
            } => write!(
                f,
                "task `{contract}` depends on tag `{tag}`, which no task declares"
            ),
            Self::UnresolvedTag {
                tag,
                required_by: None,
            } => write!(f, "no task is tagged `{tag}`"),
            Self::DeploymentTransaction { contract, reason } => {
                write!(f, "deployment of `{contract}` failed: {reason}")
            }
            Self::ConfirmationTimeout {
                contract,
                transaction_hash,
                waited_secs,
            } => write!(
                f,
                "timed out after {waited_secs}s waiting for confirmations of `{contract}` \
                 (tx {transaction_hash}); it may still be mined, re-run to reconcile"
            ),
            Self::Verification { contract, reason } => {
                write!(f, "verification of `{contract}` failed: {reason}")
            }
        }
    }
}

impl std::error::Error for DeployError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(
            DeployError::UnknownNetwork {
                name: "nowhere".to_string()
            }
            .is_configuration()
        );
        assert!(
            DeployError::CyclicDependency {
                contracts: vec!["A".to_string(), "B".to_string()]
            }
            .is_configuration()
        );
        assert!(
            DeployError::DuplicateContract {
                contract: "Greeter".to_string()
            }
            .is_configuration()
        );
        assert!(
            !DeployError::ConfirmationTimeout {
                contract: "Greeter".to_string(),
                transaction_hash: "0x22".to_string(),
                waited_secs: 600,
            }
            .is_configuration()
        );
        assert!(
            !DeployError::Verification {
                contract: "Greeter".to_string(),
                reason: "boom".to_string()
            }
            .is_configuration()
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = DeployError::UnresolvedTag {
            tag: "base".to_string(),
            required_by: Some("Vault".to_string()),
        }
        .into();
        let err = err.context("Failed to order tasks");

        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::UnresolvedTag { .. })
        ));
        assert_eq!(
            err.root_cause().to_string(),
            "task `Vault` depends on tag `base`, which no task declares"
        );
    }
}
