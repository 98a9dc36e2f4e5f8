//! Source verification against Etherscan-compatible explorers.
//!
//! Submission uses `module=contract&action=verifysourcecode` with the
//! standard-json compiler input, then polls `checkverifystatus` with the
//! returned GUID. A contract the explorer already knows counts as verified.

use std::{future::Future, time::Duration};

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::{
    artifact::{ArtifactSource, encode_constructor_args},
    error::DeployError,
    network::{ExplorerConfig, NetworkProfile},
    store::DeploymentRecord,
};

const PENDING_MARKER: &str = "Pending in queue";
const ALREADY_VERIFIED_MARKER: &str = "already verified";
const CODE_FORMAT: &str = "solidity-standard-json-input";

/// How long to keep polling the verification status.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);
const STATUS_POLL_ATTEMPTS: usize = 24;

/// Result of a verification attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum VerificationOutcome {
    #[display("verified ({guid})")]
    Verified { guid: String },
    #[display("already verified")]
    AlreadyVerified,
    #[display("skipped: {reason}")]
    Skipped { reason: String },
}

/// Submits deployed contracts for public source verification.
pub trait Verifier: Send + Sync {
    /// Verify the contract behind `record` on the explorer of `profile`.
    ///
    /// Errors are [`DeployError::Verification`]; callers treat them as
    /// non-fatal.
    fn submit(
        &self,
        record: &DeploymentRecord,
        profile: &NetworkProfile,
    ) -> impl Future<Output = anyhow::Result<VerificationOutcome>> + Send;
}

/// Generic response envelope of the Etherscan API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: String,
}

#[derive(Debug, Serialize)]
struct VerifySourceRequest<'a> {
    apikey: &'a str,
    module: &'static str,
    action: &'static str,
    contractaddress: String,
    #[serde(rename = "sourceCode")]
    source_code: String,
    codeformat: &'static str,
    contractname: String,
    compilerversion: String,
    /// Misspelled by the API itself.
    #[serde(rename = "constructorArguements")]
    constructor_arguments: String,
}

#[derive(Debug, Serialize)]
struct CheckStatusRequest<'a> {
    apikey: &'a str,
    module: &'static str,
    action: &'static str,
    guid: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
enum Submission {
    Accepted { guid: String },
    AlreadyVerified,
    Rejected { reason: String },
}

#[derive(Debug, PartialEq, Eq)]
enum Status {
    Verified,
    AlreadyVerified,
    Pending,
    Failed { reason: String },
}

fn classify_submission(response: &EtherscanResponse) -> Submission {
    if mentions(response, ALREADY_VERIFIED_MARKER) {
        Submission::AlreadyVerified
    } else if response.status == "1" {
        Submission::Accepted {
            guid: response.result.clone(),
        }
    } else {
        Submission::Rejected {
            reason: format!("{}: {}", response.message, response.result),
        }
    }
}

fn classify_status(response: &EtherscanResponse) -> Status {
    if mentions(response, PENDING_MARKER) {
        Status::Pending
    } else if mentions(response, ALREADY_VERIFIED_MARKER) {
        Status::AlreadyVerified
    } else if response.status == "1" {
        Status::Verified
    } else {
        Status::Failed {
            reason: response.result.clone(),
        }
    }
}

/// Explorers disagree on capitalisation.
fn mentions(response: &EtherscanResponse, marker: &str) -> bool {
    response
        .result
        .to_lowercase()
        .contains(&marker.to_lowercase())
}

/// Failure of one status poll, split by whether polling should continue.
#[derive(Debug)]
enum PollError {
    Pending,
    Transport(anyhow::Error),
    Failed(String),
}

/// A [`Verifier`] for Etherscan and its clones (Arbiscan, Snowtrace, ...).
#[derive(Debug, Clone)]
pub struct EtherscanVerifier<A> {
    client: reqwest::Client,
    artifacts: A,
    submit_backoff: ExponentialBuilder,
    status_backoff: ConstantBuilder,
}

impl<A: ArtifactSource> EtherscanVerifier<A> {
    pub fn new(artifacts: A) -> anyhow::Result<Self> {
        Ok(Self {
            client: crate::rpc::create_client()?,
            artifacts,
            submit_backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(2))
                .with_max_times(4),
            status_backoff: ConstantBuilder::default()
                .with_delay(STATUS_POLL_INTERVAL)
                .with_max_times(STATUS_POLL_ATTEMPTS),
        })
    }

    async fn verify(
        &self,
        record: &DeploymentRecord,
        explorer: &ExplorerConfig,
        api_key: &str,
    ) -> anyhow::Result<VerificationOutcome> {
        let artifact = self.artifacts.load(&record.contract_name)?;
        let build_info = artifact.build_info()?;
        let constructor_args = encode_constructor_args(&artifact.abi, &record.args)?;

        let request = VerifySourceRequest {
            apikey: api_key,
            module: "contract",
            action: "verifysourcecode",
            contractaddress: record.address.to_string(),
            source_code: serde_json::to_string(&build_info.input)?,
            codeformat: CODE_FORMAT,
            contractname: artifact.qualified_name(),
            compilerversion: format!("v{}", build_info.solc_long_version),
            constructor_arguments: hex::encode(constructor_args),
        };

        let submission = (|| async {
            let response: EtherscanResponse = self
                .client
                .post(explorer.api_url.clone())
                .form(&request)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(reqwest::Error::without_url)?
                .json()
                .await
                .map_err(reqwest::Error::without_url)?;
            anyhow::Ok(classify_submission(&response))
        })
        .retry(self.submit_backoff)
        .notify(|err, delay| {
            tracing::debug!(error = %err, ?delay, "Verification submission failed, retrying");
        })
        .await?;

        let guid = match submission {
            Submission::Accepted { guid } => guid,
            Submission::AlreadyVerified => return Ok(VerificationOutcome::AlreadyVerified),
            Submission::Rejected { reason } => anyhow::bail!("submission rejected: {reason}"),
        };

        tracing::info!(
            contract = %record.contract_name,
            guid = %guid,
            "Verification submitted, waiting for result"
        );

        let status = (|| async {
            let response: EtherscanResponse = self
                .client
                .get(explorer.api_url.clone())
                .query(&CheckStatusRequest {
                    apikey: api_key,
                    module: "contract",
                    action: "checkverifystatus",
                    guid: &guid,
                })
                .send()
                .await
                .and_then(|response| response.error_for_status())
                // The query string carries the API key.
                .map_err(|err| PollError::Transport(err.without_url().into()))?
                .json()
                .await
                .map_err(|err| PollError::Transport(err.without_url().into()))?;

            match classify_status(&response) {
                Status::Pending => Err(PollError::Pending),
                Status::Failed { reason } => Err(PollError::Failed(reason)),
                status => Ok(status),
            }
        })
        .retry(self.status_backoff)
        .when(|err| !matches!(err, PollError::Failed(_)))
        .await;

        match status {
            Ok(Status::AlreadyVerified) => Ok(VerificationOutcome::AlreadyVerified),
            Ok(_) => Ok(VerificationOutcome::Verified { guid }),
            Err(PollError::Pending) => anyhow::bail!("still pending after polling ({guid})"),
            Err(PollError::Transport(err)) => {
                Err(err.context("Failed to poll verification status"))
            }
            Err(PollError::Failed(reason)) => anyhow::bail!("verification failed: {reason}"),
        }
    }
}

impl<A: ArtifactSource> Verifier for EtherscanVerifier<A> {
    async fn submit(
        &self,
        record: &DeploymentRecord,
        profile: &NetworkProfile,
    ) -> anyhow::Result<VerificationOutcome> {
        let Some(explorer) = profile.explorer.as_ref() else {
            return Ok(VerificationOutcome::Skipped {
                reason: format!("no explorer configured for `{}`", profile.name),
            });
        };
        let Some(api_key) = explorer.api_key.as_deref() else {
            tracing::warn!(
                contract = %record.contract_name,
                env = explorer.api_key_env,
                "No explorer API key set, skipping verification"
            );
            return Ok(VerificationOutcome::Skipped {
                reason: format!("{} is not set", explorer.api_key_env),
            });
        };

        self.verify(record, explorer, api_key)
            .await
            .map_err(|err| {
                DeployError::Verification {
                    contract: record.contract_name.clone(),
                    reason: format!("{err:#}"),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifact::{Fingerprint, HardhatArtifacts},
        config::Secrets,
        network::NetworkResolver,
        task::ArgValue,
    };
    use alloy_core::{
        json_abi::JsonAbi,
        primitives::{Address, B256},
    };
    use tempdir::TempDir;

    fn record(network: &str) -> DeploymentRecord {
        DeploymentRecord {
            contract_name: "Greeter".to_string(),
            network: network.to_string(),
            chain_id: 5,
            address: Address::repeat_byte(0x11),
            fingerprint: Fingerprint::from("aa".to_string()),
            args: vec![ArgValue::from("Hello, World!")],
            transaction_hash: B256::repeat_byte(0x22),
            block_number: 7,
            confirmations: 6,
            abi: JsonAbi::default(),
            deployed_at: 1737316800,
        }
    }

    /// A verifier over an empty artifacts directory: any attempt to build a
    /// submission fails, so a `Skipped` outcome proves nothing was sent.
    fn verifier(temp_dir: &TempDir) -> EtherscanVerifier<HardhatArtifacts> {
        EtherscanVerifier::new(HardhatArtifacts::new(temp_dir.path())).unwrap()
    }

    #[tokio::test]
    async fn test_network_without_explorer_is_skipped() {
        let temp_dir = TempDir::new("mintbake-test").expect("Failed to create temp dir");
        let profile = NetworkResolver::new(Secrets::default())
            .resolve("hardhat")
            .unwrap();

        let outcome = verifier(&temp_dir)
            .submit(&record("hardhat"), &profile)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            VerificationOutcome::Skipped {
                reason: "no explorer configured for `hardhat`".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_is_skipped() {
        let temp_dir = TempDir::new("mintbake-test").expect("Failed to create temp dir");
        let profile = NetworkResolver::new(Secrets::default())
            .resolve("goerli")
            .unwrap();
        let explorer = profile.explorer.clone().expect("goerli has an explorer");
        assert!(explorer.api_key.is_none());

        let outcome = verifier(&temp_dir)
            .submit(&record("goerli"), &profile)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            VerificationOutcome::Skipped {
                reason: format!("{} is not set", explorer.api_key_env)
            }
        );
    }

    #[tokio::test]
    async fn test_submission_errors_are_verification_errors() {
        let temp_dir = TempDir::new("mintbake-test").expect("Failed to create temp dir");
        let secrets = Secrets {
            explorer_api_keys: [("ETHERSCAN_API_KEY".to_string(), "key".to_string())].into(),
            ..Default::default()
        };
        let profile = NetworkResolver::new(secrets).resolve("goerli").unwrap();

        // No artifact for Greeter: fails before any request.
        let err = verifier(&temp_dir)
            .submit(&record("goerli"), &profile)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::Verification { .. })
        ));
    }

    fn response(status: &str, result: &str) -> EtherscanResponse {
        EtherscanResponse {
            status: status.to_string(),
            message: if status == "1" { "OK" } else { "NOTOK" }.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn test_submission_accepted() {
        let guid = "ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn";
        assert_eq!(
            classify_submission(&response("1", guid)),
            Submission::Accepted {
                guid: guid.to_string()
            }
        );
    }

    #[test]
    fn test_submission_already_verified() {
        assert_eq!(
            classify_submission(&response("0", "Contract source code already verified")),
            Submission::AlreadyVerified
        );
    }

    #[test]
    fn test_submission_rejected() {
        assert!(matches!(
            classify_submission(&response("0", "Invalid API Key")),
            Submission::Rejected { .. }
        ));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(&response("0", "Pending in queue")), Status::Pending);
        assert_eq!(classify_status(&response("1", "Pass - Verified")), Status::Verified);
        assert_eq!(
            classify_status(&response("0", "Already Verified")),
            Status::AlreadyVerified
        );
        assert_eq!(
            classify_status(&response("0", "Contract source code already verified")),
            Status::AlreadyVerified
        );
        assert_eq!(
            classify_status(&response("0", "Fail - Unable to verify")),
            Status::Failed {
                reason: "Fail - Unable to verify".to_string()
            }
        );
    }

    #[test]
    fn test_request_uses_api_field_names() {
        let request = VerifySourceRequest {
            apikey: "key",
            module: "contract",
            action: "verifysourcecode",
            contractaddress: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            source_code: "{}".to_string(),
            codeformat: CODE_FORMAT,
            contractname: "contracts/Greeter.sol:Greeter".to_string(),
            compilerversion: "v0.8.17+commit.8df45f5f".to_string(),
            constructor_arguments: String::new(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["action"], "verifysourcecode");
        assert_eq!(value["sourceCode"], "{}");
        assert_eq!(value["codeformat"], "solidity-standard-json-input");
        assert!(value.get("constructorArguements").is_some());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(VerificationOutcome::AlreadyVerified.to_string(), "already verified");
        assert_eq!(
            VerificationOutcome::Skipped {
                reason: "ETHERSCAN_API_KEY is not set".to_string()
            }
            .to_string(),
            "skipped: ETHERSCAN_API_KEY is not set"
        );
    }
}
