//! Persisted deployment records.
//!
//! Layout, one directory per network:
//!
//! ```text
//! <deployments>/<network>/.chainId
//! <deployments>/<network>/.lock
//! <deployments>/<network>/.pendingTransactions
//! <deployments>/<network>/<Contract>.json
//! ```
//!
//! `.pendingTransactions` holds creation transactions that were broadcast but
//! whose outcome is not known yet, keyed by contract name.

use std::{
    collections::BTreeMap,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256},
};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{artifact::Fingerprint, task::ArgValue};

const CHAIN_ID_FILENAME: &str = ".chainId";
const LOCK_FILENAME: &str = ".lock";
const PENDING_FILENAME: &str = ".pendingTransactions";

/// The last successful deployment of one contract on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub network: String,
    pub chain_id: u64,
    pub address: Address,
    pub fingerprint: Fingerprint,
    /// Constructor arguments as sent, named accounts already resolved.
    pub args: Vec<ArgValue>,
    pub transaction_hash: B256,
    pub block_number: u64,
    /// Confirmation depth awaited before the record was written.
    pub confirmations: u64,
    pub abi: JsonAbi,
    /// Unix timestamp of the write.
    pub deployed_at: i64,
}

impl DeploymentRecord {
    /// The idempotency key: a record is current when both the code fingerprint
    /// and the constructor arguments are unchanged.
    pub fn matches(&self, fingerprint: &Fingerprint, args: &[ArgValue]) -> bool {
        &self.fingerprint == fingerprint && self.args == args
    }
}

/// A creation transaction sent but not yet confirmed.
///
/// Carries what the record needs besides the receipt, so a later run can
/// finish the deployment without sending again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeployment {
    pub contract_name: String,
    pub transaction_hash: B256,
    pub fingerprint: Fingerprint,
    pub args: Vec<ArgValue>,
    pub abi: JsonAbi,
    /// Unix timestamp of the broadcast.
    pub sent_at: i64,
}

/// Deployment records of one network.
///
/// Holds an exclusive advisory lock on the network directory for its whole
/// lifetime, so two runs against the same network cannot interleave.
#[derive(Debug)]
pub struct DeploymentStore {
    dir: PathBuf,
    network: String,
    _lock: File,
}

impl DeploymentStore {
    /// Open (creating if needed) the store of `network` under `root`.
    ///
    /// Fails if the directory was created for a different chain id.
    pub fn open(root: &Path, network: &str, chain_id: u64) -> Result<Self> {
        let dir = root.join(network);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create deployments directory {}", dir.display()))?;

        let lock = File::create(dir.join(LOCK_FILENAME)).context("Failed to create lock file")?;
        lock.try_lock_exclusive().with_context(|| {
            format!(
                "Deployments of `{network}` are locked by another process ({})",
                dir.display()
            )
        })?;

        let chain_id_path = dir.join(CHAIN_ID_FILENAME);
        if chain_id_path.exists() {
            let stored = std::fs::read_to_string(&chain_id_path)
                .context("Failed to read stored chain id")?;
            let stored: u64 = stored
                .trim()
                .parse()
                .with_context(|| format!("Malformed chain id file {}", chain_id_path.display()))?;
            if stored != chain_id {
                anyhow::bail!(
                    "Deployments in {} belong to chain {}, but `{}` is chain {}",
                    dir.display(),
                    stored,
                    network,
                    chain_id
                );
            }
        } else {
            std::fs::write(&chain_id_path, chain_id.to_string())
                .context("Failed to write chain id file")?;
        }

        tracing::debug!(network, chain_id, dir = %dir.display(), "Opened deployment store");

        Ok(Self {
            dir,
            network: network.to_string(),
            _lock: lock,
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, contract_name: &str) -> PathBuf {
        self.dir.join(format!("{contract_name}.json"))
    }

    /// The record of `contract_name`, if it was ever deployed on this network.
    pub fn get(&self, contract_name: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(contract_name);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read deployment record {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse deployment record {}", path.display()))?;
        Ok(Some(record))
    }

    /// Write `record`, atomically replacing any previous record of the contract.
    pub fn put(&self, record: &DeploymentRecord) -> Result<()> {
        if record.network != self.network {
            anyhow::bail!(
                "Record for network `{}` written to the store of `{}`",
                record.network,
                self.network
            );
        }

        let path = self.record_path(&record.contract_name);
        let json = serde_json::to_string_pretty(record)
            .context("Failed to serialize deployment record")?;
        self.write_atomic(&path, &format!(".{}.json.tmp", record.contract_name), &json)?;

        tracing::debug!(
            contract = %record.contract_name,
            address = %record.address,
            path = %path.display(),
            "Deployment record written"
        );
        Ok(())
    }

    /// The unconfirmed transaction of `contract_name`, if any.
    pub fn pending(&self, contract_name: &str) -> Result<Option<PendingDeployment>> {
        Ok(self.read_pending()?.remove(contract_name))
    }

    /// Remember a broadcast creation transaction until its outcome is known.
    pub fn put_pending(&self, pending: &PendingDeployment) -> Result<()> {
        let mut entries = self.read_pending()?;
        entries.insert(pending.contract_name.clone(), pending.clone());
        self.write_pending(&entries)?;

        tracing::debug!(
            contract = %pending.contract_name,
            tx = %pending.transaction_hash,
            "Pending transaction stored"
        );
        Ok(())
    }

    /// Forget the unconfirmed transaction of `contract_name`.
    pub fn clear_pending(&self, contract_name: &str) -> Result<()> {
        let mut entries = self.read_pending()?;
        if entries.remove(contract_name).is_some() {
            self.write_pending(&entries)?;
        }
        Ok(())
    }

    fn read_pending(&self) -> Result<BTreeMap<String, PendingDeployment>> {
        let path = self.dir.join(PENDING_FILENAME);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn write_pending(&self, entries: &BTreeMap<String, PendingDeployment>) -> Result<()> {
        let path = self.dir.join(PENDING_FILENAME);
        if entries.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            return Ok(());
        }

        let json = serde_json::to_string_pretty(entries)
            .context("Failed to serialize pending transactions")?;
        self.write_atomic(&path, ".pendingTransactions.tmp", &json)
    }

    /// Write `content` to a sibling temp file, flush it, then rename over `path`.
    fn write_atomic(&self, path: &Path, tmp_name: &str, content: &str) -> Result<()> {
        let tmp_path = self.dir.join(tmp_name);
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
        }
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace {}", path.display()))
    }

    /// All records of this network, sorted by contract name.
    pub fn records(&self) -> Result<Vec<DeploymentRecord>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir).context("Failed to list deployment records")? {
            let entry = entry.context("Failed to read directory entry")?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            match file_name.strip_suffix(".json") {
                Some(name) if !name.starts_with('.') => names.push(name.to_string()),
                _ => {}
            }
        }
        names.sort();

        names
            .iter()
            .filter_map(|name| self.get(name).transpose())
            .collect()
    }
}
