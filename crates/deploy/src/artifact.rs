//! Compiler artifacts and their content fingerprints.
//!
//! Reads the hardhat artifact layout:
//! - `<artifacts>/<source>/<Name>.json`: ABI, creation bytecode, source name
//! - `<artifacts>/<source>/<Name>.dbg.json`: pointer to the build info
//! - `<artifacts>/build-info/<id>.json`: compiler version and standard-json input

use std::path::{Path, PathBuf};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::JsonAbi,
    primitives::Bytes,
};
use anyhow::{Context, Result};
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::task::ArgValue;

/// Directory of the build info files inside the artifacts root.
const BUILD_INFO_DIR: &str = "build-info";

/// Content-derived identifier of a contract's compiled output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, Display, From)]
#[serde(transparent)]
pub struct Fingerprint(String);

/// Compiled output of one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub contract_name: String,
    pub source_name: String,
    pub abi: JsonAbi,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    /// Debug file pointing at the build info, when the compiler emitted one.
    pub dbg_path: Option<PathBuf>,
}

impl Artifact {
    /// Compute the SHA-256 fingerprint of this artifact.
    ///
    /// Covers the creation bytecode and the metadata that a redeploy should
    /// react to (ABI and source name). The same build always produces the same
    /// fingerprint.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let abi = serde_json::to_vec(&self.abi).context("Failed to serialize ABI")?;

        let mut hasher = Sha256::new();
        hasher.update(&self.bytecode);
        hasher.update(&abi);
        hasher.update(self.source_name.as_bytes());

        Ok(Fingerprint(hex::encode(hasher.finalize())))
    }

    /// `<source>:<Name>`, the form explorers expect.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }

    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn creation_code(&self, args: &[ArgValue]) -> Result<Bytes> {
        let encoded = encode_constructor_args(&self.abi, args)
            .with_context(|| format!("Failed to encode arguments of `{}`", self.contract_name))?;

        let mut code = self.bytecode.to_vec();
        code.extend_from_slice(&encoded);
        Ok(code.into())
    }

    /// Load the build info referenced by the debug file.
    pub fn build_info(&self) -> Result<BuildInfo> {
        let dbg_path = self
            .dbg_path
            .as_ref()
            .with_context(|| format!("No build info recorded for `{}`", self.contract_name))?;

        let dbg: DebugFile = read_json(dbg_path)?;
        let dir = dbg_path
            .parent()
            .context("Debug file path must have a parent directory")?;

        read_json(&dir.join(dbg.build_info))
    }
}

/// Compiler version and input of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_long_version: String,
    /// Standard-json compiler input.
    pub input: serde_json::Value,
}

/// ABI-encode constructor arguments against the constructor's parameter types.
pub fn encode_constructor_args(abi: &JsonAbi, args: &[ArgValue]) -> Result<Vec<u8>> {
    let inputs = abi
        .constructor
        .as_ref()
        .map(|constructor| constructor.inputs.as_slice())
        .unwrap_or_default();

    if inputs.len() != args.len() {
        anyhow::bail!(
            "Constructor expects {} arguments, got {}",
            inputs.len(),
            args.len()
        );
    }

    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let values = inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param
                .resolve()
                .with_context(|| format!("Unsupported parameter type `{}`", param.ty))?;
            coerce(&ty, arg).with_context(|| {
                format!("Argument `{arg}` is not a valid `{}` for `{}`", param.ty, param.name)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DynSolValue::Tuple(values).abi_encode_params())
}

fn coerce(ty: &DynSolType, arg: &ArgValue) -> Result<DynSolValue> {
    match (ty, arg) {
        // Taken verbatim: the string parser would treat commas and quotes as syntax.
        (DynSolType::String, ArgValue::Text(text)) => Ok(DynSolValue::String(text.clone())),
        (DynSolType::Bool, ArgValue::Bool(value)) => Ok(DynSolValue::Bool(*value)),
        _ => Ok(ty.coerce_str(&arg.to_string())?),
    }
}

/// Where artifacts come from.
pub trait ArtifactSource: Send + Sync {
    /// Load the current build output of `contract_name`.
    fn load(&self, contract_name: &str) -> Result<Artifact>;
}

/// On-disk shape of a hardhat artifact.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    source_name: String,
    abi: JsonAbi,
    bytecode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: PathBuf,
}

/// Artifacts read from a hardhat `artifacts/` directory.
#[derive(Debug, Clone)]
pub struct HardhatArtifacts {
    root: PathBuf,
}

impl HardhatArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find `<contract_name>.json` anywhere under the root.
    fn find(&self, contract_name: &str) -> Result<PathBuf> {
        let file_name = format!("{contract_name}.json");
        let mut matches = Vec::new();
        collect_named(&self.root, &file_name, &mut matches)?;

        match matches.len() {
            0 => anyhow::bail!(
                "Artifact for `{}` not found under {}; has the project been compiled?",
                contract_name,
                self.root.display()
            ),
            1 => Ok(matches.remove(0)),
            _ => anyhow::bail!(
                "Multiple artifacts named `{}` under {}: {}",
                contract_name,
                self.root.display(),
                matches
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl ArtifactSource for HardhatArtifacts {
    fn load(&self, contract_name: &str) -> Result<Artifact> {
        let path = self.find(contract_name)?;
        let raw: HardhatArtifact = read_json(&path)?;

        let bytecode = hex::decode(raw.bytecode.trim_start_matches("0x")).with_context(|| {
            format!(
                "Bytecode of `{}` is not valid hex (unlinked library references are not supported)",
                contract_name
            )
        })?;
        if bytecode.is_empty() {
            anyhow::bail!(
                "`{}` has no creation bytecode (abstract contract or interface?)",
                contract_name
            );
        }

        let dbg_path = path.with_file_name(format!("{contract_name}.dbg.json"));

        tracing::debug!(
            contract = contract_name,
            path = %path.display(),
            bytecode_len = bytecode.len(),
            "Loaded artifact"
        );

        Ok(Artifact {
            contract_name: raw.contract_name,
            source_name: raw.source_name,
            abi: raw.abi,
            bytecode: bytecode.into(),
            dbg_path: dbg_path.exists().then_some(dbg_path),
        })
    }
}

fn collect_named(dir: &Path, file_name: &str, matches: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;

    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();
        let file_type = entry.file_type().context("Failed to read file type")?;

        if file_type.is_dir() {
            if entry.file_name() != BUILD_INFO_DIR {
                collect_named(&path, file_name, matches)?;
            }
        } else if entry.file_name() == file_name {
            matches.push(path);
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
