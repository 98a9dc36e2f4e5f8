//! Signer derivation and named accounts.
//!
//! Mirrors the account roles of the deploy scripts:
//! - Index 0: deployer
//! - Index 1: fee collector (only when more than one account is derived)

use std::str::FromStr;

use alloy_core::primitives::Address;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use anyhow::Context;

use crate::network::AccountStrategy;

/// Accounts available to a run, with the deployer's signing key.
#[derive(Debug, Clone)]
pub struct NamedAccounts {
    signer: PrivateKeySigner,
    addresses: Vec<Address>,
}

impl NamedAccounts {
    /// Derive the accounts described by an [`AccountStrategy`].
    pub fn derive(strategy: &AccountStrategy) -> anyhow::Result<Self> {
        match strategy {
            AccountStrategy::ExplicitPrivateKey { key } => Self::from_private_key(key),
            AccountStrategy::MnemonicDerivation {
                phrase,
                count,
                path,
            } => Self::from_mnemonic(phrase, path, *count),
        }
    }

    /// Single-signer mode.
    pub fn from_private_key(key: &str) -> anyhow::Result<Self> {
        let signer = PrivateKeySigner::from_str(key.trim().trim_start_matches("0x"))
            .context("Failed to parse private key")?;
        Ok(Self {
            addresses: vec![signer.address()],
            signer,
        })
    }

    /// Derive `count` accounts at `<path>/<index>`.
    pub fn from_mnemonic(phrase: &str, path: &str, count: u32) -> anyhow::Result<Self> {
        if count == 0 {
            anyhow::bail!("At least one account must be derived from the mnemonic");
        }

        let signers = (0..count)
            .map(|index| {
                MnemonicBuilder::<English>::default()
                    .phrase(phrase)
                    .derivation_path(format!("{path}/{index}"))
                    .with_context(|| format!("Invalid derivation path {path}/{index}"))?
                    .build()
                    .with_context(|| format!("Failed to derive account {index} from mnemonic"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let addresses = signers.iter().map(|signer| signer.address()).collect();
        let signer = signers
            .into_iter()
            .next()
            .context("Mnemonic derivation produced no accounts")?;

        Ok(Self { signer, addresses })
    }

    /// The deployer's signing key.
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub fn deployer(&self) -> Address {
        self.signer.address()
    }

    pub fn fee_collector(&self) -> Option<Address> {
        self.addresses.get(1).copied()
    }

    /// Look an account up by the name used in constructor arguments.
    pub fn by_name(&self, name: &str) -> Option<Address> {
        match name {
            "deployer" => Some(self.deployer()),
            "feeCollector" | "fee_collector" => self.fee_collector(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{DEFAULT_DERIVATION_PATH, DEFAULT_MNEMONIC};

    #[test]
    fn test_default_mnemonic_matches_dev_accounts() {
        let accounts = NamedAccounts::from_mnemonic(DEFAULT_MNEMONIC, DEFAULT_DERIVATION_PATH, 10)
            .expect("Failed to derive accounts");

        assert_eq!(
            accounts.deployer(),
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );
        assert_eq!(
            accounts.fee_collector(),
            Some(Address::from_str("0x70997970C51812dc3A010C7d01b50e0d17dc79C8").unwrap())
        );
    }

    #[test]
    fn test_private_key_is_single_signer() {
        let accounts = NamedAccounts::from_private_key(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .expect("Failed to parse key");

        assert_eq!(
            accounts.deployer(),
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );
        assert_eq!(accounts.fee_collector(), None);
        assert_eq!(accounts.by_name("feeCollector"), None);
        assert_eq!(accounts.by_name("deployer"), Some(accounts.deployer()));
    }

    #[test]
    fn test_zero_accounts_rejected() {
        let result = NamedAccounts::from_mnemonic(DEFAULT_MNEMONIC, DEFAULT_DERIVATION_PATH, 0);
        assert!(result.is_err());
    }
}
