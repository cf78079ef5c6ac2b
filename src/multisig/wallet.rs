//! Multi-signature wallet description
//!
//! A P2SH multisig wallet is fully described by its redeem script; the
//! address is HASH160 of that script. Loading checks that the configured
//! address really commits to the configured script and that the script
//! carries the expected M-of-N policy.

use crate::core::{Address, AddressError, Network, RedeemScript, ScriptError, ScriptType};
use serde::Serialize;
use thiserror::Error;

/// Errors related to multisig wallet configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultisigError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("Redeem script is {found}, expected {expected}")]
    PolicyMismatch { expected: String, found: String },
    #[error("Multisig address must be P2SH: {0}")]
    NotP2sh(String),
    #[error("Address {address} does not commit to the redeem script (script hashes to {derived})")]
    AddressMismatch { address: String, derived: String },
    #[error("Address error: {0}")]
    Address(#[from] AddressError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}

/// A validated M-of-N P2SH wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MultisigWallet {
    /// P2SH address, starts with '3'
    pub address: Address,
    #[serde(serialize_with = "serialize_script")]
    redeem_script: RedeemScript,
}

fn serialize_script<S: serde::Serializer>(
    script: &RedeemScript,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&script.to_hex())
}

impl MultisigWallet {
    /// Load and cross-check an address, redeem script and expected policy
    pub fn from_parts(
        address: &str,
        redeem_script_hex: &str,
        threshold: u8,
        signer_count: usize,
        network: &Network,
    ) -> Result<Self, MultisigError> {
        if threshold == 0 {
            return Err(MultisigError::InvalidThreshold(
                "threshold must be at least 1".to_string(),
            ));
        }
        if threshold as usize > signer_count {
            return Err(MultisigError::InvalidThreshold(format!(
                "threshold {} exceeds signer count {}",
                threshold, signer_count
            )));
        }

        let address = Address::parse(address, network)?;
        if address.script_type() != ScriptType::P2SH {
            return Err(MultisigError::NotP2sh(address.to_string()));
        }

        let redeem_script = RedeemScript::from_hex(redeem_script_hex)?;

        let expected = format!("{}-of-{}", threshold, signer_count);
        if redeem_script.description() != expected {
            return Err(MultisigError::PolicyMismatch {
                expected,
                found: redeem_script.description(),
            });
        }

        let derived = Address::p2sh(redeem_script.as_bytes(), network);
        if derived.hash() != address.hash() {
            return Err(MultisigError::AddressMismatch {
                address: address.to_string(),
                derived: derived.to_string(),
            });
        }

        Ok(Self {
            address,
            redeem_script,
        })
    }

    /// Get the wallet address
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn redeem_script(&self) -> &RedeemScript {
        &self.redeem_script
    }

    /// Check if a serialized public key is one of the signers
    pub fn is_signer(&self, pubkey: &[u8]) -> bool {
        self.redeem_script.position(pubkey).is_some()
    }

    /// Get the required threshold
    pub fn threshold(&self) -> u8 {
        self.redeem_script.threshold()
    }

    /// Get the total number of signers
    pub fn signer_count(&self) -> usize {
        self.redeem_script.signer_count()
    }

    /// Get human-readable description
    pub fn description(&self) -> String {
        self.redeem_script.description()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{MULTISIG_ADDRESS, REDEEM_2_OF_3};

    fn load(address: &str, m: u8, n: usize) -> Result<MultisigWallet, MultisigError> {
        MultisigWallet::from_parts(address, REDEEM_2_OF_3, m, n, &Network::JUNKCOIN)
    }

    #[test]
    fn test_wallet_creation() {
        let wallet = load(MULTISIG_ADDRESS, 2, 3).unwrap();

        // P2SH addresses start with '3'
        assert!(wallet.address().as_str().starts_with('3'));
        assert_eq!(wallet.threshold(), 2);
        assert_eq!(wallet.signer_count(), 3);
        assert_eq!(wallet.description(), "2-of-3");
    }

    #[test]
    fn test_threshold_validation() {
        assert!(matches!(
            load(MULTISIG_ADDRESS, 0, 3),
            Err(MultisigError::InvalidThreshold(_))
        ));
        assert!(matches!(
            load(MULTISIG_ADDRESS, 4, 3),
            Err(MultisigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_policy_mismatch() {
        assert_eq!(
            load(MULTISIG_ADDRESS, 3, 3),
            Err(MultisigError::PolicyMismatch {
                expected: "3-of-3".to_string(),
                found: "2-of-3".to_string()
            })
        );
    }

    #[test]
    fn test_address_must_commit_to_script() {
        let result = load("34P2otqp4hUL4kRoVH74KpyrBdkrqZM18n", 2, 3);
        assert!(matches!(result, Err(MultisigError::AddressMismatch { .. })));
    }

    #[test]
    fn test_address_must_be_p2sh() {
        let result = load("7V768f6woVJ8QKRpfGMMA5pm24ysE6Dh3u", 2, 3);
        assert!(matches!(result, Err(MultisigError::NotP2sh(_))));
    }

    #[test]
    fn test_is_signer() {
        let wallet = load(MULTISIG_ADDRESS, 2, 3).unwrap();
        let first = wallet.redeem_script().pubkeys()[0].clone();

        assert!(wallet.is_signer(&first));
        assert!(!wallet.is_signer(&[0x02; 33]));
    }
}
