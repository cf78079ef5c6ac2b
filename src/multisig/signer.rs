//! Collaborative signing against the redeem script
//!
//! A `Signer` turns a 32-byte sighash into a DER signature. The
//! `MultisigSigner` holds exactly M of them, signs every input with each,
//! combines the results and re-verifies the serialized transaction before
//! handing it out. There is no fallback to another key on failure.

use crate::core::script::{parse_pushes, SIGHASH_ALL};
use crate::core::{Network, RawTransaction, ScriptError, TransactionError, UnsignedTransaction};
use crate::crypto::{public_key_from_slice, verify_der_signature, KeyError, KeyPair};
use crate::multisig::transaction::{PartialSignature, SignatureSet, SignedTransaction};
use crate::multisig::wallet::MultisigWallet;
use log::debug;
use thiserror::Error;

/// Signing errors
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Expected exactly {expected} signing keys, got {found}")]
    WrongSignerCount { expected: usize, found: usize },
    #[error("Signer {0} is not part of the redeem script")]
    UnknownSigner(String),
    #[error("Signer {0} configured twice")]
    DuplicateSigner(String),
    #[error("Signer {signer} already signed input {input}")]
    AlreadySigned { signer: String, input: usize },
    #[error("Signature from {signer} on input {input} does not verify")]
    InvalidSignature { signer: String, input: usize },
    #[error("Input {input} has {have} signatures, needs {need}")]
    InsufficientSignatures { input: usize, have: usize, need: usize },
    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),
    #[error("Signed transaction failed verification: {0}")]
    Mismatch(String),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

/// Something able to sign a sighash for one key of the redeem script
pub trait Signer {
    /// Name used in logs and partial signatures
    fn identity(&self) -> &str;

    /// Serialized public key as committed to by the redeem script
    fn public_key(&self) -> Vec<u8>;

    /// DER signature over a 32-byte digest
    fn sign(&self, sighash: &[u8; 32]) -> Result<Vec<u8>, SignerError>;
}

/// Signer backed by an in-memory private key
pub struct KeySigner {
    identity: String,
    key: KeyPair,
}

impl KeySigner {
    pub fn new(identity: impl Into<String>, key: KeyPair) -> Self {
        Self {
            identity: identity.into(),
            key,
        }
    }

    /// Load from a WIF string for the given network
    pub fn from_wif(
        identity: impl Into<String>,
        wif: &str,
        network: &Network,
    ) -> Result<Self, SignerError> {
        let key = KeyPair::from_wif(wif.trim(), network.wif_version)?;
        Ok(Self::new(identity, key))
    }
}

impl Signer for KeySigner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.public_key_bytes()
    }

    fn sign(&self, sighash: &[u8; 32]) -> Result<Vec<u8>, SignerError> {
        Ok(self.key.sign(sighash))
    }
}

impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySigner")
            .field("identity", &self.identity)
            .field("public_key", &self.key.public_key_hex())
            .finish()
    }
}

/// The M configured signers of a multisig wallet
pub struct MultisigSigner {
    wallet: MultisigWallet,
    signers: Vec<Box<dyn Signer>>,
}

impl MultisigSigner {
    /// Requires exactly M distinct signers, all present in the redeem script
    pub fn new(wallet: MultisigWallet, signers: Vec<Box<dyn Signer>>) -> Result<Self, SignerError> {
        let expected = wallet.threshold() as usize;
        if signers.len() != expected {
            return Err(SignerError::WrongSignerCount {
                expected,
                found: signers.len(),
            });
        }

        for (i, signer) in signers.iter().enumerate() {
            let pubkey = signer.public_key();
            if !wallet.is_signer(&pubkey) {
                return Err(SignerError::UnknownSigner(signer.identity().to_string()));
            }
            if signers[..i].iter().any(|s| s.public_key() == pubkey) {
                return Err(SignerError::DuplicateSigner(signer.identity().to_string()));
            }
        }

        Ok(Self { wallet, signers })
    }

    pub fn wallet(&self) -> &MultisigWallet {
        &self.wallet
    }

    /// Identities of the configured signers
    pub fn identities(&self) -> Vec<&str> {
        self.signers.iter().map(|s| s.identity()).collect()
    }

    /// Sign every input with every signer, combine and verify
    pub fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        let mut set = SignatureSet::new(tx, &self.wallet);

        for input_index in 0..tx.inputs().len() {
            let digest = set.sighash(input_index)?;
            for signer in &self.signers {
                let signature = signer.sign(&digest)?;
                set.add_signature(PartialSignature {
                    signer_identity: signer.identity().to_string(),
                    public_key: signer.public_key(),
                    signature,
                    input_index,
                })?;
            }
            debug!(
                "Input {} signed by {}",
                input_index,
                self.identities().join(", ")
            );
        }

        let signed = set.finalize()?;
        verify_signed_transaction(&signed, tx, &self.wallet)?;
        Ok(signed)
    }
}

/// Re-parse a signed transaction and check it against what was built
///
/// Inputs and outputs must match the unsigned transaction exactly, inputs
/// must equal outputs plus the fee, and every scriptSig must satisfy the
/// redeem script with signatures in key order.
pub fn verify_signed_transaction(
    signed: &SignedTransaction,
    tx: &UnsignedTransaction,
    wallet: &MultisigWallet,
) -> Result<(), SignerError> {
    let decoded = RawTransaction::parse(signed.raw_bytes())
        .map_err(|e| SignerError::Mismatch(format!("cannot decode: {}", e)))?;

    if decoded.inputs.len() != tx.inputs().len() {
        return Err(SignerError::Mismatch(format!(
            "{} inputs, expected {}",
            decoded.inputs.len(),
            tx.inputs().len()
        )));
    }
    for (raw, utxo) in decoded.inputs.iter().zip(tx.inputs()) {
        if raw.prev_txid != utxo.txid.to_lowercase() || raw.output_index != utxo.output_index {
            return Err(SignerError::Mismatch(format!(
                "input {}:{} does not match {}",
                raw.prev_txid,
                raw.output_index,
                utxo.outpoint()
            )));
        }
    }

    let expected_outputs: Vec<_> = tx.all_outputs().collect();
    if decoded.outputs.len() != expected_outputs.len() {
        return Err(SignerError::Mismatch(format!(
            "{} outputs, expected {}",
            decoded.outputs.len(),
            expected_outputs.len()
        )));
    }
    for (raw, expected) in decoded.outputs.iter().zip(&expected_outputs) {
        if raw.amount != expected.amount || raw.script_pubkey != expected.address.script_pubkey() {
            return Err(SignerError::Mismatch(format!(
                "output to {} altered",
                expected.address
            )));
        }
    }

    if tx.actual_fee() != Some(tx.estimated_fee()) {
        return Err(SignerError::Mismatch(format!(
            "inputs {} != outputs {} + fee {}",
            tx.total_input(),
            decoded.total_output(),
            tx.estimated_fee()
        )));
    }

    let redeem = wallet.redeem_script();
    let need = redeem.threshold() as usize;
    for (input_index, raw) in decoded.inputs.iter().enumerate() {
        let pushes = parse_pushes(&raw.script_sig)?;
        if pushes.len() != need + 2 || !pushes[0].is_empty() {
            return Err(SignerError::Mismatch(format!(
                "input {} scriptSig has {} items",
                input_index,
                pushes.len()
            )));
        }
        if pushes[pushes.len() - 1] != redeem.as_bytes() {
            return Err(SignerError::Mismatch(format!(
                "input {} reveals a different redeem script",
                input_index
            )));
        }

        let digest = tx.signature_hash(input_index, redeem.as_bytes())?;

        // OP_CHECKMULTISIG walks keys forward, never back
        let mut keys = redeem.pubkeys().iter();
        for sig in &pushes[1..pushes.len() - 1] {
            let (hash_type, der) = sig
                .split_last()
                .ok_or_else(|| SignerError::Mismatch("empty signature".to_string()))?;
            if *hash_type != SIGHASH_ALL {
                return Err(SignerError::Mismatch(format!(
                    "input {} uses sighash type {:#04x}",
                    input_index, hash_type
                )));
            }

            let mut matched = false;
            for key in keys.by_ref() {
                let public_key = public_key_from_slice(key)?;
                if verify_der_signature(&public_key, &digest, der).unwrap_or(false) {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Err(SignerError::Mismatch(format!(
                    "input {} signature does not verify against the redeem script",
                    input_index
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::push_data;
    use crate::test_fixtures::{signer_keys, unsigned_tx, wallet};

    fn signers(indices: &[usize]) -> Vec<Box<dyn Signer>> {
        let keys = signer_keys();
        indices
            .iter()
            .map(|&i| {
                Box::new(KeySigner::new(format!("signer{}", i + 1), keys[i].clone()))
                    as Box<dyn Signer>
            })
            .collect()
    }

    #[test]
    fn test_sign_two_of_three() {
        let wallet = wallet();
        let tx = unsigned_tx(&wallet);
        let signer = MultisigSigner::new(wallet.clone(), signers(&[0, 1])).unwrap();

        let signed = signer.sign(&tx).unwrap();
        assert!(verify_signed_transaction(&signed, &tx, &wallet).is_ok());

        let decoded = RawTransaction::parse(signed.raw_bytes()).unwrap();
        assert_eq!(decoded.inputs.len(), tx.inputs().len());
        assert_eq!(decoded.total_output(), tx.total_output());
    }

    #[test]
    fn test_any_two_keys_work() {
        let wallet = wallet();
        let tx = unsigned_tx(&wallet);
        for pair in [[0, 2], [2, 1]] {
            let signer = MultisigSigner::new(wallet.clone(), signers(&pair)).unwrap();
            assert!(signer.sign(&tx).is_ok());
        }
    }

    #[test]
    fn test_signing_is_deterministic() {
        let wallet = wallet();
        let tx = unsigned_tx(&wallet);
        let signer = MultisigSigner::new(wallet, signers(&[0, 1])).unwrap();
        assert_eq!(signer.sign(&tx).unwrap(), signer.sign(&tx).unwrap());
    }

    #[test]
    fn test_requires_exactly_threshold_signers() {
        let result = MultisigSigner::new(wallet(), signers(&[0]));
        assert!(matches!(
            result,
            Err(SignerError::WrongSignerCount {
                expected: 2,
                found: 1
            })
        ));

        let result = MultisigSigner::new(wallet(), signers(&[0, 1, 2]));
        assert!(matches!(
            result,
            Err(SignerError::WrongSignerCount { found: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_and_duplicate_signers() {
        let mut outsider = signers(&[0]);
        outsider.push(Box::new(KeySigner::new("outsider", KeyPair::generate())));
        assert!(matches!(
            MultisigSigner::new(wallet(), outsider),
            Err(SignerError::UnknownSigner(_))
        ));

        assert!(matches!(
            MultisigSigner::new(wallet(), signers(&[1, 1])),
            Err(SignerError::DuplicateSigner(_))
        ));
    }

    #[test]
    fn test_from_wif() {
        let signer = KeySigner::from_wif(
            "signer1",
            "NJVoLEtYD8voKWucduqbe4d8qZvwDG3gSchmaQtdhuXVZAkEJBaz",
            &Network::JUNKCOIN,
        )
        .unwrap();
        assert_eq!(signer.identity(), "signer1");
        assert_eq!(
            hex::encode(signer.public_key()),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert!(format!("{:?}", signer).contains("0279be66"));
    }

    #[test]
    fn test_verify_detects_swapped_signature_order() {
        let wallet = wallet();
        let tx = unsigned_tx(&wallet);
        let signer = MultisigSigner::new(wallet.clone(), signers(&[0, 1])).unwrap();
        let signed = signer.sign(&tx).unwrap();

        let decoded = RawTransaction::parse(signed.raw_bytes()).unwrap();
        let script_sigs: Vec<Vec<u8>> = decoded
            .inputs
            .iter()
            .map(|input| {
                let pushes = parse_pushes(&input.script_sig).unwrap();
                let mut script = vec![0x00];
                push_data(&mut script, &pushes[2]);
                push_data(&mut script, &pushes[1]);
                push_data(&mut script, &pushes[3]);
                script
            })
            .collect();

        let tampered = SignedTransaction::from_raw(tx.serialize(&script_sigs).unwrap());
        assert!(matches!(
            verify_signed_transaction(&tampered, &tx, &wallet),
            Err(SignerError::Mismatch(_))
        ));
    }

    #[test]
    fn test_verify_detects_altered_outputs() {
        let wallet = wallet();
        let tx = unsigned_tx(&wallet);
        let signer = MultisigSigner::new(wallet.clone(), signers(&[0, 1])).unwrap();
        let signed = signer.sign(&tx).unwrap();

        let other = unsigned_tx_with_fee(&wallet, tx.estimated_fee() + 1);
        assert!(matches!(
            verify_signed_transaction(&signed, &other, &wallet),
            Err(SignerError::Mismatch(_))
        ));
    }

    fn unsigned_tx_with_fee(wallet: &MultisigWallet, fee: u64) -> UnsignedTransaction {
        let base = unsigned_tx(wallet);
        let mut outputs = base.outputs().to_vec();
        outputs[0].amount -= fee - base.estimated_fee();
        UnsignedTransaction::new(
            base.inputs().to_vec(),
            outputs,
            base.change_output().cloned(),
            fee,
        )
        .unwrap()
    }
}
