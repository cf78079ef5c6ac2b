//! Signature collection for multisig spends
//!
//! Partial signatures are gathered per input against one unsigned
//! transaction. Once every input carries M valid signatures the set is
//! combined into the final scriptSigs.

use crate::core::script::SIGHASH_ALL;
use crate::core::{txid_of, UnsignedTransaction};
use crate::crypto::{public_key_from_slice, verify_der_signature};
use crate::multisig::signer::SignerError;
use crate::multisig::wallet::MultisigWallet;
use serde::Serialize;

/// One signer's signature over one input
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartialSignature {
    /// Human-readable signer name
    pub signer_identity: String,
    /// Serialized public key, as it appears in the redeem script
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// DER signature without the sighash byte
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub input_index: usize,
}

mod hex_bytes {
    pub fn serialize<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}

/// A fully signed transaction, ready to broadcast
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignedTransaction {
    #[serde(rename = "hex", with = "hex_bytes")]
    raw: Vec<u8>,
    txid: String,
}

impl SignedTransaction {
    pub(crate) fn from_raw(raw: Vec<u8>) -> Self {
        let txid = txid_of(&raw);
        Self { raw, txid }
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.raw)
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

/// Signatures collected for one unsigned transaction
#[derive(Debug)]
pub struct SignatureSet<'a> {
    tx: &'a UnsignedTransaction,
    wallet: &'a MultisigWallet,
    signatures: Vec<PartialSignature>,
}

impl<'a> SignatureSet<'a> {
    pub fn new(tx: &'a UnsignedTransaction, wallet: &'a MultisigWallet) -> Self {
        Self {
            tx,
            wallet,
            signatures: Vec::new(),
        }
    }

    /// Digest a signer must sign for an input
    pub fn sighash(&self, input_index: usize) -> Result<[u8; 32], SignerError> {
        Ok(self
            .tx
            .signature_hash(input_index, self.wallet.redeem_script().as_bytes())?)
    }

    /// Add a signature from an authorized signer
    pub fn add_signature(&mut self, signature: PartialSignature) -> Result<(), SignerError> {
        if signature.input_index >= self.tx.inputs().len() {
            return Err(SignerError::InputOutOfRange(signature.input_index));
        }

        if !self.wallet.is_signer(&signature.public_key) {
            return Err(SignerError::UnknownSigner(signature.signer_identity));
        }

        if self.signatures.iter().any(|s| {
            s.input_index == signature.input_index && s.public_key == signature.public_key
        }) {
            return Err(SignerError::AlreadySigned {
                signer: signature.signer_identity,
                input: signature.input_index,
            });
        }

        let digest = self.sighash(signature.input_index)?;
        let public_key = public_key_from_slice(&signature.public_key)?;
        if !verify_der_signature(&public_key, &digest, &signature.signature)? {
            return Err(SignerError::InvalidSignature {
                signer: signature.signer_identity,
                input: signature.input_index,
            });
        }

        self.signatures.push(signature);
        Ok(())
    }

    /// Get number of signatures collected for an input
    pub fn signature_count(&self, input_index: usize) -> usize {
        self.signatures
            .iter()
            .filter(|s| s.input_index == input_index)
            .count()
    }

    /// Combine signatures into the final transaction
    ///
    /// Per input, signatures are ordered by the position of their key in the
    /// redeem script, as `OP_CHECKMULTISIG` requires.
    pub fn finalize(&self) -> Result<SignedTransaction, SignerError> {
        let redeem = self.wallet.redeem_script();
        let need = redeem.threshold() as usize;

        let mut script_sigs = Vec::with_capacity(self.tx.inputs().len());
        for input in 0..self.tx.inputs().len() {
            let mut sigs: Vec<(usize, &PartialSignature)> = self
                .signatures
                .iter()
                .filter(|s| s.input_index == input)
                .filter_map(|s| redeem.position(&s.public_key).map(|pos| (pos, s)))
                .collect();

            if sigs.len() < need {
                return Err(SignerError::InsufficientSignatures {
                    input,
                    have: sigs.len(),
                    need,
                });
            }

            sigs.sort_by_key(|(pos, _)| *pos);
            let with_hash_type: Vec<Vec<u8>> = sigs
                .iter()
                .take(need)
                .map(|(_, s)| {
                    let mut sig = s.signature.clone();
                    sig.push(SIGHASH_ALL);
                    sig
                })
                .collect();

            script_sigs.push(redeem.script_sig(&with_hash_type));
        }

        let raw = self.tx.serialize(&script_sigs)?;
        Ok(SignedTransaction::from_raw(raw))
    }
}
