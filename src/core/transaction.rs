//! Legacy transaction encoding
//!
//! Distribution transactions are assembled locally and encoded with the
//! `bitcoin` crate's consensus codec, which Junkcoin shares:
//! - version 1, no witness data, locktime 0
//! - every input spends a P2SH multisig output with a final sequence
//! - legacy `SIGHASH_ALL` digests use the redeem script as script code

use crate::core::address::Address;
use crate::core::script::SIGHASH_ALL;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Transaction version
pub const TX_VERSION: i32 = 1;

/// Sequence number that disables locktime
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// Locktime of every distribution transaction
pub const LOCKTIME: u32 = 0;

/// Largest raw transaction the validator lets through
pub const MAX_TX_SIZE: usize = 100_000;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Invalid txid: {0}")]
    InvalidTxid(String),
    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),
    #[error("Expected {expected} scriptSigs, got {found}")]
    ScriptSigCountMismatch { expected: usize, found: usize },
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Transaction has no outputs")]
    NoOutputs,
    #[error("Malformed transaction: {0}")]
    Decode(String),
    #[error("Amount overflow")]
    AmountOverflow,
}

// =============================================================================
// UTXO
// =============================================================================

/// Unspent output held by the multisig address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    #[serde(alias = "vout")]
    pub output_index: u32,
    #[serde(alias = "value")]
    pub amount: u64,
    #[serde(default)]
    pub confirmations: u32,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, output_index: u32, amount: u64, confirmations: u32) -> Self {
        Self {
            txid: txid.into(),
            output_index,
            amount,
            confirmations,
        }
    }

    /// `txid:vout` form used in logs
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.output_index)
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// A payment to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: u64,
}

impl TxOutput {
    pub fn new(address: Address, amount: u64) -> Self {
        Self { address, amount }
    }
}

// =============================================================================
// Unsigned Transaction
// =============================================================================

/// Inputs and outputs fixed before signing
///
/// Recipient outputs come first, in allocation order, followed by the
/// optional change output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsignedTransaction {
    inputs: Vec<Utxo>,
    outputs: Vec<TxOutput>,
    change_output: Option<TxOutput>,
    estimated_fee: u64,
}

impl UnsignedTransaction {
    pub fn new(
        inputs: Vec<Utxo>,
        outputs: Vec<TxOutput>,
        change_output: Option<TxOutput>,
        estimated_fee: u64,
    ) -> Result<Self, TransactionError> {
        if inputs.is_empty() {
            return Err(TransactionError::NoInputs);
        }
        if outputs.is_empty() && change_output.is_none() {
            return Err(TransactionError::NoOutputs);
        }
        for input in &inputs {
            parse_txid(&input.txid)?;
        }

        Ok(Self {
            inputs,
            outputs,
            change_output,
            estimated_fee,
        })
    }

    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    /// Recipient outputs, excluding change
    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    pub fn change_output(&self) -> Option<&TxOutput> {
        self.change_output.as_ref()
    }

    pub fn estimated_fee(&self) -> u64 {
        self.estimated_fee
    }

    /// Outputs in serialization order
    pub fn all_outputs(&self) -> impl Iterator<Item = &TxOutput> {
        self.outputs.iter().chain(self.change_output.iter())
    }

    pub fn total_input(&self) -> u64 {
        self.inputs.iter().map(|u| u.amount).sum()
    }

    pub fn recipient_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    pub fn total_output(&self) -> u64 {
        self.all_outputs().map(|o| o.amount).sum()
    }

    /// Fee actually paid: inputs minus all outputs
    pub fn actual_fee(&self) -> Option<u64> {
        self.total_input().checked_sub(self.total_output())
    }

    /// Serialize with one scriptSig per input
    pub fn serialize(&self, script_sigs: &[Vec<u8>]) -> Result<Vec<u8>, TransactionError> {
        Ok(serialize(&self.to_consensus(script_sigs)?))
    }

    /// Legacy `SIGHASH_ALL` digest for one input
    ///
    /// Every scriptSig is blanked except the one being signed, which carries
    /// the script code (the redeem script for P2SH inputs).
    pub fn signature_hash(
        &self,
        input_index: usize,
        script_code: &[u8],
    ) -> Result<[u8; 32], TransactionError> {
        if input_index >= self.inputs.len() {
            return Err(TransactionError::InputOutOfRange(input_index));
        }

        let tx = self.to_consensus(&vec![Vec::new(); self.inputs.len()])?;
        let hash = SighashCache::new(&tx)
            .legacy_signature_hash(
                input_index,
                Script::from_bytes(script_code),
                u32::from(SIGHASH_ALL),
            )
            .map_err(|_| TransactionError::InputOutOfRange(input_index))?;
        Ok(hash.to_byte_array())
    }

    fn to_consensus(&self, script_sigs: &[Vec<u8>]) -> Result<Transaction, TransactionError> {
        if script_sigs.len() != self.inputs.len() {
            return Err(TransactionError::ScriptSigCountMismatch {
                expected: self.inputs.len(),
                found: script_sigs.len(),
            });
        }

        let input = self
            .inputs
            .iter()
            .zip(script_sigs)
            .map(|(utxo, script_sig)| {
                Ok(TxIn {
                    previous_output: OutPoint {
                        txid: parse_txid(&utxo.txid)?,
                        vout: utxo.output_index,
                    },
                    script_sig: ScriptBuf::from_bytes(script_sig.clone()),
                    sequence: Sequence(SEQUENCE_FINAL),
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<_>, TransactionError>>()?;

        let output = self
            .all_outputs()
            .map(|o| {
                if i64::try_from(o.amount).is_err() {
                    return Err(TransactionError::AmountOverflow);
                }
                Ok(TxOut {
                    value: Amount::from_sat(o.amount),
                    script_pubkey: ScriptBuf::from_bytes(o.address.script_pubkey()),
                })
            })
            .collect::<Result<Vec<_>, TransactionError>>()?;

        Ok(Transaction {
            version: Version(TX_VERSION),
            lock_time: LockTime::from_consensus(LOCKTIME),
            input,
            output,
        })
    }
}

// =============================================================================
// Decoded Transaction
// =============================================================================

/// Input of a decoded raw transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInput {
    pub prev_txid: String,
    pub output_index: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

/// Output of a decoded raw transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub amount: u64,
    pub script_pubkey: Vec<u8>,
}

/// A raw legacy transaction parsed back from bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub version: i32,
    pub inputs: Vec<RawInput>,
    pub outputs: Vec<RawOutput>,
    pub locktime: u32,
}

impl RawTransaction {
    /// Decode a complete legacy transaction; trailing bytes are an error
    pub fn parse(bytes: &[u8]) -> Result<Self, TransactionError> {
        let tx: Transaction =
            deserialize(bytes).map_err(|e| TransactionError::Decode(e.to_string()))?;

        Ok(Self {
            version: tx.version.0,
            inputs: tx
                .input
                .iter()
                .map(|input| RawInput {
                    prev_txid: input.previous_output.txid.to_string(),
                    output_index: input.previous_output.vout,
                    script_sig: input.script_sig.to_bytes(),
                    sequence: input.sequence.0,
                })
                .collect(),
            outputs: tx
                .output
                .iter()
                .map(|output| RawOutput {
                    amount: output.value.to_sat(),
                    script_pubkey: output.script_pubkey.to_bytes(),
                })
                .collect(),
            locktime: tx.lock_time.to_consensus_u32(),
        })
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Transaction id of a serialized transaction
pub fn txid_of(raw: &[u8]) -> String {
    Txid::from_raw_hash(sha256d::Hash::hash(raw)).to_string()
}

/// Parse a display-order txid
fn parse_txid(txid: &str) -> Result<Txid, TransactionError> {
    Txid::from_str(txid).map_err(|_| TransactionError::InvalidTxid(txid.to_string()))
}

/// Encoded length of a varint
pub fn varint_size(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{multisig_address, recipient_address};

    use bitcoin::consensus::encode::VarInt;

    fn sample_tx() -> UnsignedTransaction {
        let inputs = vec![
            Utxo::new("aa".repeat(32), 0, 50_000, 3),
            Utxo::new("bb".repeat(32), 7, 30_000, 1),
        ];
        let outputs = vec![
            TxOutput::new(recipient_address(0), 40_000),
            TxOutput::new(recipient_address(1), 20_000),
        ];
        let change = TxOutput::new(multisig_address(), 15_000);
        UnsignedTransaction::new(inputs, outputs, Some(change), 5_000).unwrap()
    }

    #[test]
    fn test_totals() {
        let tx = sample_tx();
        assert_eq!(tx.total_input(), 80_000);
        assert_eq!(tx.recipient_total(), 60_000);
        assert_eq!(tx.total_output(), 75_000);
        assert_eq!(tx.actual_fee(), Some(5_000));
        assert_eq!(tx.all_outputs().count(), 3);
    }

    #[test]
    fn test_rejects_empty_and_bad_txid() {
        let output = TxOutput::new(recipient_address(0), 1_000);
        assert_eq!(
            UnsignedTransaction::new(vec![], vec![output.clone()], None, 0),
            Err(TransactionError::NoInputs)
        );

        let bad = Utxo::new("xyz", 0, 1_000, 1);
        assert!(matches!(
            UnsignedTransaction::new(vec![bad], vec![output], None, 0),
            Err(TransactionError::InvalidTxid(_))
        ));
    }

    #[test]
    fn test_serialize_and_parse() {
        let tx = sample_tx();
        let script_sigs = vec![vec![0x00, 0x01], vec![]];
        let raw = tx.serialize(&script_sigs).unwrap();

        // version 1 little endian
        assert_eq!(&raw[..4], &[1, 0, 0, 0]);

        let decoded = RawTransaction::parse(&raw).unwrap();
        assert_eq!(decoded.version, TX_VERSION);
        assert_eq!(decoded.locktime, LOCKTIME);
        assert_eq!(decoded.inputs[1].prev_txid, "bb".repeat(32));
        assert_eq!(decoded.inputs.len(), 2);
        assert_eq!(decoded.inputs[0].prev_txid, "aa".repeat(32));
        assert_eq!(decoded.inputs[1].output_index, 7);
        assert_eq!(decoded.inputs[0].script_sig, vec![0x00, 0x01]);
        assert_eq!(decoded.inputs[0].sequence, SEQUENCE_FINAL);
        assert_eq!(decoded.outputs.len(), 3);
        assert_eq!(decoded.outputs[2].amount, 15_000);
        assert_eq!(
            decoded.outputs[2].script_pubkey,
            multisig_address().script_pubkey()
        );
        assert_eq!(decoded.total_output(), 75_000);
    }

    #[test]
    fn test_txid_is_reversed_double_sha() {
        let tx = sample_tx();
        let raw = tx.serialize(&[vec![], vec![]]).unwrap();
        let mut expected = crate::crypto::sha256(&crate::crypto::sha256(&raw));
        expected.reverse();
        assert_eq!(txid_of(&raw), hex::encode(expected));
    }

    #[test]
    fn test_outpoints_serialized_in_internal_order() {
        let mut txid = [0u8; 32];
        txid[0] = 0x01;
        let inputs = vec![Utxo::new(hex::encode(txid), 3, 10_000, 1)];
        let outputs = vec![TxOutput::new(recipient_address(0), 9_000)];
        let tx = UnsignedTransaction::new(inputs, outputs, None, 1_000).unwrap();
        let raw = tx.serialize(&[vec![]]).unwrap();

        // version, input count, then the reversed txid
        assert_eq!(raw[4], 1);
        assert_eq!(raw[5 + 31], 0x01);
        assert_eq!(&raw[37..41], &3u32.to_le_bytes());
    }

    #[test]
    fn test_signature_hash_depends_on_input() {
        let tx = sample_tx();
        let code = vec![0x51, 0xae];
        let h0 = tx.signature_hash(0, &code).unwrap();
        let h1 = tx.signature_hash(1, &code).unwrap();
        assert_ne!(h0, h1);
        assert_eq!(h0, tx.signature_hash(0, &code).unwrap());
        assert_eq!(
            tx.signature_hash(2, &code),
            Err(TransactionError::InputOutOfRange(2))
        );
    }

    #[test]
    fn test_serialize_script_sig_count_checked() {
        let tx = sample_tx();
        assert_eq!(
            tx.serialize(&[vec![]]),
            Err(TransactionError::ScriptSigCountMismatch {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_parse_rejects_truncated_and_trailing() {
        let tx = sample_tx();
        let raw = tx.serialize(&[vec![], vec![]]).unwrap();
        assert!(matches!(
            RawTransaction::parse(&raw[..raw.len() - 1]),
            Err(TransactionError::Decode(_))
        ));

        let mut extended = raw.clone();
        extended.push(0);
        assert!(matches!(
            RawTransaction::parse(&extended),
            Err(TransactionError::Decode(_))
        ));
    }

    #[test]
    fn test_varint() {
        for n in [0u64, 0xfc, 0xfd, 0xffff, 0x10000, 0x1_0000_0000] {
            assert_eq!(serialize(&VarInt(n)).len(), varint_size(n));
        }
    }

    #[test]
    fn test_utxo_deserializes_esplora_names() {
        let utxo: Utxo =
            serde_json::from_str(r#"{"txid":"ab","vout":2,"value":1000}"#).unwrap();
        assert_eq!(utxo.output_index, 2);
        assert_eq!(utxo.amount, 1000);
        assert_eq!(utxo.confirmations, 0);
        assert_eq!(utxo.outpoint(), "ab:2");
    }
}
