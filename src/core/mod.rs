//! Core chain primitives
//!
//! This module contains the building blocks every distribution is made of:
//! - Network parameters and Base58Check addresses
//! - Script system (P2PKH, P2SH, bare multisig redeem scripts)
//! - Legacy transaction encoding, txids and signature hashes
//! - Fee estimation

pub mod address;
pub mod fee;
pub mod script;
pub mod transaction;

pub use address::{Address, AddressError, Network};
pub use fee::{FeeError, FeePolicy, FeeRate, SizeModel};
pub use script::{RedeemScript, ScriptError, ScriptType};
pub use transaction::{
    txid_of, RawTransaction, TransactionError, TxOutput, UnsignedTransaction, Utxo, MAX_TX_SIZE,
};
