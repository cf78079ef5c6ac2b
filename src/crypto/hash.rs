//! Hashing primitives used by addresses and scripts
//!
//! HASH160 (RIPEMD-160 of SHA-256) commits to public keys and redeem
//! scripts.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes RIPEMD-160 of the SHA-256 of the input
///
/// This is the 20-byte payload of P2PKH and P2SH addresses.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256(data));
    ripemd.finalize().into()
}
