//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 and HASH160 hashing
//! - Base58Check encoding
//! - ECDSA key management (secp256k1) with WIF import

pub mod base58;
pub mod hash;
pub mod keys;

pub use base58::{decode_check, encode_check, Base58Error};
pub use hash::{hash160, sha256};
pub use keys::{
    public_key_from_slice, serialize_public_key, sign_digest, verify_der_signature, KeyError,
    KeyPair,
};
