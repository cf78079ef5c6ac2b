//! ECDSA key management for multisig signers
//!
//! Signer keys arrive as WIF strings. Signatures are produced over
//! 32-byte signature hashes and serialized in DER form, which is what
//! `OP_CHECKMULTISIG` consumes.

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;
use thiserror::Error;

use super::base58::{decode_check, Base58Error};

/// Flag byte appended to WIF payloads of compressed keys
const WIF_COMPRESSED_FLAG: u8 = 0x01;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid WIF: {0}")]
    InvalidWif(String),
    #[error("WIF version byte {found:#04x} does not match network {expected:#04x}")]
    WrongWifVersion { expected: u8, found: u8 },
    #[error("Base58 error: {0}")]
    Base58(#[from] Base58Error),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    /// Whether the public key is committed to in compressed form
    pub compressed: bool,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
            compressed: true,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey, compressed: bool) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
            compressed,
        }
    }

    /// Decode a WIF private key for the given network version byte
    ///
    /// Accepts the 33-byte (uncompressed) and 34-byte (compressed) payloads.
    pub fn from_wif(wif: &str, version: u8) -> Result<Self, KeyError> {
        let payload = decode_check(wif)?;

        let compressed = match payload.len() {
            33 => false,
            34 if payload[33] == WIF_COMPRESSED_FLAG => true,
            34 => {
                return Err(KeyError::InvalidWif(
                    "unknown compression flag".to_string(),
                ))
            }
            n => {
                return Err(KeyError::InvalidWif(format!(
                    "payload is {} bytes, expected 33 or 34",
                    n
                )))
            }
        };

        if payload[0] != version {
            return Err(KeyError::WrongWifVersion {
                expected: version,
                found: payload[0],
            });
        }

        let secret_key =
            SecretKey::from_slice(&payload[1..33]).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key, compressed))
    }

    /// Serialized public key, in the form the redeem script commits to
    pub fn public_key_bytes(&self) -> Vec<u8> {
        serialize_public_key(&self.public_key, self.compressed)
    }

    /// Get the public key as a hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Sign a 32-byte digest, returning a DER encoded signature
    ///
    /// Nonces are derived per RFC 6979, so signing is deterministic.
    pub fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        sign_digest(&self.secret_key, digest)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Serialize a public key in compressed (33 byte) or uncompressed (65 byte) form
pub fn serialize_public_key(public_key: &PublicKey, compressed: bool) -> Vec<u8> {
    if compressed {
        public_key.serialize().to_vec()
    } else {
        public_key.serialize_uncompressed().to_vec()
    }
}

/// Parse a public key from raw bytes
pub fn public_key_from_slice(bytes: &[u8]) -> Result<PublicKey, KeyError> {
    PublicKey::from_slice(bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Sign a digest with a secret key, DER encoded
pub fn sign_digest(secret_key: &SecretKey, digest: &[u8; 32]) -> Vec<u8> {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*digest);
    let signature = secp.sign_ecdsa(&message, secret_key);
    signature.serialize_der().to_vec()
}

/// Verify a DER signature against a public key and digest
pub fn verify_der_signature(
    public_key: &PublicKey,
    digest: &[u8; 32],
    der: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*digest);
    let signature = Signature::from_der(der).map_err(|_| KeyError::InvalidSignature)?;

    match secp.verify_ecdsa(&message, &signature, public_key) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}
