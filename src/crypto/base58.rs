//! Base58Check encoding
//!
//! `payload || first 4 bytes of SHA256d(payload)`, base58 encoded.

use thiserror::Error;

/// Base58Check decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Base58Error {
    #[error("Invalid base58 string: {0}")]
    InvalidEncoding(String),
    #[error("Payload too short")]
    TooShort,
    #[error("Checksum mismatch")]
    ChecksumMismatch,
}

/// Encode a payload with a 4-byte checksum suffix
pub fn encode_check(payload: &[u8]) -> String {
    bs58::encode(payload).with_check().into_string()
}

/// Decode a Base58Check string and strip the checksum
pub fn decode_check(encoded: &str) -> Result<Vec<u8>, Base58Error> {
    let data = bs58::decode(encoded)
        .with_check(None)
        .into_vec()
        .map_err(|e| match e {
            bs58::decode::Error::InvalidChecksum { .. } => Base58Error::ChecksumMismatch,
            bs58::decode::Error::NoChecksum => Base58Error::TooShort,
            other => Base58Error::InvalidEncoding(other.to_string()),
        })?;

    if data.is_empty() {
        return Err(Base58Error::TooShort);
    }
    Ok(data)
}
