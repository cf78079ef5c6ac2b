//! Network parameters and Base58Check addresses
//!
//! Junkcoin uses Bitcoin's legacy address scheme with its own version bytes:
//! pay-to-pubkey-hash addresses start with '7', pay-to-script-hash addresses
//! with '3', and WIF keys with 'N'.

use crate::core::script::ScriptType;
use crate::crypto::{decode_check, encode_check, hash160, Base58Error};
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Address errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address cannot be empty")]
    Empty,
    #[error("Invalid address {address}: {source}")]
    Encoding {
        address: String,
        source: Base58Error,
    },
    #[error("Invalid address length for {0}")]
    InvalidLength(String),
    #[error("Unknown version byte {version} for address {address}")]
    UnknownVersion { address: String, version: u8 },
}

/// Version bytes of the target network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Network {
    pub p2pkh_version: u8,
    pub p2sh_version: u8,
    pub wif_version: u8,
}

impl Network {
    /// Junkcoin mainnet
    pub const JUNKCOIN: Network = Network {
        p2pkh_version: 16,
        p2sh_version: 5,
        wif_version: 0x90,
    };
}

impl Default for Network {
    fn default() -> Self {
        Self::JUNKCOIN
    }
}

/// A decoded address: its script type and 20-byte hash payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    encoded: String,
    script_type: ScriptType,
    hash: [u8; 20],
}

impl Address {
    /// Parse and validate an address for the given network
    pub fn parse(address: &str, network: &Network) -> Result<Self, AddressError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AddressError::Empty);
        }

        let payload = decode_check(address).map_err(|source| AddressError::Encoding {
            address: address.to_string(),
            source,
        })?;

        if payload.len() != 21 {
            return Err(AddressError::InvalidLength(address.to_string()));
        }

        let script_type = if payload[0] == network.p2pkh_version {
            ScriptType::P2PKH
        } else if payload[0] == network.p2sh_version {
            ScriptType::P2SH
        } else {
            return Err(AddressError::UnknownVersion {
                address: address.to_string(),
                version: payload[0],
            });
        };

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);

        Ok(Self {
            encoded: address.to_string(),
            script_type,
            hash,
        })
    }

    /// P2SH address committing to a script
    pub fn p2sh(script: &[u8], network: &Network) -> Self {
        Self::from_hash(ScriptType::P2SH, hash160(script), network)
    }

    /// P2PKH address for a serialized public key
    pub fn p2pkh(public_key: &[u8], network: &Network) -> Self {
        Self::from_hash(ScriptType::P2PKH, hash160(public_key), network)
    }

    fn from_hash(script_type: ScriptType, hash: [u8; 20], network: &Network) -> Self {
        let version = match script_type {
            ScriptType::P2PKH => network.p2pkh_version,
            ScriptType::P2SH => network.p2sh_version,
        };
        let mut payload = vec![version];
        payload.extend_from_slice(&hash);

        Self {
            encoded: encode_check(&payload),
            script_type,
            hash,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// The locking script paying to this address
    pub fn script_pubkey(&self) -> Vec<u8> {
        self.script_type.script_pubkey(&self.hash)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}
