//! Script construction and parsing
//!
//! Covers the three script shapes a P2SH multisig treasury touches:
//! - locking scripts of the addresses it pays (P2PKH, P2SH)
//! - the bare `OP_CHECKMULTISIG` redeem script its address commits to
//! - the `OP_0 <sig>... <redeemScript>` unlocking script that spends it

use crate::crypto::{hash160, public_key_from_slice};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Opcodes
// =============================================================================

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// Sign all inputs and all outputs
pub const SIGHASH_ALL: u8 = 0x01;

/// Largest script that may be pushed as a P2SH redeem script
pub const MAX_REDEEM_SCRIPT_SIZE: usize = 520;

/// Upper bound of a DER signature plus its sighash byte
pub const MAX_SIGNATURE_SIZE: usize = 73;

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Malformed redeem script: {0}")]
    MalformedRedeemScript(String),
    #[error("Invalid public key at position {0}")]
    InvalidPublicKey(usize),
    #[error("Duplicate public key at position {0}")]
    DuplicatePublicKey(usize),
    #[error("Script too large: {0} bytes")]
    ScriptTooLarge(usize),
    #[error("Truncated push at offset {0}")]
    TruncatedPush(usize),
    #[error("Unexpected opcode {opcode:#04x} at offset {offset}")]
    UnexpectedOpcode { opcode: u8, offset: usize },
}

// =============================================================================
// Script Types
// =============================================================================

/// The type of locking script on an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    /// Pay to Public Key Hash
    P2PKH,
    /// Pay to Script Hash, the redeem script is revealed when spending
    P2SH,
}

impl ScriptType {
    /// Locking script for a 20-byte hash
    pub fn script_pubkey(&self, hash: &[u8; 20]) -> Vec<u8> {
        let mut script = Vec::with_capacity(self.estimated_size());
        match self {
            ScriptType::P2PKH => {
                script.extend_from_slice(&[OP_DUP, OP_HASH160]);
                push_data(&mut script, hash);
                script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            }
            ScriptType::P2SH => {
                script.push(OP_HASH160);
                push_data(&mut script, hash);
                script.push(OP_EQUAL);
            }
        }
        script
    }

    /// Get the script type name
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptType::P2PKH => "P2PKH",
            ScriptType::P2SH => "P2SH",
        }
    }

    /// Size of the locking script in bytes
    pub fn estimated_size(&self) -> usize {
        match self {
            ScriptType::P2PKH => 25, // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
            ScriptType::P2SH => 23,  // OP_HASH160 <20> OP_EQUAL
        }
    }
}

// =============================================================================
// Pushes
// =============================================================================

/// Append a minimal data push to a script
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Size of the push prefix for `len` bytes of data
pub fn push_prefix_size(len: usize) -> usize {
    if len < OP_PUSHDATA1 as usize {
        1
    } else if len <= 0xff {
        2
    } else {
        3
    }
}

/// Split a push-only script into its pushed items
///
/// `OP_0` yields an empty item. Any non-push opcode is rejected.
pub fn parse_pushes(script: &[u8]) -> Result<Vec<Vec<u8>>, ScriptError> {
    let mut items = Vec::new();
    let mut offset = 0;

    while offset < script.len() {
        let opcode = script[offset];
        let (len, header) = match opcode {
            OP_0 => (0, 1),
            1..=0x4b => (opcode as usize, 1),
            OP_PUSHDATA1 => {
                let len = *script
                    .get(offset + 1)
                    .ok_or(ScriptError::TruncatedPush(offset))?;
                (len as usize, 2)
            }
            OP_PUSHDATA2 => {
                let bytes = script
                    .get(offset + 1..offset + 3)
                    .ok_or(ScriptError::TruncatedPush(offset))?;
                (u16::from_le_bytes([bytes[0], bytes[1]]) as usize, 3)
            }
            _ => return Err(ScriptError::UnexpectedOpcode { opcode, offset }),
        };

        let start = offset + header;
        let data = script
            .get(start..start + len)
            .ok_or(ScriptError::TruncatedPush(offset))?;
        items.push(data.to_vec());
        offset = start + len;
    }

    Ok(items)
}

fn small_int(opcode: u8) -> Option<u8> {
    (OP_1..=OP_16).contains(&opcode).then(|| opcode - OP_1 + 1)
}

// =============================================================================
// Redeem Script
// =============================================================================

/// A bare M-of-N `OP_CHECKMULTISIG` script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemScript {
    bytes: Vec<u8>,
    threshold: u8,
    pubkeys: Vec<Vec<u8>>,
}

impl RedeemScript {
    /// Parse a hex-encoded redeem script
    pub fn from_hex(script_hex: &str) -> Result<Self, ScriptError> {
        let bytes = hex::decode(script_hex.trim())
            .map_err(|e| ScriptError::InvalidHex(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Parse `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ScriptError> {
        if bytes.len() > MAX_REDEEM_SCRIPT_SIZE {
            return Err(ScriptError::ScriptTooLarge(bytes.len()));
        }
        if bytes.len() < 3 {
            return Err(ScriptError::MalformedRedeemScript(
                "script too short".to_string(),
            ));
        }

        let threshold = small_int(bytes[0]).ok_or_else(|| {
            ScriptError::MalformedRedeemScript("must start with OP_1..OP_16".to_string())
        })?;

        if bytes[bytes.len() - 1] != OP_CHECKMULTISIG {
            return Err(ScriptError::MalformedRedeemScript(
                "must end with OP_CHECKMULTISIG".to_string(),
            ));
        }

        let total = small_int(bytes[bytes.len() - 2]).ok_or_else(|| {
            ScriptError::MalformedRedeemScript("missing OP_n before OP_CHECKMULTISIG".to_string())
        })?;

        let pubkeys = parse_pushes(&bytes[1..bytes.len() - 2])?;

        if pubkeys.len() != total as usize {
            return Err(ScriptError::MalformedRedeemScript(format!(
                "declares {} keys but contains {}",
                total,
                pubkeys.len()
            )));
        }
        if threshold > total {
            return Err(ScriptError::MalformedRedeemScript(format!(
                "threshold {} exceeds key count {}",
                threshold, total
            )));
        }

        for (i, pubkey) in pubkeys.iter().enumerate() {
            if !matches!(pubkey.len(), 33 | 65) || public_key_from_slice(pubkey).is_err() {
                return Err(ScriptError::InvalidPublicKey(i));
            }
            if pubkeys[..i].contains(pubkey) {
                return Err(ScriptError::DuplicatePublicKey(i));
            }
        }

        Ok(Self {
            bytes,
            threshold,
            pubkeys,
        })
    }

    /// Build a redeem script from a threshold and serialized public keys
    pub fn build(threshold: u8, pubkeys: &[Vec<u8>]) -> Result<Self, ScriptError> {
        if threshold == 0 || pubkeys.len() > 16 {
            return Err(ScriptError::MalformedRedeemScript(format!(
                "unsupported policy {}-of-{}",
                threshold,
                pubkeys.len()
            )));
        }

        let mut bytes = vec![OP_1 + threshold - 1];
        for pubkey in pubkeys {
            push_data(&mut bytes, pubkey);
        }
        bytes.push(OP_1 + pubkeys.len() as u8 - 1);
        bytes.push(OP_CHECKMULTISIG);

        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Required signatures (M)
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Serialized public keys in script order
    pub fn pubkeys(&self) -> &[Vec<u8>] {
        &self.pubkeys
    }

    /// Total signer count (N)
    pub fn signer_count(&self) -> usize {
        self.pubkeys.len()
    }

    /// Position of a public key in the script
    pub fn position(&self, pubkey: &[u8]) -> Option<usize> {
        self.pubkeys.iter().position(|pk| pk == pubkey)
    }

    /// HASH160 committed to by the P2SH address
    pub fn script_hash(&self) -> [u8; 20] {
        hash160(&self.bytes)
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.pubkeys.len())
    }

    /// Worst-case size of the unlocking script for this policy
    pub fn script_sig_size(&self) -> usize {
        1 + self.threshold as usize * (1 + MAX_SIGNATURE_SIZE)
            + push_prefix_size(self.bytes.len())
            + self.bytes.len()
    }

    /// Assemble `OP_0 <sig>... <redeemScript>`
    ///
    /// Signatures must already carry their sighash byte and be ordered by
    /// the position of their public keys in the script.
    pub fn script_sig(&self, signatures: &[Vec<u8>]) -> Vec<u8> {
        let mut script = vec![OP_0];
        for signature in signatures {
            push_data(&mut script, signature);
        }
        push_data(&mut script, &self.bytes);
        script
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::REDEEM_2_OF_3;

    #[test]
    fn test_parse_redeem_script() {
        let script = RedeemScript::from_hex(REDEEM_2_OF_3).unwrap();
        assert_eq!(script.threshold(), 2);
        assert_eq!(script.signer_count(), 3);
        assert_eq!(script.description(), "2-of-3");
        assert_eq!(script.as_bytes().len(), 105);
        assert_eq!(
            hex::encode(script.script_hash()),
            "15fc0754e73eb85d1cbce08786fadb7320ecb8dc"
        );
    }

    #[test]
    fn test_build_matches_parse() {
        let parsed = RedeemScript::from_hex(REDEEM_2_OF_3).unwrap();
        let built = RedeemScript::build(2, parsed.pubkeys()).unwrap();
        assert_eq!(built, parsed);
        assert_eq!(built.to_hex(), REDEEM_2_OF_3);
    }

    #[test]
    fn test_malformed_redeem_scripts() {
        assert!(RedeemScript::from_hex("zz").is_err());
        assert!(RedeemScript::from_hex("").is_err());

        // OP_CHECKSIG instead of OP_CHECKMULTISIG
        let mut bad_tail = REDEEM_2_OF_3.to_string();
        bad_tail.replace_range(bad_tail.len() - 2.., "ac");
        assert!(matches!(
            RedeemScript::from_hex(&bad_tail),
            Err(ScriptError::MalformedRedeemScript(_))
        ));

        // declares 4 keys but contains 3
        let mut bad_count = REDEEM_2_OF_3.to_string();
        bad_count.replace_range(bad_count.len() - 4..bad_count.len() - 2, "54");
        assert!(RedeemScript::from_hex(&bad_count).is_err());
    }

    #[test]
    fn test_threshold_above_key_count_rejected() {
        let parsed = RedeemScript::from_hex(REDEEM_2_OF_3).unwrap();
        assert!(RedeemScript::build(4, parsed.pubkeys()).is_err());
    }

    #[test]
    fn test_duplicate_and_invalid_keys_rejected() {
        let parsed = RedeemScript::from_hex(REDEEM_2_OF_3).unwrap();
        let dupes = vec![parsed.pubkeys()[0].clone(), parsed.pubkeys()[0].clone()];
        assert_eq!(
            RedeemScript::build(1, &dupes),
            Err(ScriptError::DuplicatePublicKey(1))
        );

        let garbage = vec![vec![0x05; 33], parsed.pubkeys()[1].clone()];
        assert_eq!(
            RedeemScript::build(1, &garbage),
            Err(ScriptError::InvalidPublicKey(0))
        );
    }

    #[test]
    fn test_script_sig_round_trip() {
        let redeem = RedeemScript::from_hex(REDEEM_2_OF_3).unwrap();
        let sigs = vec![vec![0x30; 71], vec![0x30; 72]];
        let script_sig = redeem.script_sig(&sigs);

        let items = parse_pushes(&script_sig).unwrap();
        assert_eq!(items.len(), 4);
        assert!(items[0].is_empty());
        assert_eq!(items[1], sigs[0]);
        assert_eq!(items[2], sigs[1]);
        assert_eq!(items[3], redeem.as_bytes());
        assert!(script_sig.len() <= redeem.script_sig_size());
    }

    #[test]
    fn test_parse_pushes_rejects_opcodes() {
        assert_eq!(
            parse_pushes(&[OP_0, OP_CHECKSIG]),
            Err(ScriptError::UnexpectedOpcode {
                opcode: OP_CHECKSIG,
                offset: 1
            })
        );
        assert_eq!(parse_pushes(&[0x05, 1, 2]), Err(ScriptError::TruncatedPush(0)));
    }

    #[test]
    fn test_push_data_prefixes() {
        let mut script = Vec::new();
        push_data(&mut script, &[0u8; 75]);
        assert_eq!(script[0], 75);

        let mut script = Vec::new();
        push_data(&mut script, &[0u8; 105]);
        assert_eq!(&script[..2], &[OP_PUSHDATA1, 105]);
        assert_eq!(push_prefix_size(105), 2);
    }

    #[test]
    fn test_script_size_estimation() {
        assert_eq!(ScriptType::P2PKH.estimated_size(), 25);
        assert_eq!(ScriptType::P2SH.estimated_size(), 23);
        assert_eq!(ScriptType::P2SH.script_pubkey(&[0u8; 20]).len(), 23);
        assert_eq!(ScriptType::P2PKH.type_name(), "P2PKH");
    }
}
