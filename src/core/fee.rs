//! Fee estimation
//!
//! Fees come from a byte-size model of the transaction rather than from
//! the serialized bytes, so they can be fixed before anything is signed:
//! - `size = overhead + inputs × input_size + outputs × output_size`
//! - a 10% safety buffer on top of the size
//! - `fee = max(size × rate, min_relay_fee)`, refused above a ceiling

use crate::core::script::RedeemScript;
use crate::core::transaction::varint_size;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Version, locktime and the two count varints
pub const TX_OVERHEAD: usize = 10;

/// Amount, script length and a P2PKH locking script
pub const OUTPUT_SIZE: usize = 34;

/// Safety margin added to every size estimate
pub const SIZE_BUFFER_PERCENT: usize = 10;

/// Default fee rate (sat/byte)
pub const DEFAULT_FEE_RATE: u64 = 100;

/// Default minimum fee per transaction
pub const DEFAULT_MIN_RELAY_FEE: u64 = 1_000;

/// Default fee ceiling per transaction
pub const DEFAULT_MAX_FEE: u64 = 10_000_000;

/// Fee errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Estimated fee {fee} exceeds budget of {max}")]
    ExceedsBudget { fee: u64, max: u64 },
}

// =============================================================================
// Fee Rate
// =============================================================================

/// Fee rate in satoshis per byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate(pub u64);

impl FeeRate {
    /// Create from satoshis per byte
    pub fn from_sat_per_byte(rate: u64) -> Self {
        Self(rate)
    }

    /// Calculate fee for a given size
    pub fn fee_for_size(&self, size_bytes: usize) -> u64 {
        self.0.saturating_mul(size_bytes as u64)
    }

    /// Get rate as satoshis per byte
    pub fn as_sat_per_byte(&self) -> u64 {
        self.0
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(DEFAULT_FEE_RATE)
    }
}

// =============================================================================
// Size Model
// =============================================================================

/// Byte-size model of a multisig spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeModel {
    pub overhead: usize,
    pub input_size: usize,
    pub output_size: usize,
}

impl SizeModel {
    /// Worst-case input size for spending outputs locked by `redeem`
    ///
    /// Outpoint and sequence, the scriptSig length varint, and a scriptSig
    /// holding M maximum-length signatures plus the pushed redeem script.
    pub fn for_redeem_script(redeem: &RedeemScript) -> Self {
        let script_sig = redeem.script_sig_size();
        Self {
            overhead: TX_OVERHEAD,
            input_size: 32 + 4 + varint_size(script_sig as u64) + script_sig + 4,
            output_size: OUTPUT_SIZE,
        }
    }

    /// Estimated size in bytes including the safety buffer
    pub fn estimate(&self, inputs: usize, outputs: usize) -> usize {
        let raw = self.overhead + inputs * self.input_size + outputs * self.output_size;
        raw + (raw * SIZE_BUFFER_PERCENT).div_ceil(100)
    }
}

// =============================================================================
// Fee Policy
// =============================================================================

/// Fee rate, floor and ceiling applied to every built transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeePolicy {
    pub rate: FeeRate,
    pub min_relay_fee: u64,
    pub max_fee: u64,
    pub size_model: SizeModel,
}

impl FeePolicy {
    pub fn new(rate: FeeRate, min_relay_fee: u64, max_fee: u64, size_model: SizeModel) -> Self {
        Self {
            rate,
            min_relay_fee,
            max_fee,
            size_model,
        }
    }

    /// Fee for a transaction of the given shape
    pub fn estimate(&self, inputs: usize, outputs: usize) -> u64 {
        let size = self.size_model.estimate(inputs, outputs);
        self.rate.fee_for_size(size).max(self.min_relay_fee)
    }

    /// Estimate and enforce the ceiling
    pub fn checked_estimate(&self, inputs: usize, outputs: usize) -> Result<u64, FeeError> {
        self.check_budget(self.estimate(inputs, outputs))
    }

    /// Reject a fee above the ceiling
    pub fn check_budget(&self, fee: u64) -> Result<u64, FeeError> {
        if fee > self.max_fee {
            return Err(FeeError::ExceedsBudget {
                fee,
                max: self.max_fee,
            });
        }
        Ok(fee)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::redeem_script;

    fn policy() -> FeePolicy {
        FeePolicy::new(
            FeeRate::from_sat_per_byte(100),
            DEFAULT_MIN_RELAY_FEE,
            DEFAULT_MAX_FEE,
            SizeModel::for_redeem_script(&redeem_script()),
        )
    }

    #[test]
    fn test_fee_rate() {
        let rate = FeeRate::from_sat_per_byte(10);
        assert_eq!(rate.fee_for_size(250), 2500);
        assert_eq!(rate.fee_for_size(usize::MAX), u64::MAX);
    }

    #[test]
    fn test_two_of_three_input_size() {
        let model = SizeModel::for_redeem_script(&redeem_script());
        // 1 + 2 × 74 + 2 + 105 = 256 byte scriptSig, 3 byte varint
        assert_eq!(model.input_size, 299);
        assert_eq!(model.output_size, OUTPUT_SIZE);
    }

    #[test]
    fn test_size_includes_buffer() {
        let model = SizeModel::for_redeem_script(&redeem_script());
        // 10 + 299 + 4 × 34 = 445, plus 45
        assert_eq!(model.estimate(1, 4), 490);
    }

    #[test]
    fn test_fee_estimate() {
        let policy = policy();
        assert_eq!(policy.estimate(1, 4), 49_000);
        assert!(policy.estimate(2, 4) > policy.estimate(1, 4));
        assert!(policy.estimate(1, 5) > policy.estimate(1, 4));
    }

    #[test]
    fn test_min_relay_fee_floor() {
        let mut policy = policy();
        policy.rate = FeeRate::from_sat_per_byte(1);
        assert_eq!(policy.estimate(1, 1), DEFAULT_MIN_RELAY_FEE);
    }

    #[test]
    fn test_fee_ceiling() {
        let mut policy = policy();
        policy.max_fee = 10_000;
        assert_eq!(
            policy.checked_estimate(1, 4),
            Err(FeeError::ExceedsBudget {
                fee: 49_000,
                max: 10_000
            })
        );
        policy.max_fee = 49_000;
        assert_eq!(policy.checked_estimate(1, 4), Ok(49_000));
    }
}
