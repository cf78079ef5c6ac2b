//! Splitting a distributed amount between recipients

use crate::config::Recipient;
use crate::core::{Address, TxOutput};
use crate::distribution::DistributionError;
use serde::Serialize;

/// One recipient's share
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub label: String,
    pub address: Address,
    pub percent: u32,
    pub amount: u64,
}

/// Per-recipient amounts, in configuration order, summing to `total`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationTable {
    entries: Vec<Allocation>,
    total: u64,
}

impl AllocationTable {
    pub fn entries(&self) -> &[Allocation] {
        &self.entries
    }

    /// The distributed amount
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One output per recipient
    pub fn to_outputs(&self) -> Vec<TxOutput> {
        self.entries
            .iter()
            .map(|e| TxOutput::new(e.address.clone(), e.amount))
            .collect()
    }
}

/// Applies the percentage table and the per-recipient floors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationCalculator {
    pub min_recipient_amount: u64,
    pub dust_threshold: u64,
}

impl AllocationCalculator {
    pub fn new(min_recipient_amount: u64, dust_threshold: u64) -> Self {
        Self {
            min_recipient_amount,
            dust_threshold,
        }
    }

    /// `floor(amount × percent / 100)` each, remainder to the first recipient
    pub fn allocate(
        &self,
        amount: u64,
        recipients: &[Recipient],
    ) -> Result<AllocationTable, DistributionError> {
        if recipients.is_empty() {
            return Err(DistributionError::ValidationFailed(
                "no recipients configured".to_string(),
            ));
        }
        let percent_total: u64 = recipients.iter().map(|r| u64::from(r.percent)).sum();
        if percent_total != 100 {
            return Err(DistributionError::ValidationFailed(format!(
                "recipient shares sum to {}",
                percent_total
            )));
        }

        let mut entries: Vec<Allocation> = recipients
            .iter()
            .map(|r| Allocation {
                label: r.label.clone(),
                address: r.address.clone(),
                percent: r.percent,
                amount: (amount as u128 * r.percent as u128 / 100) as u64,
            })
            .collect();

        let allocated: u64 = entries.iter().map(|e| e.amount).sum();
        entries[0].amount += amount - allocated;

        let floor = self.min_recipient_amount.max(self.dust_threshold);
        if let Some(short) = entries.iter().find(|e| e.amount < floor) {
            return Err(DistributionError::BelowMinimumDistribution(format!(
                "{} would receive {} sats, minimum is {}",
                short.label, short.amount, floor
            )));
        }

        Ok(AllocationTable {
            entries,
            total: amount,
        })
    }
}
