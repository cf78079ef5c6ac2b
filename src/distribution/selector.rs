//! UTXO selection
//!
//! Distributions spend the largest confirmed outputs first so a cycle
//! moves as much value as possible within the input cap. Consolidations
//! do the opposite and sweep the smallest outputs into one.

use crate::core::Utxo;
use crate::distribution::DistributionError;
use serde::Serialize;
use std::cmp::Ordering;

/// Inputs chosen for one cycle and how much of them may leave the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendPlan {
    selected: Vec<Utxo>,
    total_selected: u64,
    reserved_amount: u64,
    spendable_amount: u64,
}

impl SpendPlan {
    /// Fails when the reserve is larger than the selected inputs
    pub fn new(selected: Vec<Utxo>, reserved_amount: u64) -> Result<Self, DistributionError> {
        let total_selected: u64 = selected.iter().map(|u| u.amount).sum();
        let spendable_amount = total_selected.checked_sub(reserved_amount).ok_or_else(|| {
            DistributionError::InsufficientFunds(format!(
                "selected {} sats cannot cover a reserve of {} sats",
                total_selected, reserved_amount
            ))
        })?;

        Ok(Self {
            selected,
            total_selected,
            reserved_amount,
            spendable_amount,
        })
    }

    pub fn selected(&self) -> &[Utxo] {
        &self.selected
    }

    pub fn total_selected(&self) -> u64 {
        self.total_selected
    }

    /// Part of the selected value that must come back as change
    pub fn reserved_amount(&self) -> u64 {
        self.reserved_amount
    }

    pub fn spendable_amount(&self) -> u64 {
        self.spendable_amount
    }

    pub fn input_count(&self) -> usize {
        self.selected.len()
    }
}

/// Picks inputs from the wallet's UTXO set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtxoSelector {
    pub min_confirmations: u32,
    pub max_inputs: usize,
}

fn largest_first(a: &Utxo, b: &Utxo) -> Ordering {
    b.amount
        .cmp(&a.amount)
        .then_with(|| a.txid.cmp(&b.txid))
        .then_with(|| a.output_index.cmp(&b.output_index))
}

fn smallest_first(a: &Utxo, b: &Utxo) -> Ordering {
    a.amount
        .cmp(&b.amount)
        .then_with(|| a.txid.cmp(&b.txid))
        .then_with(|| a.output_index.cmp(&b.output_index))
}

impl UtxoSelector {
    pub fn new(min_confirmations: u32, max_inputs: usize) -> Self {
        Self {
            min_confirmations,
            max_inputs,
        }
    }

    /// Confirmed UTXOs, largest first
    pub fn eligible(&self, utxos: &[Utxo]) -> Vec<Utxo> {
        let mut eligible: Vec<Utxo> = utxos
            .iter()
            .filter(|u| u.confirmations >= self.min_confirmations)
            .cloned()
            .collect();
        eligible.sort_by(largest_first);
        eligible
    }

    /// Inputs for a distribution that leaves `reserve` in the wallet
    ///
    /// Whatever eligible balance stays unselected counts towards the
    /// reserve; only the rest has to come back as change.
    pub fn select(&self, utxos: &[Utxo], reserve: u64) -> Result<SpendPlan, DistributionError> {
        let eligible = self.eligible(utxos);
        let eligible_total: u64 = eligible.iter().map(|u| u.amount).sum();
        if eligible_total <= reserve {
            return Err(DistributionError::InsufficientFunds(format!(
                "{} confirmed UTXOs hold {} sats, reserve is {} sats",
                eligible.len(),
                eligible_total,
                reserve
            )));
        }

        let selected: Vec<Utxo> = eligible.into_iter().take(self.max_inputs).collect();
        let selected_total: u64 = selected.iter().map(|u| u.amount).sum();
        let unselected = eligible_total - selected_total;
        let reserved = reserve.saturating_sub(unselected);

        SpendPlan::new(selected, reserved)
    }

    /// The smallest UTXOs, at least two, to be merged into one output
    pub fn select_for_consolidation(&self, utxos: &[Utxo]) -> Result<SpendPlan, DistributionError> {
        let mut eligible: Vec<Utxo> = utxos
            .iter()
            .filter(|u| u.confirmations >= self.min_confirmations)
            .cloned()
            .collect();
        if eligible.len() < 2 || self.max_inputs < 2 {
            return Err(DistributionError::NothingToConsolidate(format!(
                "{} confirmed UTXOs, input cap {}",
                eligible.len(),
                self.max_inputs
            )));
        }

        eligible.sort_by(smallest_first);
        eligible.truncate(self.max_inputs);
        SpendPlan::new(eligible, 0)
    }
}
