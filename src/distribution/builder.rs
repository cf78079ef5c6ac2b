//! Unsigned transaction construction
//!
//! Three shapes are built from a `SpendPlan`:
//! - sendmany: one transaction paying every recipient, change to the wallet
//! - sequential: one transaction per recipient, inputs picked greedily
//! - consolidation: every selected input merged into one wallet output
//!
//! Change below the dust threshold is never created; it is added to the fee
//! instead, and the recorded fee always equals inputs minus outputs.

use crate::core::{Address, FeePolicy, TxOutput, UnsignedTransaction, Utxo};
use crate::distribution::allocation::AllocationTable;
use crate::distribution::selector::SpendPlan;
use crate::distribution::DistributionError;
use log::debug;
use serde::Serialize;
use std::collections::VecDeque;

/// How recipients are paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildMode {
    SendMany,
    Sequential,
}

/// Builds unsigned transactions paying change back to the multisig address
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    fee_policy: FeePolicy,
    dust_threshold: u64,
    change_address: Address,
}

impl TransactionBuilder {
    pub fn new(fee_policy: FeePolicy, dust_threshold: u64, change_address: Address) -> Self {
        Self {
            fee_policy,
            dust_threshold,
            change_address,
        }
    }

    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fee_policy
    }

    /// Change that must come back: the reserve, raised to the dust threshold
    fn change_target(&self, plan: &SpendPlan) -> u64 {
        match plan.reserved_amount() {
            0 => 0,
            reserved => reserved.max(self.dust_threshold),
        }
    }

    /// Fees set aside before splitting the spendable amount
    pub fn fee_budget(&self, plan: &SpendPlan, recipients: usize, mode: BuildMode) -> u64 {
        let inputs = plan.input_count();
        match mode {
            BuildMode::SendMany => {
                let change = usize::from(plan.reserved_amount() > 0);
                self.fee_policy.estimate(inputs, recipients + change)
            }
            BuildMode::Sequential => {
                (recipients as u64).saturating_mul(self.fee_policy.estimate(inputs, 2))
            }
        }
    }

    /// Amount the recipients share once fees and change are set aside
    pub fn distributable(&self, plan: &SpendPlan, recipients: usize, mode: BuildMode) -> u64 {
        plan.total_selected()
            .saturating_sub(self.change_target(plan))
            .saturating_sub(self.fee_budget(plan, recipients, mode))
    }

    pub fn build(
        &self,
        plan: &SpendPlan,
        allocation: &AllocationTable,
        mode: BuildMode,
    ) -> Result<Vec<UnsignedTransaction>, DistributionError> {
        match mode {
            BuildMode::SendMany => Ok(vec![self.build_sendmany(plan, allocation)?]),
            BuildMode::Sequential => self.build_sequential(plan, allocation),
        }
    }

    /// One transaction, one output per recipient
    pub fn build_sendmany(
        &self,
        plan: &SpendPlan,
        allocation: &AllocationTable,
    ) -> Result<UnsignedTransaction, DistributionError> {
        let change_outputs = usize::from(plan.reserved_amount() > 0);
        let fee = self
            .fee_policy
            .checked_estimate(plan.input_count(), allocation.len() + change_outputs)?;

        let change = plan
            .total_selected()
            .checked_sub(allocation.total())
            .and_then(|left| left.checked_sub(fee))
            .ok_or_else(|| {
                DistributionError::InsufficientFunds(format!(
                    "{} sats of inputs cannot pay {} sats plus a {} sat fee",
                    plan.total_selected(),
                    allocation.total(),
                    fee
                ))
            })?;
        if change < plan.reserved_amount() {
            return Err(DistributionError::ValidationFailed(format!(
                "change of {} sats would dip into the {} sat reserve",
                change,
                plan.reserved_amount()
            )));
        }

        self.finish(plan.selected().to_vec(), allocation.to_outputs(), change, fee)
    }

    /// One transaction per recipient
    ///
    /// Each takes the largest unused inputs until it covers its amount and
    /// its own fee; change of each goes back to the wallet.
    pub fn build_sequential(
        &self,
        plan: &SpendPlan,
        allocation: &AllocationTable,
    ) -> Result<Vec<UnsignedTransaction>, DistributionError> {
        let mut sorted: Vec<Utxo> = plan.selected().to_vec();
        sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
        let mut unused = VecDeque::from(sorted);
        let mut transactions = Vec::with_capacity(allocation.len());

        for entry in allocation.entries() {
            let mut inputs = Vec::new();
            let mut total = 0u64;
            let mut fee = 0u64;

            while let Some(next) = unused.pop_front() {
                total += next.amount;
                inputs.push(next);
                fee = self.fee_policy.estimate(inputs.len(), 2);
                if total >= entry.amount + fee {
                    break;
                }
            }
            if total < entry.amount + fee {
                return Err(DistributionError::InsufficientFunds(format!(
                    "inputs ran out before paying {} ({} sats)",
                    entry.label, entry.amount
                )));
            }

            let fee = self.fee_policy.checked_estimate(inputs.len(), 2)?;
            let change = total - entry.amount - fee;
            let output = TxOutput::new(entry.address.clone(), entry.amount);
            transactions.push(self.finish(inputs, vec![output], change, fee)?);
        }

        let spent: u64 = transactions
            .iter()
            .map(|tx| tx.total_input() - tx.change_output().map_or(0, |c| c.amount))
            .sum();
        let kept = plan.total_selected() - spent;
        if kept < plan.reserved_amount() {
            return Err(DistributionError::ValidationFailed(format!(
                "sequential transactions keep {} sats, reserve needs {}",
                kept,
                plan.reserved_amount()
            )));
        }

        Ok(transactions)
    }

    /// Merge every selected input into one output back to the wallet
    pub fn build_consolidation(
        &self,
        plan: &SpendPlan,
    ) -> Result<UnsignedTransaction, DistributionError> {
        let fee = self.fee_policy.checked_estimate(plan.input_count(), 1)?;
        let amount = plan.total_selected().saturating_sub(fee);
        if amount < self.dust_threshold {
            return Err(DistributionError::NothingToConsolidate(format!(
                "{} inputs worth {} sats do not cover a {} sat fee",
                plan.input_count(),
                plan.total_selected(),
                fee
            )));
        }

        let output = TxOutput::new(self.change_address.clone(), amount);
        Ok(UnsignedTransaction::new(
            plan.selected().to_vec(),
            Vec::new(),
            Some(output),
            fee,
        )?)
    }

    fn finish(
        &self,
        inputs: Vec<Utxo>,
        outputs: Vec<TxOutput>,
        change: u64,
        fee: u64,
    ) -> Result<UnsignedTransaction, DistributionError> {
        let (change_output, fee) = if change >= self.dust_threshold {
            (Some(TxOutput::new(self.change_address.clone(), change)), fee)
        } else {
            if change > 0 {
                debug!("Folding {} sats of dust change into the fee", change);
            }
            (None, self.fee_policy.check_budget(fee + change)?)
        };

        Ok(UnsignedTransaction::new(inputs, outputs, change_output, fee)?)
    }
}
