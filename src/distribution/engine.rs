//! Distribution cycles
//!
//! Every cycle walks the same states:
//!
//! ```text
//! Idle -> Checking -> Planning -> Building -> Signing -> Validating
//!      -> Broadcasting -> Committed
//! ```
//!
//! and drops to `Aborted` from wherever a check fails. A dry run stops after
//! `Validating`. The emergency gate is consulted again right before
//! `Broadcasting`, so an operator stop wins over a cycle already in flight.

use crate::backend::{Broadcaster, RetryPolicy, UtxoSource};
use crate::config::{AddressBook, DistributionSettings};
use crate::core::{FeePolicy, FeeRate, SizeModel, UnsignedTransaction, Utxo, MAX_TX_SIZE};
use crate::distribution::allocation::{AllocationCalculator, AllocationTable};
use crate::distribution::builder::{BuildMode, TransactionBuilder};
use crate::distribution::selector::{SpendPlan, UtxoSelector};
use crate::distribution::{DistributionError, ErrorClass};
use crate::monitor::{EmergencyGate, Sleeper, ThreadSleeper};
use crate::multisig::SignedTransaction;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

// =============================================================================
// Types
// =============================================================================

/// Whether a cycle may broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunMode {
    DryRun,
    Execute,
}

/// What a cycle does with the funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleKind {
    Distribution,
    Consolidation,
}

/// Engine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Checking,
    Planning,
    Building,
    Signing,
    Validating,
    Broadcasting,
    Committed,
    Aborted,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-run switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Skip the balance and UTXO-count thresholds; the reserve still holds
    pub bypass_thresholds: bool,
}

impl RunOptions {
    pub fn dry_run() -> Self {
        Self {
            mode: RunMode::DryRun,
            bypass_thresholds: false,
        }
    }

    pub fn execute() -> Self {
        Self {
            mode: RunMode::Execute,
            bypass_thresholds: false,
        }
    }
}

/// Wallet UTXOs and confirmed balance at the start of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSnapshot {
    pub utxos: Vec<Utxo>,
    pub balance: u64,
}

impl WalletSnapshot {
    pub fn utxo_count(&self) -> usize {
        self.utxos.len()
    }
}

/// What a cycle built and, unless dry, broadcast
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub kind: CycleKind,
    pub mode: RunMode,
    pub balance: u64,
    pub utxo_count: usize,
    pub plan: SpendPlan,
    pub allocation: Option<AllocationTable>,
    pub transactions: Vec<SignedTransaction>,
    pub fee_total: u64,
    /// Txids reported by the broadcaster, or computed locally for a dry run
    pub txids: Vec<String>,
}

/// Result of a cycle plus the states it passed through
#[derive(Debug)]
pub struct Outcome {
    pub trace: Vec<EngineState>,
    pub result: Result<Report, DistributionError>,
}

impl Outcome {
    pub fn final_state(&self) -> EngineState {
        self.trace.last().copied().unwrap_or(EngineState::Idle)
    }

    pub fn is_committed(&self) -> bool {
        self.final_state() == EngineState::Committed
    }
}

struct Trace(Vec<EngineState>);

impl Trace {
    fn new() -> Self {
        Self(vec![EngineState::Idle])
    }

    fn enter(&mut self, state: EngineState) {
        if let Some(from) = self.0.last() {
            debug!("Engine: {} -> {}", from, state);
        }
        self.0.push(state);
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Runs distribution and consolidation cycles for one address book
pub struct DistributionEngine<'a> {
    book: &'a AddressBook,
    settings: &'a DistributionSettings,
    source: &'a dyn UtxoSource,
    broadcaster: &'a dyn Broadcaster,
    gate: &'a dyn EmergencyGate,
    sleeper: &'a dyn Sleeper,
    retry: RetryPolicy,
    selector: UtxoSelector,
    calculator: AllocationCalculator,
    builder: TransactionBuilder,
}

impl<'a> DistributionEngine<'a> {
    pub fn new(
        book: &'a AddressBook,
        settings: &'a DistributionSettings,
        source: &'a dyn UtxoSource,
        broadcaster: &'a dyn Broadcaster,
        gate: &'a dyn EmergencyGate,
    ) -> Self {
        let fee_policy = FeePolicy::new(
            FeeRate::from_sat_per_byte(settings.fee_rate),
            settings.min_relay_fee,
            settings.max_fee,
            SizeModel::for_redeem_script(book.wallet().redeem_script()),
        );

        Self {
            book,
            settings,
            source,
            broadcaster,
            gate,
            sleeper: &ThreadSleeper,
            retry: RetryPolicy::none(),
            selector: UtxoSelector::new(settings.min_confirmations, settings.max_inputs),
            calculator: AllocationCalculator::new(
                settings.min_recipient_amount,
                settings.dust_threshold,
            ),
            builder: TransactionBuilder::new(
                fee_policy,
                settings.dust_threshold,
                book.multisig_address().clone(),
            ),
        }
    }

    /// Retry network calls with backoff, sleeping on `sleeper`
    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    fn build_mode(&self) -> BuildMode {
        if self.settings.use_sendmany {
            BuildMode::SendMany
        } else {
            BuildMode::Sequential
        }
    }

    /// Fetch UTXOs and balance of the multisig address
    pub fn snapshot(&self) -> Result<WalletSnapshot, DistributionError> {
        let address = self.book.multisig_address().as_str();
        let utxos = self
            .retry
            .run(self.sleeper, "UTXO fetch", || self.source.get_utxos(address))?;
        let balance = self
            .retry
            .run(self.sleeper, "balance fetch", || {
                self.source.get_balance(address)
            })?
            .confirmed();

        debug!("{}: {} UTXOs, {} sats", address, utxos.len(), balance);
        Ok(WalletSnapshot { utxos, balance })
    }

    /// Balance and UTXO thresholds, then the reserve
    pub fn check_thresholds(
        &self,
        snapshot: &WalletSnapshot,
        bypass_thresholds: bool,
    ) -> Result<(), DistributionError> {
        let s = self.settings;
        if bypass_thresholds {
            info!("Balance and UTXO thresholds bypassed");
        } else {
            if snapshot.utxo_count() < s.threshold_utxo {
                return Err(DistributionError::InsufficientFunds(format!(
                    "{} UTXOs, threshold is {}",
                    snapshot.utxo_count(),
                    s.threshold_utxo
                )));
            }
            if snapshot.balance < s.threshold_balance {
                return Err(DistributionError::InsufficientFunds(format!(
                    "balance {} sats below threshold of {} sats",
                    snapshot.balance, s.threshold_balance
                )));
            }
        }

        let floor = s.minimum_balance.saturating_add(s.min_distribution_amount);
        if snapshot.balance <= floor {
            return Err(DistributionError::InsufficientFunds(format!(
                "balance {} sats does not exceed reserve {} plus minimum distribution {}",
                snapshot.balance, s.minimum_balance, s.min_distribution_amount
            )));
        }
        Ok(())
    }

    /// Run one distribution cycle
    pub fn run_distribution(&self, options: RunOptions) -> Outcome {
        let mut trace = Trace::new();
        let result = self.distribute(&mut trace, options);
        self.conclude(CycleKind::Distribution, trace, result)
    }

    /// Run one consolidation cycle if more than `utxo_trigger` UTXOs exist
    pub fn run_consolidation(&self, mode: RunMode, utxo_trigger: usize) -> Outcome {
        let mut trace = Trace::new();
        let result = self.consolidate(&mut trace, mode, utxo_trigger);
        self.conclude(CycleKind::Consolidation, trace, result)
    }

    fn conclude(
        &self,
        kind: CycleKind,
        mut trace: Trace,
        result: Result<Report, DistributionError>,
    ) -> Outcome {
        if let Err(e) = &result {
            let at = trace.0.last().copied().unwrap_or(EngineState::Idle);
            trace.enter(EngineState::Aborted);
            match e.class() {
                ErrorClass::Skip => info!("{:?} skipped at {}: {}", kind, at, e),
                ErrorClass::Transient => warn!("{:?} aborted at {}: {}", kind, at, e),
                ErrorClass::PolicyAbort | ErrorClass::Fatal => {
                    error!("{:?} aborted at {}: {}", kind, at, e)
                }
            }
        }
        Outcome {
            trace: trace.0,
            result,
        }
    }

    fn distribute(
        &self,
        trace: &mut Trace,
        options: RunOptions,
    ) -> Result<Report, DistributionError> {
        trace.enter(EngineState::Checking);
        let snapshot = self.checked_snapshot(options.mode)?;
        self.check_thresholds(&snapshot, options.bypass_thresholds)?;

        trace.enter(EngineState::Planning);
        let plan = self
            .selector
            .select(&snapshot.utxos, self.settings.minimum_balance)?;
        let mode = self.build_mode();
        let amount = self
            .builder
            .distributable(&plan, self.book.recipients().len(), mode);
        let allocation = self.calculator.allocate(amount, self.book.recipients())?;
        info!(
            "Distributing {} sats from {} inputs ({} sats reserved, {} sat/byte)",
            allocation.total(),
            plan.input_count(),
            plan.reserved_amount(),
            self.builder.fee_policy().rate.as_sat_per_byte()
        );

        trace.enter(EngineState::Building);
        let unsigned = self.builder.build(&plan, &allocation, mode)?;

        trace.enter(EngineState::Signing);
        let signed = self.sign_all(&unsigned)?;

        trace.enter(EngineState::Validating);
        self.validate_distribution(&plan, &allocation, &unsigned, &signed)?;

        let report = Report {
            kind: CycleKind::Distribution,
            mode: options.mode,
            balance: snapshot.balance,
            utxo_count: snapshot.utxo_count(),
            fee_total: unsigned.iter().map(|tx| tx.estimated_fee()).sum(),
            txids: signed.iter().map(|tx| tx.txid().to_string()).collect(),
            plan,
            allocation: Some(allocation),
            transactions: signed,
        };
        self.broadcast(trace, report)
    }

    fn consolidate(
        &self,
        trace: &mut Trace,
        mode: RunMode,
        utxo_trigger: usize,
    ) -> Result<Report, DistributionError> {
        trace.enter(EngineState::Checking);
        let snapshot = self.checked_snapshot(mode)?;
        if snapshot.utxo_count() <= utxo_trigger {
            return Err(DistributionError::NothingToConsolidate(format!(
                "{} UTXOs, consolidating above {}",
                snapshot.utxo_count(),
                utxo_trigger
            )));
        }

        trace.enter(EngineState::Planning);
        let plan = self.selector.select_for_consolidation(&snapshot.utxos)?;
        info!(
            "Consolidating {} of {} UTXOs ({} sats)",
            plan.input_count(),
            snapshot.utxo_count(),
            plan.total_selected()
        );

        trace.enter(EngineState::Building);
        let unsigned = vec![self.builder.build_consolidation(&plan)?];

        trace.enter(EngineState::Signing);
        let signed = self.sign_all(&unsigned)?;

        trace.enter(EngineState::Validating);
        if !unsigned[0].outputs().is_empty() {
            return Err(DistributionError::ValidationFailed(
                "consolidation pays an outside address".to_string(),
            ));
        }
        self.validate_common(&plan, &unsigned, &signed)?;

        let report = Report {
            kind: CycleKind::Consolidation,
            mode,
            balance: snapshot.balance,
            utxo_count: snapshot.utxo_count(),
            fee_total: unsigned[0].estimated_fee(),
            txids: signed.iter().map(|tx| tx.txid().to_string()).collect(),
            plan,
            allocation: None,
            transactions: signed,
        };
        self.broadcast(trace, report)
    }

    fn checked_snapshot(&self, mode: RunMode) -> Result<WalletSnapshot, DistributionError> {
        if mode == RunMode::Execute && self.gate.is_engaged() {
            return Err(DistributionError::EmergencyStopped);
        }
        self.snapshot()
    }

    fn sign_all(
        &self,
        unsigned: &[UnsignedTransaction],
    ) -> Result<Vec<SignedTransaction>, DistributionError> {
        let signer = self.book.signer();
        let signed = unsigned
            .iter()
            .map(|tx| signer.sign(tx))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "Signed {} transaction(s) as {}",
            signed.len(),
            signer.identities().join(" + ")
        );
        Ok(signed)
    }

    /// Outputs against the configured recipients and the spend plan
    fn validate_distribution(
        &self,
        plan: &SpendPlan,
        allocation: &AllocationTable,
        unsigned: &[UnsignedTransaction],
        signed: &[SignedTransaction],
    ) -> Result<(), DistributionError> {
        let expected = self
            .calculator
            .allocate(allocation.total(), self.book.recipients())?;
        if &expected != allocation {
            return Err(DistributionError::ValidationFailed(
                "allocation does not match the configured recipients".to_string(),
            ));
        }

        let paid: Vec<_> = unsigned.iter().flat_map(|tx| tx.outputs()).collect();
        if paid.len() != allocation.len() {
            return Err(DistributionError::ValidationFailed(format!(
                "{} recipient outputs for {} recipients",
                paid.len(),
                allocation.len()
            )));
        }
        for (output, entry) in paid.iter().zip(allocation.entries()) {
            if output.address != entry.address || output.amount != entry.amount {
                return Err(DistributionError::ValidationFailed(format!(
                    "output {} {} does not match {} {} for {}",
                    output.address, output.amount, entry.address, entry.amount, entry.label
                )));
            }
        }

        let recipient_total: u64 = unsigned.iter().map(|tx| tx.recipient_total()).sum();
        if recipient_total > plan.spendable_amount() {
            return Err(DistributionError::ValidationFailed(format!(
                "recipients get {} sats, only {} spendable",
                recipient_total,
                plan.spendable_amount()
            )));
        }

        self.validate_common(plan, unsigned, signed)
    }

    /// Checks shared by every cycle kind
    fn validate_common(
        &self,
        plan: &SpendPlan,
        unsigned: &[UnsignedTransaction],
        signed: &[SignedTransaction],
    ) -> Result<(), DistributionError> {
        let planned: HashSet<String> = plan.selected().iter().map(|u| u.outpoint()).collect();
        let mut spent = HashSet::new();
        let mut left_wallet = 0u64;

        for (tx, signed) in unsigned.iter().zip(signed) {
            if let Some(change) = tx.change_output() {
                if &change.address != self.book.multisig_address() {
                    return Err(DistributionError::ValidationFailed(format!(
                        "change pays {} instead of the multisig address",
                        change.address
                    )));
                }
            }
            if tx.actual_fee() != Some(tx.estimated_fee()) {
                return Err(DistributionError::ValidationFailed(format!(
                    "inputs {} do not equal outputs {} plus fee {}",
                    tx.total_input(),
                    tx.total_output(),
                    tx.estimated_fee()
                )));
            }
            if signed.size() > MAX_TX_SIZE {
                return Err(DistributionError::ValidationFailed(format!(
                    "transaction is {} bytes, limit is {}",
                    signed.size(),
                    MAX_TX_SIZE
                )));
            }
            for input in tx.inputs() {
                let outpoint = input.outpoint();
                if !planned.contains(&outpoint) || !spent.insert(outpoint.clone()) {
                    return Err(DistributionError::ValidationFailed(format!(
                        "input {} is not planned or spent twice",
                        outpoint
                    )));
                }
            }
            left_wallet += tx.total_input() - tx.change_output().map_or(0, |c| c.amount);
        }

        let kept = plan.total_selected().saturating_sub(left_wallet);
        if kept < plan.reserved_amount() {
            return Err(DistributionError::ValidationFailed(format!(
                "{} sats would stay, reserve needs {}",
                kept,
                plan.reserved_amount()
            )));
        }
        Ok(())
    }

    fn broadcast(&self, trace: &mut Trace, mut report: Report) -> Result<Report, DistributionError> {
        if report.mode == RunMode::DryRun {
            return Ok(report);
        }
        if self.gate.is_engaged() {
            warn!("Emergency stop engaged before broadcast, discarding signed transaction(s)");
            return Err(DistributionError::EmergencyStopped);
        }

        trace.enter(EngineState::Broadcasting);
        let mut accepted = Vec::with_capacity(report.transactions.len());
        for tx in &report.transactions {
            let hex = tx.hex();
            match self
                .retry
                .run(self.sleeper, "broadcast", || self.broadcaster.broadcast(&hex))
            {
                Ok(txid) => {
                    if txid != tx.txid() {
                        warn!("Node reported txid {}, computed {}", txid, tx.txid());
                    }
                    info!("📡 Broadcast {}", txid);
                    accepted.push(txid);
                }
                Err(source) => {
                    return Err(DistributionError::BroadcastFailed {
                        source,
                        broadcast: accepted,
                    })
                }
            }
        }

        trace.enter(EngineState::Committed);
        report.txids = accepted;
        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================
