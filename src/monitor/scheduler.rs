//! The monitor loop
//!
//! Each cycle, in order:
//! 1. emergency gate, before anything touches the network
//! 2. process-wide cycle lock
//! 3. rate limiter
//! 4. distribution engine
//! 5. consolidation, only when no distribution committed this cycle
//! 6. state commit
//!
//! Skips (gate, lock, limits, thresholds) leave the saved state as it was.

use crate::config::MonitorSettings;
use crate::distribution::{
    DistributionEngine, DistributionError, ErrorClass, Outcome, Report, RunMode, RunOptions,
};
use crate::monitor::clock::{Clock, Sleeper};
use crate::monitor::emergency::EmergencyGate;
use crate::monitor::lock::CycleLock;
use crate::monitor::rate_limit::{Denial, Permit, RateLimiter};
use crate::monitor::state::MonitorState;
use crate::storage::StateStore;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

/// What happened to the distribution step of a cycle
#[derive(Debug)]
pub enum DistributionStep {
    /// Refused by the rate limiter; the engine did not run
    RateLimited(Denial),
    Ran(Outcome),
}

/// Result of one monitor cycle
#[derive(Debug)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub distribution: DistributionStep,
    pub consolidation: Option<Outcome>,
}

impl CycleReport {
    /// Whether a distribution committed this cycle
    pub fn distributed(&self) -> bool {
        matches!(&self.distribution, DistributionStep::Ran(outcome) if outcome.is_committed())
    }
}

/// Timed driver around the distribution engine
pub struct MonitorLoop<'a> {
    engine: DistributionEngine<'a>,
    settings: &'a MonitorSettings,
    store: &'a dyn StateStore,
    gate: &'a dyn EmergencyGate,
    clock: &'a dyn Clock,
    sleeper: &'a dyn Sleeper,
    lock: CycleLock,
    limiter: RateLimiter,
    explorer_url: String,
}

impl<'a> MonitorLoop<'a> {
    pub fn new(
        engine: DistributionEngine<'a>,
        settings: &'a MonitorSettings,
        store: &'a dyn StateStore,
        gate: &'a dyn EmergencyGate,
        clock: &'a dyn Clock,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            engine,
            settings,
            store,
            gate,
            clock,
            sleeper,
            lock: CycleLock::new(&settings.lock_file).with_stale_after(settings.lock_stale_after),
            limiter: RateLimiter::new(
                settings.max_distributions_per_hour,
                settings.max_distributions_per_day,
            ),
            explorer_url: String::new(),
        }
    }

    /// Base URL used for `last_explorer_link`
    pub fn with_explorer(mut self, explorer_url: impl Into<String>) -> Self {
        self.explorer_url = explorer_url.into();
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run one cycle
    ///
    /// Returns an error when the cycle was skipped before the engine could
    /// run (gate or lock), or when state could not be stored.
    pub fn run_once(&self) -> Result<CycleReport, DistributionError> {
        let started_at = self.clock.now();

        if self.gate.is_engaged() {
            return Err(DistributionError::EmergencyStopped);
        }
        let _guard = self.lock.try_acquire()?;

        let mut state = self.store.load()?;
        let mut dirty = false;

        let distribution = match self.limiter.permit(&state.rate_window, started_at) {
            Permit::Denied(denial) => {
                info!("⏸️  Distribution rate limit reached: {}", denial);
                DistributionStep::RateLimited(denial)
            }
            Permit::Allowed => {
                let outcome = self.engine.run_distribution(RunOptions::execute());
                match &outcome.result {
                    Ok(report) => {
                        self.commit_distribution(&mut state, report);
                        dirty = true;
                    }
                    Err(e) => dirty |= self.count_failure(&mut state, e),
                }
                DistributionStep::Ran(outcome)
            }
        };

        let mut consolidation = None;
        let distributed = matches!(&distribution, DistributionStep::Ran(o) if o.is_committed());
        if !distributed
            && !self.gate.is_engaged()
            && self.consolidation_due(&state, started_at)
        {
            let outcome = self
                .engine
                .run_consolidation(RunMode::Execute, self.settings.max_utxos);
            match &outcome.result {
                Ok(report) => {
                    self.commit_consolidation(&mut state, report);
                    dirty = true;
                }
                Err(e) => dirty |= self.count_failure(&mut state, e),
            }
            consolidation = Some(outcome);
        }

        if dirty {
            settle_state(&self.limiter, self.gate, &mut state, self.clock.now());
            self.store.save(&state)?;
        }

        Ok(CycleReport {
            started_at,
            distribution,
            consolidation,
        })
    }

    /// Run cycles every `check_interval`, forever or for `max_cycles`
    pub fn run(&self, max_cycles: Option<u64>) -> Result<(), DistributionError> {
        info!("🚀 Monitor starting...");
        info!("📊 Check interval: {:?}", self.settings.check_interval);
        if self.settings.consolidate_interval.is_zero() {
            info!("🔗 Consolidation: disabled");
        } else {
            info!(
                "🔗 Consolidate interval: {:?} (above {} UTXOs)",
                self.settings.consolidate_interval, self.settings.max_utxos
            );
        }
        info!(
            "⚡ Max distributions: {}/hour, {}/day",
            self.limiter.max_per_hour, self.limiter.max_per_day
        );
        info!(
            "🛑 Emergency stop file: {}",
            self.settings.emergency_stop_file.display()
        );

        let mut cycles = 0u64;
        loop {
            match self.run_once() {
                Ok(report) => log_cycle(&report),
                Err(e) if e.class() == ErrorClass::Fatal => {
                    error!("Monitor stopping: {}", e);
                    return Err(e);
                }
                Err(DistributionError::EmergencyStopped) => warn!(
                    "🚨 Emergency stop active, remove {} to resume",
                    self.settings.emergency_stop_file.display()
                ),
                Err(e) => info!("Cycle skipped: {}", e),
            }

            cycles += 1;
            if max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            self.sleeper.sleep(self.settings.check_interval);
        }

        info!("🛑 Monitor stopped after {} cycle(s)", cycles);
        Ok(())
    }

    fn consolidation_due(&self, state: &MonitorState, now: DateTime<Utc>) -> bool {
        let interval = self.settings.consolidate_interval;
        if interval.is_zero() {
            return false;
        }
        match state.last_consolidation_timestamp {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= interval)
                .unwrap_or(false),
        }
    }

    fn commit_distribution(&self, state: &mut MonitorState, report: &Report) {
        let now = self.clock.now();
        self.limiter.record(&mut state.rate_window, now);
        let txid = report.txids.last().map(String::as_str).unwrap_or_default();
        state.record_distribution(now, txid, &self.explorer_url);
        state.last_balance = Some(report.balance);
        state.decay_errors();
        info!(
            "✅ Distribution committed: {} ({} today, {} total)",
            txid, state.distributions_today, state.distributions_total
        );
    }

    fn commit_consolidation(&self, state: &mut MonitorState, report: &Report) {
        let now = self.clock.now();
        let txid = report.txids.last().map(String::as_str).unwrap_or_default();
        state.record_consolidation(now, txid, &self.explorer_url);
        state.last_balance = Some(report.balance);
        state.decay_errors();
        info!("🔗 Consolidation committed: {}", txid);
    }

    /// Count policy and transient aborts; returns whether state changed
    fn count_failure(&self, state: &mut MonitorState, e: &DistributionError) -> bool {
        let mut changed = false;
        if let DistributionError::BroadcastFailed { broadcast, .. } = e {
            changed = record_partial_broadcast(
                &self.limiter,
                self.gate,
                state,
                self.clock.now(),
                broadcast,
                &self.explorer_url,
            );
        }
        if e.counts_as_error() {
            state.record_error();
            changed = true;
        }
        changed
    }
}

/// Account for transactions accepted before a broadcast failed
///
/// They count against the rate caps like a full distribution, and the
/// emergency gate is engaged so the next cycle cannot plan a fresh
/// allocation from the reduced balance. Returns whether anything was sent.
pub fn record_partial_broadcast(
    limiter: &RateLimiter,
    gate: &dyn EmergencyGate,
    state: &mut MonitorState,
    now: DateTime<Utc>,
    broadcast: &[String],
    explorer_url: &str,
) -> bool {
    let Some(last) = broadcast.last() else {
        return false;
    };
    error!(
        "Already broadcast before the failure: {}",
        broadcast.join(", ")
    );
    limiter.record(&mut state.rate_window, now);
    state.record_distribution(now, last, explorer_url);

    let reason = format!(
        "partial broadcast, {} transaction(s) sent, last {}",
        broadcast.len(),
        last
    );
    match gate.engage(&reason) {
        Ok(()) => warn!("🚨 Emergency stop engaged: {}", reason),
        Err(e) => error!("Failed to engage emergency stop: {}", e),
    }
    true
}

/// Refresh the fields that mirror the rate window and the sentinel
pub fn settle_state(
    limiter: &RateLimiter,
    gate: &dyn EmergencyGate,
    state: &mut MonitorState,
    now: DateTime<Utc>,
) {
    let (_, today) = limiter.current_counts(&state.rate_window, now);
    state.distributions_today = today;
    state.emergency_stopped = gate.is_engaged();
}

fn log_cycle(report: &CycleReport) {
    let consolidated = report
        .consolidation
        .as_ref()
        .is_some_and(|outcome| outcome.is_committed());
    debug!(
        "Cycle started {} done: distributed={}, consolidated={}",
        report.started_at.format("%H:%M:%S"),
        report.distributed(),
        consolidated
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::RetryPolicy;
    use crate::config::{AddressBook, DistributionSettings};
    use crate::core::Utxo;
    use crate::monitor::clock::{FakeClock, RecordingSleeper};
    use crate::monitor::emergency::MemoryEmergencyGate;
    use crate::storage::MemoryStateStore;
    use crate::test_fixtures::{address_book, utxo};
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    const COIN: u64 = 100_000_000;

    struct Harness {
        _dir: TempDir,
        book: AddressBook,
        distribution: DistributionSettings,
        monitor: MonitorSettings,
        backend: MockBackend,
        gate: MemoryEmergencyGate,
        store: MemoryStateStore,
        clock: FakeClock,
        sleeper: RecordingSleeper,
    }

    impl Harness {
        fn new(utxos: Vec<Utxo>) -> Self {
            Self::with_state(utxos, MonitorState::default())
        }

        fn with_state(utxos: Vec<Utxo>, state: MonitorState) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let monitor = MonitorSettings {
                lock_file: dir.path().join(".monitor.lock"),
                emergency_stop_file: dir.path().join(".emergency_stop"),
                state_file: dir.path().join(".monitor_state.json"),
                max_distributions_per_hour: 6,
                max_distributions_per_day: 100,
                ..MonitorSettings::default()
            };
            let clock = FakeClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap());
            let sleeper = clock.sleeper();

            Self {
                _dir: dir,
                book: address_book(),
                distribution: DistributionSettings::default(),
                monitor,
                backend: MockBackend::with_utxos(utxos),
                gate: MemoryEmergencyGate::default(),
                store: MemoryStateStore::with_state(state),
                clock,
                sleeper,
            }
        }

        fn monitor(&self) -> MonitorLoop<'_> {
            let engine = DistributionEngine::new(
                &self.book,
                &self.distribution,
                &self.backend,
                &self.backend,
                &self.gate,
            )
            .with_retry(RetryPolicy::new(2, Duration::from_secs(1)), &self.sleeper);

            MonitorLoop::new(
                engine,
                &self.monitor,
                &self.store,
                &self.gate,
                &self.clock,
                &self.sleeper,
            )
            .with_explorer("https://explorer.example")
        }

        fn saved(&self) -> MonitorState {
            self.store.load().unwrap()
        }
    }

    #[test]
    fn test_sentinel_means_no_network_calls() {
        let harness = Harness::new(vec![utxo(1, 69 * COIN)]);
        harness.gate.engage("operator").unwrap();

        let result = harness.monitor().run_once();
        assert!(matches!(result, Err(DistributionError::EmergencyStopped)));
        assert_eq!(harness.backend.calls(), 0);
        assert_eq!(harness.store.save_count(), 0);
    }

    #[test]
    fn test_seventh_distribution_in_hour_is_rate_limited() {
        let limiter = RateLimiter::new(6, 100);
        let mut state = MonitorState::default();
        for minute in 0..6 {
            let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap();
            limiter.record(&mut state.rate_window, at);
        }
        let harness = Harness::with_state(vec![utxo(1, 69 * COIN)], state.clone());

        let report = harness.monitor().run_once().unwrap();
        assert!(matches!(
            report.distribution,
            DistributionStep::RateLimited(Denial::HourlyCap { count: 6, max: 6 })
        ));
        assert_eq!(harness.backend.calls(), 0);
        assert_eq!(harness.backend.broadcast_count(), 0);
        assert_eq!(harness.saved(), state);
    }

    #[test]
    fn test_committed_distribution_updates_state() {
        let state = MonitorState {
            error_count: 2,
            ..MonitorState::default()
        };
        let harness = Harness::with_state(vec![utxo(1, 69 * COIN)], state);

        let report = harness.monitor().run_once().unwrap();
        assert!(report.distributed());
        assert!(report.consolidation.is_none());

        let saved = harness.saved();
        assert_eq!(saved.distributions_total, 1);
        assert_eq!(saved.distributions_today, 1);
        assert_eq!(saved.rate_window.hour_bucket_count, 1);
        assert_eq!(saved.error_count, 1);
        assert_eq!(saved.last_balance, Some(69 * COIN));
        assert_eq!(
            saved.last_distribution_timestamp,
            Some(harness.clock.now())
        );
        let txid = saved.last_txid.clone().unwrap();
        assert_eq!(
            saved.last_explorer_link,
            Some(format!("https://explorer.example/tx/{}", txid))
        );
        assert_eq!(harness.store.save_count(), 1);
    }

    #[test]
    fn test_skip_leaves_state_untouched() {
        let state = MonitorState {
            error_count: 3,
            ..MonitorState::default()
        };
        let harness = Harness::with_state(vec![utxo(1, 5 * COIN)], state.clone());

        let report = harness.monitor().run_once().unwrap();
        match &report.distribution {
            DistributionStep::Ran(outcome) => assert!(matches!(
                outcome.result,
                Err(DistributionError::InsufficientFunds(_))
            )),
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(harness.store.save_count(), 0);
        assert_eq!(harness.saved(), state);
    }

    #[test]
    fn test_network_failure_counts_as_error() {
        let harness = Harness::new(vec![utxo(1, 69 * COIN)]);
        harness.backend.fetch_failures.set(100);

        let report = harness.monitor().run_once().unwrap();
        assert!(!report.distributed());
        assert_eq!(harness.saved().error_count, 1);
        assert_eq!(harness.saved().distributions_total, 0);
    }

    #[test]
    fn test_partial_broadcast_counts_and_stops() {
        let mut harness = Harness::new(vec![
            utxo(1, 40 * COIN),
            utxo(2, 20 * COIN),
            utxo(3, 20 * COIN),
        ]);
        harness.distribution.use_sendmany = false;
        harness.distribution.min_relay_fee = 1_000;
        harness.backend.accept_limit.set(Some(1));

        let report = harness.monitor().run_once().unwrap();
        assert!(!report.distributed());
        assert_eq!(harness.backend.broadcast_count(), 1);

        let saved = harness.saved();
        assert_eq!(saved.rate_window.hour_bucket_count, 1);
        assert_eq!(saved.distributions_today, 1);
        assert_eq!(saved.distributions_total, 1);
        assert_eq!(saved.error_count, 1);
        assert!(saved.emergency_stopped);
        assert!(saved.last_txid.is_some());
        assert!(harness.gate.is_engaged());

        // the next cycle must not pay anyone again
        let calls = harness.backend.calls();
        assert!(matches!(
            harness.monitor().run_once(),
            Err(DistributionError::EmergencyStopped)
        ));
        assert_eq!(harness.backend.calls(), calls);
        assert_eq!(harness.backend.broadcast_count(), 1);
    }

    #[test]
    fn test_saved_state_reflects_day_rollover() {
        let limiter = RateLimiter::new(6, 100);
        let mut state = MonitorState::default();
        for hour in 0..3 {
            let at = Utc.with_ymd_and_hms(2024, 4, 30, 20 + hour, 0, 0).unwrap();
            limiter.record(&mut state.rate_window, at);
        }
        state.distributions_today = 3;
        let harness = Harness::with_state(vec![utxo(1, 69 * COIN)], state);
        harness.backend.fetch_failures.set(100);

        harness.monitor().run_once().unwrap();
        let saved = harness.saved();
        assert_eq!(saved.error_count, 1);
        assert_eq!(saved.distributions_today, 0);
    }

    #[test]
    fn test_lock_held_skips_cycle() {
        let harness = Harness::new(vec![utxo(1, 69 * COIN)]);
        let monitor = harness.monitor();
        let _held = CycleLock::new(&harness.monitor.lock_file)
            .try_acquire()
            .unwrap();

        assert!(matches!(
            monitor.run_once(),
            Err(DistributionError::CycleInProgress(_))
        ));
        assert_eq!(harness.backend.calls(), 0);
    }

    #[test]
    fn test_consolidation_when_nothing_distributed() {
        let utxos: Vec<Utxo> = (1..=6u8).map(|n| utxo(n, COIN)).collect();
        let mut harness = Harness::new(utxos);
        harness.monitor.consolidate_interval = Duration::from_secs(3600);

        let report = harness.monitor().run_once().unwrap();
        assert!(!report.distributed());
        assert!(report.consolidation.as_ref().unwrap().is_committed());

        let saved = harness.saved();
        assert_eq!(saved.consolidations_total, 1);
        assert_eq!(saved.distributions_total, 0);
        assert!(saved.last_consolidation_timestamp.is_some());
        assert_eq!(harness.backend.broadcast_count(), 1);

        // interval not yet elapsed
        let report = harness.monitor().run_once().unwrap();
        assert!(report.consolidation.is_none());
    }

    #[test]
    fn test_no_consolidation_after_distribution() {
        let utxos: Vec<Utxo> = (1..=6u8).map(|n| utxo(n, 12 * COIN)).collect();
        let mut harness = Harness::new(utxos);
        harness.monitor.consolidate_interval = Duration::from_secs(60);

        let report = harness.monitor().run_once().unwrap();
        assert!(report.distributed());
        assert!(report.consolidation.is_none());
        assert_eq!(harness.backend.broadcast_count(), 1);
    }

    #[test]
    fn test_loop_sleeps_between_cycles() {
        let harness = Harness::new(vec![utxo(1, 5 * COIN)]);
        let start = harness.clock.now();

        harness.monitor().run(Some(3)).unwrap();
        assert_eq!(
            *harness.sleeper.sleeps.borrow(),
            vec![Duration::from_secs(300); 2]
        );
        assert_eq!(harness.clock.now(), start + chrono::Duration::seconds(600));
    }
}
