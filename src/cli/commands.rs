//! CLI commands for the distributor
//!
//! Implements all command handlers for the CLI interface.

use crate::backend::{EsploraClient, RetryPolicy};
use crate::config::{AddressBook, MonitorSettings, Settings, SATS_PER_COIN};
use crate::distribution::{
    DistributionEngine, DistributionError, Outcome, Report, RunMode, RunOptions,
};
use crate::monitor::{
    explorer_link, record_partial_broadcast, settle_state, CycleLock, DistributionStep,
    EmergencyGate, FileEmergencyGate, LockError, MonitorLoop, MonitorState, Permit, RateLimiter,
    SystemClock, ThreadSleeper,
};
use crate::storage::{FileStateStore, StateStore};
use chrono::Utc;
use std::io::{self, BufRead, Write};
use std::time::Duration;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// How long `monitor stop`/`resume` wait for a running cycle
const STATE_LOCK_ATTEMPTS: u32 = 10;
const STATE_LOCK_DELAY: Duration = Duration::from_millis(500);

/// Everything a command needs, built once from the environment
pub struct AppContext {
    pub settings: Settings,
    pub book: AddressBook,
    pub backend: EsploraClient,
    pub gate: FileEmergencyGate,
    pub store: FileStateStore,
}

impl AppContext {
    /// Load and validate configuration
    pub fn load() -> CliResult<Self> {
        let settings = Settings::from_env()?;
        let book = AddressBook::from_settings(&settings)?;
        let backend = EsploraClient::new(
            &settings.api.primary,
            settings.api.fallback.as_deref(),
            settings.api.timeout,
        )?;
        let gate = FileEmergencyGate::new(&settings.monitor.emergency_stop_file);
        let store = FileStateStore::new(&settings.monitor.state_file);

        Ok(Self {
            settings,
            book,
            backend,
            gate,
            store,
        })
    }

    /// Engine wired to the HTTP backend with the configured retry budget
    pub fn engine(&self) -> DistributionEngine<'_> {
        DistributionEngine::new(
            &self.book,
            &self.settings.distribution,
            &self.backend,
            &self.backend,
            &self.gate,
        )
        .with_retry(
            RetryPolicy::new(self.settings.api.max_retries, self.settings.api.retry_delay),
            &ThreadSleeper,
        )
    }

    fn limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.settings.monitor.max_distributions_per_hour,
            self.settings.monitor.max_distributions_per_day,
        )
    }

    fn lock(&self) -> CycleLock {
        CycleLock::new(&self.settings.monitor.lock_file)
            .with_stale_after(self.settings.monitor.lock_stale_after)
    }
}

/// `12.34500000 JKC`
pub fn format_coins(sats: u64) -> String {
    format!("{}.{:08} JKC", sats / SATS_PER_COIN, sats % SATS_PER_COIN)
}

/// Validate configuration, returning whether it is usable
pub fn cmd_validate() -> CliResult<bool> {
    println!("🔍 Validating configuration...");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            println!("❌ Configuration invalid: {}", e);
            return Ok(false);
        }
    };
    let book = match AddressBook::from_settings(&settings) {
        Ok(book) => book,
        Err(e) => {
            println!("❌ Configuration invalid: {}", e);
            return Ok(false);
        }
    };

    println!("✅ Configuration is valid!");
    println!("   🔐 Multisig: {}", book.wallet().description());
    println!("   📍 Address: {}", book.multisig_address());
    println!("   ✍️  Signers: {}", book.signer().identities().join(", "));
    println!("   👥 Recipients: {}", book.recipients().len());
    Ok(true)
}

/// Print configuration with secrets redacted
pub fn cmd_show_config() -> CliResult<()> {
    let settings = Settings::from_env()?;
    let d = &settings.distribution;
    let m = &settings.monitor;

    println!("⚙️  Configuration");
    println!("   ├─ Multisig address: {}", settings.devfund_address);
    println!(
        "   ├─ Policy: {}-of-{}",
        settings.multisig_m, settings.multisig_n
    );
    println!(
        "   ├─ Signing keys: {} configured (redacted)",
        settings.signer_wifs.len()
    );
    println!("   ├─ Redeem script: {}...", preview(&settings.redeem_script, 16));
    println!("   └─ Explorer: {}", settings.explorer_url);

    println!("\n👥 Recipients");
    for r in &settings.recipients {
        println!("   └─ {} {} ({}%)", r.label, r.address, r.percent);
    }

    println!("\n💰 Distribution");
    println!("   ├─ Balance threshold: {}", format_coins(d.threshold_balance));
    println!("   ├─ UTXO threshold: {}", d.threshold_utxo);
    println!("   ├─ Reserve: {}", format_coins(d.minimum_balance));
    println!("   ├─ Minimum distribution: {}", format_coins(d.min_distribution_amount));
    println!("   ├─ Minimum per recipient: {} sats", d.min_recipient_amount);
    println!(
        "   ├─ Fee: {} sat/byte, min {} sats, max {} sats",
        d.fee_rate, d.min_relay_fee, d.max_fee
    );
    println!("   ├─ Dust threshold: {} sats", d.dust_threshold);
    println!("   ├─ Confirmations: {}", d.min_confirmations);
    println!("   ├─ Max inputs: {}", d.max_inputs);
    println!(
        "   └─ Mode: {}",
        if d.use_sendmany { "sendmany" } else { "sequential" }
    );

    println!("\n🌐 API");
    println!("   ├─ Primary: {}", settings.api.primary);
    println!(
        "   ├─ Fallback: {}",
        settings.api.fallback.as_deref().unwrap_or("-")
    );
    println!(
        "   └─ Timeout {:?}, {} retries, base delay {:?}",
        settings.api.timeout, settings.api.max_retries, settings.api.retry_delay
    );

    println!("\n⏱️  Monitor");
    println!("   ├─ Check interval: {:?}", m.check_interval);
    println!("   ├─ Consolidate interval: {:?}", m.consolidate_interval);
    println!("   ├─ Max UTXOs: {}", m.max_utxos);
    println!(
        "   ├─ Max distributions: {}/hour, {}/day",
        m.max_distributions_per_hour, m.max_distributions_per_day
    );
    println!("   ├─ Emergency stop file: {}", m.emergency_stop_file.display());
    println!("   ├─ State file: {}", m.state_file.display());
    println!("   └─ Lock file: {}", m.lock_file.display());

    Ok(())
}

/// Plan, build, sign and validate without broadcasting
pub fn cmd_dry_run(ctx: &AppContext) -> CliResult<()> {
    println!("🧪 Dry run for {}", ctx.book.multisig_address());

    let outcome = ctx.engine().run_distribution(RunOptions::dry_run());
    print_trace(&outcome);
    let report = outcome.result?;
    print_report(&report, &ctx.settings.explorer_url);

    println!("\n✅ Dry run complete. Nothing was broadcast.");
    Ok(())
}

/// Run a full distribution cycle
///
/// Without `confirm` the operator must type `YES` and the balance and UTXO
/// thresholds apply. With `confirm` both are skipped; the reserve never is.
pub fn cmd_execute(ctx: &AppContext, confirm: bool) -> CliResult<()> {
    if !confirm {
        println!(
            "⚠️  This will broadcast a distribution from {}",
            ctx.book.multisig_address()
        );
        print!("   Type YES to continue: ");
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if answer.trim() != "YES" {
            println!("❌ Aborted.");
            return Ok(());
        }
    }

    let _guard = ctx.lock().try_acquire().map_err(DistributionError::from)?;
    let options = RunOptions {
        bypass_thresholds: confirm,
        ..RunOptions::execute()
    };
    let outcome = ctx.engine().run_distribution(options);
    print_trace(&outcome);

    let limiter = ctx.limiter();
    let mut state = ctx.store.load()?;
    match outcome.result {
        Ok(report) => {
            let now = Utc::now();
            limiter.record(&mut state.rate_window, now);
            let txid = report.txids.last().cloned().unwrap_or_default();
            state.record_distribution(now, &txid, &ctx.settings.explorer_url);
            state.last_balance = Some(report.balance);
            state.decay_errors();
            settle_state(&limiter, &ctx.gate, &mut state, now);
            ctx.store.save(&state)?;

            print_report(&report, &ctx.settings.explorer_url);
            println!("\n✅ Distribution broadcast!");
            Ok(())
        }
        Err(e) => {
            let now = Utc::now();
            let mut changed = false;
            if let DistributionError::BroadcastFailed { broadcast, .. } = &e {
                changed = record_partial_broadcast(
                    &limiter,
                    &ctx.gate,
                    &mut state,
                    now,
                    broadcast,
                    &ctx.settings.explorer_url,
                );
            }
            if e.counts_as_error() {
                state.record_error();
                changed = true;
            }
            if changed {
                settle_state(&limiter, &ctx.gate, &mut state, now);
                ctx.store.save(&state)?;
            }
            Err(e.into())
        }
    }
}

/// Whether a distribution would run now; no side effects
pub fn cmd_check_ready(ctx: &AppContext) -> CliResult<bool> {
    if ctx.gate.is_engaged() {
        println!("🛑 Not ready: emergency stop is engaged");
        return Ok(false);
    }

    let state = ctx.store.load()?;
    if let Permit::Denied(denial) = ctx.limiter().permit(&state.rate_window, Utc::now()) {
        println!("⏸️  Not ready: {}", denial);
        return Ok(false);
    }

    let engine = ctx.engine();
    let snapshot = engine.snapshot()?;
    println!(
        "💰 Balance: {} in {} UTXOs",
        format_coins(snapshot.balance),
        snapshot.utxo_count()
    );
    match engine.check_thresholds(&snapshot, false) {
        Ok(()) => {
            println!("✅ Ready to distribute");
            Ok(true)
        }
        Err(e) => {
            println!("⏸️  Not ready: {}", e);
            Ok(false)
        }
    }
}

/// Run the monitor loop until the process is stopped
pub fn cmd_monitor_start(ctx: &AppContext, cycles: Option<u64>) -> CliResult<()> {
    let engine = ctx.engine();
    let monitor = MonitorLoop::new(
        engine,
        &ctx.settings.monitor,
        &ctx.store,
        &ctx.gate,
        &SystemClock,
        &ThreadSleeper,
    )
    .with_explorer(ctx.settings.explorer_url.as_str());

    monitor.run(cycles)?;
    Ok(())
}

/// Run a single monitor cycle
pub fn cmd_monitor_once(ctx: &AppContext) -> CliResult<()> {
    let monitor = MonitorLoop::new(
        ctx.engine(),
        &ctx.settings.monitor,
        &ctx.store,
        &ctx.gate,
        &SystemClock,
        &ThreadSleeper,
    )
    .with_explorer(ctx.settings.explorer_url.as_str());

    let report = match monitor.run_once() {
        Ok(report) => report,
        Err(DistributionError::EmergencyStopped) => {
            println!("🛑 Emergency stop is engaged. Nothing was done.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match &report.distribution {
        DistributionStep::RateLimited(denial) => println!("⏸️  Distribution skipped: {}", denial),
        DistributionStep::Ran(outcome) => {
            print_trace(outcome);
            match &outcome.result {
                Ok(r) => print_report(r, &ctx.settings.explorer_url),
                Err(e) => println!("⏸️  Distribution not committed: {}", e),
            }
        }
    }
    if let Some(outcome) = &report.consolidation {
        print_trace(outcome);
        match &outcome.result {
            Ok(r) => print_report(r, &ctx.settings.explorer_url),
            Err(e) => println!("⏸️  Consolidation not committed: {}", e),
        }
    }
    Ok(())
}

/// Engage the emergency stop
///
/// Needs only the monitor paths, so it works even when the wallet
/// configuration does not validate.
pub fn cmd_monitor_stop(settings: &MonitorSettings, reason: &str) -> CliResult<()> {
    let gate = FileEmergencyGate::new(&settings.emergency_stop_file);
    gate.engage(reason)?;
    mirror_emergency_stop(settings, true)?;

    println!("🛑 Emergency stop engaged: {}", reason);
    println!("   Sentinel: {}", gate.path().display());
    println!("   Resume with: distributor monitor resume");
    Ok(())
}

/// Clear the emergency stop
pub fn cmd_monitor_resume(settings: &MonitorSettings) -> CliResult<()> {
    let gate = FileEmergencyGate::new(&settings.emergency_stop_file);
    if !gate.is_engaged() {
        println!("ℹ️  Emergency stop is not engaged");
    }
    gate.clear()?;
    mirror_emergency_stop(settings, false)?;

    println!("▶️  Distributions resumed");
    Ok(())
}

/// Copy the sentinel into the state file under the cycle lock
///
/// When a cycle keeps the lock the file is left alone; that cycle mirrors
/// the sentinel itself when it saves.
fn mirror_emergency_stop(settings: &MonitorSettings, engaged: bool) -> CliResult<()> {
    let lock = CycleLock::new(&settings.lock_file).with_stale_after(settings.lock_stale_after);
    let _guard = match lock.acquire_within(STATE_LOCK_ATTEMPTS, STATE_LOCK_DELAY, &ThreadSleeper)
    {
        Ok(guard) => guard,
        Err(LockError::Held { pid, .. }) => {
            println!("   ⏳ Cycle in progress (pid {}), state file left to it", pid);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let store = FileStateStore::new(&settings.state_file);
    let mut state = store.load()?;
    state.emergency_stopped = engaged;
    store.save(&state)?;
    Ok(())
}

/// Show monitor state, limits and the emergency stop
pub fn cmd_monitor_status(ctx: &AppContext) -> CliResult<()> {
    let state = ctx.store.load()?;
    let (hour, day) = ctx.limiter().current_counts(&state.rate_window, Utc::now());
    let m = &ctx.settings.monitor;

    println!("📊 Monitor Status");
    if ctx.gate.is_engaged() {
        println!(
            "   ├─ Emergency stop: ENGAGED ({})",
            ctx.gate.reason().unwrap_or_default()
        );
    } else {
        println!("   ├─ Emergency stop: off");
    }
    match ctx.lock().holder() {
        Some(pid) => println!("   ├─ Cycle lock: held by pid {}", pid),
        None => println!("   ├─ Cycle lock: free"),
    }
    println!(
        "   ├─ This hour: {}/{}",
        hour, m.max_distributions_per_hour
    );
    println!("   ├─ Today: {}/{}", day, m.max_distributions_per_day);
    println!("   ├─ Distributions: {}", state.distributions_total);
    println!("   ├─ Consolidations: {}", state.consolidations_total);
    println!("   ├─ Errors: {}", state.error_count);
    println!(
        "   ├─ Last distribution: {}",
        state
            .last_distribution_timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "   ├─ Last balance: {}",
        state
            .last_balance
            .map(format_coins)
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "   └─ Last transaction: {}",
        state.last_explorer_link.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// Reset counters to zero; the emergency stop is left as it is
pub fn cmd_monitor_reset(ctx: &AppContext) -> CliResult<()> {
    let _guard = ctx.lock().try_acquire().map_err(DistributionError::from)?;
    let state = MonitorState {
        emergency_stopped: ctx.gate.is_engaged(),
        ..MonitorState::default()
    };
    ctx.store.save(&state)?;
    println!("🔄 Monitor state reset ({})", ctx.store.path().display());
    Ok(())
}

fn print_trace(outcome: &Outcome) {
    let states: Vec<String> = outcome.trace.iter().map(|s| s.to_string()).collect();
    println!("   🔁 {}", states.join(" → "));
}

fn print_report(report: &Report, explorer_url: &str) {
    println!("\n📋 {:?} ({:?})", report.kind, report.mode);
    println!("   ├─ Balance: {}", format_coins(report.balance));
    println!(
        "   ├─ Inputs: {} of {} UTXOs ({})",
        report.plan.input_count(),
        report.utxo_count,
        format_coins(report.plan.total_selected())
    );
    println!("   ├─ Reserved: {}", format_coins(report.plan.reserved_amount()));
    println!("   └─ Fees: {}", format_coins(report.fee_total));

    if let Some(allocation) = &report.allocation {
        println!("\n   Allocation ({}):", format_coins(allocation.total()));
        for entry in allocation.entries() {
            println!(
                "   └─ {} {} {}% = {}",
                entry.label,
                entry.address,
                entry.percent,
                format_coins(entry.amount)
            );
        }
    }

    println!("\n   Transactions:");
    for tx in &report.transactions {
        println!("   └─ {} ({} bytes)", tx.txid(), tx.size());
        if report.mode == RunMode::Execute {
            println!("      {}", explorer_link(explorer_url, tx.txid()));
        }
    }
}

fn preview(s: &str, len: usize) -> &str {
    s.get(..len).unwrap_or(s)
}
