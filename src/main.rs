//! Multisig Distributor CLI Application
//!
//! A command-line interface for distributing funds from the multisig wallet.

use clap::{Parser, Subcommand};
use multisig_distributor::cli::{self, AppContext};
use multisig_distributor::config::Settings;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "distributor")]
#[command(version)]
#[command(about = "Automated fund distribution from a Junkcoin 2-of-3 multisig wallet", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration
    Validate,

    /// Print the configuration with secrets redacted
    ShowConfig,

    /// Build, sign and validate a distribution without broadcasting
    DryRun,

    /// Run and broadcast a distribution
    Execute {
        /// Skip the prompt and the balance/UTXO thresholds (the reserve still applies)
        #[arg(long)]
        confirm: bool,
    },

    /// Exit 0 when a distribution would run now, 1 otherwise
    CheckReady,

    /// Automated monitoring
    Monitor {
        #[command(subcommand)]
        action: MonitorCommands,
    },
}

#[derive(Subcommand)]
enum MonitorCommands {
    /// Start the monitor loop
    Start {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Engage the emergency stop
    Stop {
        /// Reason recorded in the sentinel file
        #[arg(short, long, default_value = "operator request")]
        reason: String,
    },

    /// Show counters, limits and the emergency stop
    Status,

    /// Run a single cycle
    Once,

    /// Clear the emergency stop
    Resume,

    /// Reset counters to zero
    Reset,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Commands that must work without a valid wallet configuration
    match &cli.command {
        Commands::Validate => {
            return Ok(exit_code(cli::cmd_validate()?));
        }
        Commands::ShowConfig => {
            cli::cmd_show_config()?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Monitor {
            action: MonitorCommands::Stop { reason },
        } => {
            let settings = Settings::from_env()?;
            cli::cmd_monitor_stop(&settings.monitor, reason)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Monitor {
            action: MonitorCommands::Resume,
        } => {
            let settings = Settings::from_env()?;
            cli::cmd_monitor_resume(&settings.monitor)?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let ctx = AppContext::load()?;

    match cli.command {
        Commands::Validate | Commands::ShowConfig => unreachable!(),

        Commands::DryRun => {
            cli::cmd_dry_run(&ctx)?;
        }

        Commands::Execute { confirm } => {
            cli::cmd_execute(&ctx, confirm)?;
        }

        Commands::CheckReady => {
            return Ok(exit_code(cli::cmd_check_ready(&ctx)?));
        }

        Commands::Monitor { action } => match action {
            MonitorCommands::Start { cycles } => {
                cli::cmd_monitor_start(&ctx, cycles)?;
            }
            MonitorCommands::Status => {
                cli::cmd_monitor_status(&ctx)?;
            }
            MonitorCommands::Once => {
                cli::cmd_monitor_once(&ctx)?;
            }
            MonitorCommands::Reset => {
                cli::cmd_monitor_reset(&ctx)?;
            }
            MonitorCommands::Stop { .. } | MonitorCommands::Resume => unreachable!(),
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
