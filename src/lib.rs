//! Multisig Distributor: automated fund distribution from a Junkcoin
//! 2-of-3 P2SH wallet
//!
//! This crate provides:
//! - Base58Check addresses, redeem scripts and legacy transaction encoding
//! - ECDSA signing (secp256k1) with two of three keys, verified before use
//! - UTXO selection that never spends into the configured reserve
//! - Percentage allocation with exact integer arithmetic
//! - A distribution state machine behind an emergency stop
//! - A monitor loop with hourly/daily rate limits and durable state
//! - An Esplora-style HTTP backend with fallback and retries
//!
//! # Example
//!
//! ```ignore
//! use multisig_distributor::backend::EsploraClient;
//! use multisig_distributor::config::{AddressBook, Settings};
//! use multisig_distributor::distribution::{DistributionEngine, RunOptions};
//! use multisig_distributor::monitor::FileEmergencyGate;
//!
//! let settings = Settings::from_env()?;
//! let book = AddressBook::from_settings(&settings)?;
//! let backend = EsploraClient::new(&settings.api.primary, None, settings.api.timeout)?;
//! let gate = FileEmergencyGate::new(&settings.monitor.emergency_stop_file);
//!
//! let engine = DistributionEngine::new(&book, &settings.distribution, &backend, &backend, &gate);
//! let outcome = engine.run_distribution(RunOptions::dry_run());
//! println!("{:?}", outcome.trace);
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod distribution;
pub mod monitor;
pub mod multisig;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types
pub use backend::{BackendError, EsploraClient};
pub use config::{AddressBook, ConfigError, Settings};
pub use core::{Address, Network, RedeemScript, UnsignedTransaction, Utxo};
pub use crypto::KeyPair;
pub use distribution::{DistributionEngine, DistributionError, ErrorClass, Outcome, RunOptions};
pub use monitor::{FileEmergencyGate, MonitorLoop, MonitorState, RateLimiter};
pub use multisig::{MultisigSigner, MultisigWallet, SignedTransaction};
pub use storage::{FileStateStore, StateStore};
