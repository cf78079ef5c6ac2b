//! Command-line interface
//!
//! Handlers for the `distributor` binary. Each returns a `CliResult` and
//! prints a human-readable summary.

mod commands;

pub use commands::*;
