//! Storage layer
//!
//! Durable, crash-safe persistence of the monitor state.

pub mod persistence;

pub use persistence::{FileStateStore, MemoryStateStore, StateStore, StoreError};
