//! Multisig fund distribution
//!
//! - `selector`: which UTXOs a cycle spends and how much must stay
//! - `allocation`: how the distributed amount is split
//! - `builder`: the unsigned transactions
//! - `engine`: the cycle state machine tying them to signing and broadcast

pub mod allocation;
pub mod builder;
pub mod engine;
pub mod error;
pub mod selector;

pub use allocation::{Allocation, AllocationCalculator, AllocationTable};
pub use builder::{BuildMode, TransactionBuilder};
pub use engine::{
    CycleKind, DistributionEngine, EngineState, Outcome, Report, RunMode, RunOptions,
    WalletSnapshot,
};
pub use error::{DistributionError, ErrorClass};
pub use selector::{SpendPlan, UtxoSelector};
