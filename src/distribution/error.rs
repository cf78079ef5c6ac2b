//! Distribution error taxonomy

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::core::{FeeError, TransactionError};
use crate::monitor::lock::LockError;
use crate::monitor::rate_limit::Denial;
use crate::multisig::SignerError;
use crate::storage::StoreError;
use serde::Serialize;
use thiserror::Error;

/// How a failure is handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorClass {
    /// Stop the process
    Fatal,
    /// Nothing to do this cycle, state untouched
    Skip,
    /// Refused by policy, counted, never retried
    PolicyAbort,
    /// Network trouble after bounded retries, counted
    Transient,
}

/// Why a cycle did not commit
#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Below minimum distribution: {0}")]
    BelowMinimumDistribution(String),
    #[error("Rate limited: {0}")]
    RateLimited(Denial),
    #[error("Emergency stop is engaged")]
    EmergencyStopped,
    #[error("Another cycle is in progress: {0}")]
    CycleInProgress(String),
    #[error("Nothing to consolidate: {0}")]
    NothingToConsolidate(String),
    #[error("Fee exceeds budget: {0}")]
    FeeExceedsBudget(#[from] FeeError),
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(#[from] SignerError),
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Network timeout: {0}")]
    NetworkTimeout(#[source] BackendError),
    #[error("Broadcast failed after {} transaction(s): {source}", .broadcast.len())]
    BroadcastFailed {
        #[source]
        source: BackendError,
        /// Txids accepted before the failure
        broadcast: Vec<String>,
    },
    #[error("State storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl DistributionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DistributionError::ConfigInvalid(_) | DistributionError::Storage(_) => {
                ErrorClass::Fatal
            }
            DistributionError::InsufficientFunds(_)
            | DistributionError::BelowMinimumDistribution(_)
            | DistributionError::RateLimited(_)
            | DistributionError::EmergencyStopped
            | DistributionError::CycleInProgress(_)
            | DistributionError::NothingToConsolidate(_) => ErrorClass::Skip,
            DistributionError::FeeExceedsBudget(_)
            | DistributionError::SignatureMismatch(_)
            | DistributionError::ValidationFailed(_) => ErrorClass::PolicyAbort,
            DistributionError::NetworkTimeout(_) | DistributionError::BroadcastFailed { .. } => {
                ErrorClass::Transient
            }
        }
    }

    /// Whether the monitor's error counter goes up
    pub fn counts_as_error(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::PolicyAbort | ErrorClass::Transient
        )
    }
}

impl From<BackendError> for DistributionError {
    fn from(e: BackendError) -> Self {
        DistributionError::NetworkTimeout(e)
    }
}

impl From<TransactionError> for DistributionError {
    fn from(e: TransactionError) -> Self {
        DistributionError::ValidationFailed(e.to_string())
    }
}

impl From<LockError> for DistributionError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Held { .. } => DistributionError::CycleInProgress(e.to_string()),
            LockError::Io(io) => DistributionError::Storage(StoreError::IoError(io)),
        }
    }
}
