//! Chain data and broadcast backends
//!
//! The engine sees the network through two traits: a source of UTXOs and
//! balances, and a broadcaster for signed transactions. The production
//! implementation talks to an Esplora-style REST indexer.

pub mod esplora;
pub mod retry;

#[cfg(test)]
pub(crate) mod mock;

use crate::core::Utxo;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use esplora::EsploraClient;
pub use retry::RetryPolicy;

/// Backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("Unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("No API endpoints configured")]
    NoEndpoints,
}

impl BackendError {
    /// Whether trying again later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport { .. } => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::Decode { .. } | BackendError::NoEndpoints => false,
        }
    }
}

/// Confirmed totals received and spent by an address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub funded: u64,
    pub spent: u64,
}

impl Balance {
    pub fn confirmed(&self) -> u64 {
        self.funded.saturating_sub(self.spent)
    }
}

/// Source of the wallet's UTXO set and balance
pub trait UtxoSource {
    fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, BackendError>;
    fn get_balance(&self, address: &str) -> Result<Balance, BackendError>;
}

/// Relays signed transactions to the network
pub trait Broadcaster {
    /// Submit a raw transaction, returning the txid the node reports
    fn broadcast(&self, raw_tx_hex: &str) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let status = |status| BackendError::Status {
            url: "u".to_string(),
            status,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!BackendError::NoEndpoints.is_transient());
    }

    #[test]
    fn test_balance() {
        let balance = Balance {
            funded: 10,
            spent: 4,
        };
        assert_eq!(balance.confirmed(), 6);
        assert_eq!(Balance { funded: 1, spent: 2 }.confirmed(), 0);
    }
}
