//! In-memory backend for tests

use crate::backend::{Balance, BackendError, Broadcaster, UtxoSource};
use crate::core::Utxo;
use std::cell::{Cell, RefCell};

/// Scriptable UTXO source and broadcaster that counts every call
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    pub(crate) utxos: RefCell<Vec<Utxo>>,
    /// Overrides the balance derived from `utxos`
    pub(crate) balance: Cell<Option<Balance>>,
    pub(crate) fetch_failures: Cell<u32>,
    pub(crate) broadcast_failures: Cell<u32>,
    pub(crate) reject_broadcasts: Cell<bool>,
    /// Reject every broadcast once this many have been accepted
    pub(crate) accept_limit: Cell<Option<usize>>,
    pub(crate) network_calls: Cell<usize>,
    pub(crate) broadcasts: RefCell<Vec<String>>,
}

impl MockBackend {
    pub(crate) fn with_utxos(utxos: Vec<Utxo>) -> Self {
        Self {
            utxos: RefCell::new(utxos),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.network_calls.get()
    }

    pub(crate) fn broadcast_count(&self) -> usize {
        self.broadcasts.borrow().len()
    }

    fn unavailable(what: &str) -> BackendError {
        BackendError::Status {
            url: format!("mock://{}", what),
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    fn take_failure(counter: &Cell<u32>) -> bool {
        let left = counter.get();
        if left > 0 {
            counter.set(left - 1);
            true
        } else {
            false
        }
    }
}

impl UtxoSource for MockBackend {
    fn get_utxos(&self, _address: &str) -> Result<Vec<Utxo>, BackendError> {
        self.network_calls.set(self.network_calls.get() + 1);
        if Self::take_failure(&self.fetch_failures) {
            return Err(Self::unavailable("utxo"));
        }
        Ok(self.utxos.borrow().clone())
    }

    fn get_balance(&self, _address: &str) -> Result<Balance, BackendError> {
        self.network_calls.set(self.network_calls.get() + 1);
        if Self::take_failure(&self.fetch_failures) {
            return Err(Self::unavailable("address"));
        }
        Ok(self.balance.get().unwrap_or_else(|| Balance {
            funded: self.utxos.borrow().iter().map(|u| u.amount).sum(),
            spent: 0,
        }))
    }
}

impl Broadcaster for MockBackend {
    fn broadcast(&self, raw_tx_hex: &str) -> Result<String, BackendError> {
        self.network_calls.set(self.network_calls.get() + 1);
        if Self::take_failure(&self.broadcast_failures) {
            return Err(Self::unavailable("tx"));
        }
        let over_limit = self
            .accept_limit
            .get()
            .is_some_and(|limit| self.broadcast_count() >= limit);
        if self.reject_broadcasts.get() || over_limit {
            return Err(BackendError::Status {
                url: "mock://tx".to_string(),
                status: 400,
                body: "bad-txns".to_string(),
            });
        }

        let raw = hex::decode(raw_tx_hex).map_err(|e| BackendError::Decode {
            url: "mock://tx".to_string(),
            message: e.to_string(),
        })?;
        self.broadcasts.borrow_mut().push(raw_tx_hex.to_string());
        Ok(crate::core::txid_of(&raw))
    }
}
