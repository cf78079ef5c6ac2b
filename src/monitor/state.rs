//! Durable monitor state
//!
//! The only record that outlives a cycle. Every field has a default so
//! files written by older versions still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock rate limit buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitWindow {
    pub hour_bucket_count: u32,
    pub day_bucket_count: u32,
    /// Start of the UTC hour the hourly count belongs to
    pub window_start_hour: Option<DateTime<Utc>>,
    /// Start of the UTC day the daily count belongs to
    pub window_start_day: Option<DateTime<Utc>>,
}

/// Counters and last-run details of the monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorState {
    pub last_distribution_timestamp: Option<DateTime<Utc>>,
    pub distributions_today: u32,
    pub distributions_total: u64,
    pub last_consolidation_timestamp: Option<DateTime<Utc>>,
    pub consolidations_total: u64,
    pub error_count: u32,
    pub emergency_stopped: bool,
    pub rate_window: RateLimitWindow,
    pub last_txid: Option<String>,
    pub last_explorer_link: Option<String>,
    /// Wallet balance seen by the last completed check, in satoshis
    pub last_balance: Option<u64>,
}

impl MonitorState {
    /// Record a committed distribution
    ///
    /// The rate window must already have been advanced by the limiter.
    pub fn record_distribution(&mut self, now: DateTime<Utc>, txid: &str, explorer_url: &str) {
        self.last_distribution_timestamp = Some(now);
        self.distributions_today = self.rate_window.day_bucket_count;
        self.distributions_total += 1;
        self.record_txid(txid, explorer_url);
    }

    /// Record a committed consolidation
    pub fn record_consolidation(&mut self, now: DateTime<Utc>, txid: &str, explorer_url: &str) {
        self.last_consolidation_timestamp = Some(now);
        self.consolidations_total += 1;
        self.record_txid(txid, explorer_url);
    }

    fn record_txid(&mut self, txid: &str, explorer_url: &str) {
        self.last_txid = Some(txid.to_string());
        self.last_explorer_link = Some(explorer_link(explorer_url, txid));
    }

    /// Count a policy or transient abort
    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    /// Decay the error count after a clean cycle
    pub fn decay_errors(&mut self) {
        self.error_count = self.error_count.saturating_sub(1);
    }
}

/// Explorer page of a transaction
pub fn explorer_link(explorer_url: &str, txid: &str) -> String {
    format!("{}/tx/{}", explorer_url.trim_end_matches('/'), txid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_is_zeroed() {
        let state = MonitorState::default();
        assert_eq!(state.distributions_total, 0);
        assert_eq!(state.error_count, 0);
        assert!(!state.emergency_stopped);
        assert!(state.last_txid.is_none());
    }

    #[test]
    fn test_record_distribution() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let mut state = MonitorState::default();
        state.rate_window.day_bucket_count = 2;

        state.record_distribution(now, "abcd", "https://explorer.example/");
        assert_eq!(state.last_distribution_timestamp, Some(now));
        assert_eq!(state.distributions_today, 2);
        assert_eq!(state.distributions_total, 1);
        assert_eq!(state.last_txid.as_deref(), Some("abcd"));
        assert_eq!(
            state.last_explorer_link.as_deref(),
            Some("https://explorer.example/tx/abcd")
        );
    }

    #[test]
    fn test_error_count_decay() {
        let mut state = MonitorState::default();
        state.decay_errors();
        assert_eq!(state.error_count, 0);

        state.record_error();
        state.record_error();
        state.decay_errors();
        assert_eq!(state.error_count, 1);
    }

    #[test]
    fn test_missing_fields_default() {
        let state: MonitorState =
            serde_json::from_str(r#"{"distributions_total": 4, "error_count": 2}"#).unwrap();
        assert_eq!(state.distributions_total, 4);
        assert_eq!(state.error_count, 2);
        assert_eq!(state.rate_window, RateLimitWindow::default());
        assert!(state.last_balance.is_none());
    }
}
