//! Automated monitoring
//!
//! Runs distribution cycles on a timer behind an emergency stop, a
//! process-wide lock, and hourly/daily rate limits, persisting counters
//! between runs.

pub mod clock;
pub mod emergency;
pub mod lock;
pub mod rate_limit;
pub mod scheduler;
pub mod state;

pub use clock::{Clock, Sleeper, SystemClock, ThreadSleeper};
pub use emergency::{EmergencyGate, FileEmergencyGate};
pub use lock::{CycleLock, CycleLockGuard, LockError, DEFAULT_STALE_AFTER};
pub use rate_limit::{Denial, Permit, RateLimiter};
pub use scheduler::{
    record_partial_broadcast, settle_state, CycleReport, DistributionStep, MonitorLoop,
};
pub use state::{explorer_link, MonitorState, RateLimitWindow};
