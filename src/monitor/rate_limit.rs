//! Hourly and daily distribution caps
//!
//! Counters live in UTC wall-clock buckets. A bucket resets the instant the
//! hour (or day) changes, no matter when inside the previous bucket the last
//! distribution happened. Runs at the end of one hour and the start of the
//! next can therefore reach up to twice the hourly cap within sixty minutes.

use crate::monitor::state::RateLimitWindow;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;

/// Why a distribution was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Denial {
    HourlyCap { count: u32, max: u32 },
    DailyCap { count: u32, max: u32 },
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::HourlyCap { count, max } => {
                write!(f, "hourly limit reached ({}/{})", count, max)
            }
            Denial::DailyCap { count, max } => write!(f, "daily limit reached ({}/{})", count, max),
        }
    }
}

/// Outcome of a permit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Allowed,
    Denied(Denial),
}

impl Permit {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Permit::Allowed)
    }
}

/// Caps committed distributions per UTC hour and day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiter {
    pub max_per_hour: u32,
    pub max_per_day: u32,
}

fn hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::hours(1)).unwrap_or(now)
}

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::days(1)).unwrap_or(now)
}

impl RateLimiter {
    pub fn new(max_per_hour: u32, max_per_day: u32) -> Self {
        Self {
            max_per_hour,
            max_per_day,
        }
    }

    /// Counts as they stand at `now`, after any bucket rollover
    pub fn current_counts(&self, window: &RateLimitWindow, now: DateTime<Utc>) -> (u32, u32) {
        let hour = if window.window_start_hour == Some(hour_start(now)) {
            window.hour_bucket_count
        } else {
            0
        };
        let day = if window.window_start_day == Some(day_start(now)) {
            window.day_bucket_count
        } else {
            0
        };
        (hour, day)
    }

    /// Whether one more distribution fits in the current buckets
    pub fn permit(&self, window: &RateLimitWindow, now: DateTime<Utc>) -> Permit {
        let (hour, day) = self.current_counts(window, now);

        if hour >= self.max_per_hour {
            return Permit::Denied(Denial::HourlyCap {
                count: hour,
                max: self.max_per_hour,
            });
        }
        if day >= self.max_per_day {
            return Permit::Denied(Denial::DailyCap {
                count: day,
                max: self.max_per_day,
            });
        }
        Permit::Allowed
    }

    /// Move the window to the buckets containing `now`
    pub fn roll(&self, window: &mut RateLimitWindow, now: DateTime<Utc>) {
        let (hour, day) = self.current_counts(window, now);
        window.hour_bucket_count = hour;
        window.day_bucket_count = day;
        window.window_start_hour = Some(hour_start(now));
        window.window_start_day = Some(day_start(now));
    }

    /// Count a committed distribution
    pub fn record(&self, window: &mut RateLimitWindow, now: DateTime<Utc>) {
        self.roll(window, now);
        window.hour_bucket_count += 1;
        window.day_bucket_count += 1;
    }
}
