// src/rate_limit.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::StoreError;

/// Extra lifetime given to counter keys past the end of their window
pub const COUNTER_TTL_GRACE: Duration = Duration::from_secs(60);

/// Fixed, calendar-aligned rate-limit window.
///
/// Windows are aligned to the UNIX epoch, so a "minute" window resets at
/// every whole minute of wall-clock time rather than a minute after the
/// first request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateWindow {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    pub fn as_secs(&self) -> u64 {
        match self {
            RateWindow::Second => 1,
            RateWindow::Minute => 60,
            RateWindow::Hour => 3_600,
            RateWindow::Day => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateWindow::Second => "second",
            RateWindow::Minute => "minute",
            RateWindow::Hour => "hour",
            RateWindow::Day => "day",
        }
    }

    /// Index of the window containing `unix_secs`
    pub fn bucket(&self, unix_secs: u64) -> u64 {
        unix_secs / self.as_secs()
    }

    /// Counter key for `identifier` in the window containing `unix_secs`
    pub fn counter_key(&self, prefix: &str, identifier: &str, unix_secs: u64) -> String {
        format!(
            "{}:{}:{}:{}",
            prefix,
            identifier,
            self.as_str(),
            self.bucket(unix_secs)
        )
    }

    /// Time left until the window containing `unix_secs` ends
    pub fn reset_after(&self, unix_secs: u64) -> Duration {
        let window_end = (self.bucket(unix_secs) + 1) * self.as_secs();
        Duration::from_secs(window_end.saturating_sub(unix_secs))
    }

    /// TTL applied to a counter key when it is created
    pub fn counter_ttl(&self) -> Duration {
        self.duration() + COUNTER_TTL_GRACE
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateWindow {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" | "sec" | "s" => Ok(RateWindow::Second),
            "minute" | "min" | "m" => Ok(RateWindow::Minute),
            "hour" | "h" => Ok(RateWindow::Hour),
            "day" | "d" => Ok(RateWindow::Day),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown rate limit window '{}'",
                other
            ))),
        }
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Requests counted in the current window, this one included if allowed
    pub current_count: u64,

    pub limit: u64,

    /// Remaining allowed requests in the current window
    pub remaining: u64,

    /// When the window resets
    pub reset_after: Duration,

    pub window: RateWindow,
}

impl RateLimitStatus {
    pub fn new(allowed: bool, current_count: u64, limit: u64, window: RateWindow, now: u64) -> Self {
        Self {
            allowed,
            current_count,
            limit,
            remaining: limit.saturating_sub(current_count),
            reset_after: window.reset_after(now),
            window,
        }
    }
}

/// Seconds since the UNIX epoch
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window_names() {
        assert_eq!("minute".parse::<RateWindow>().unwrap(), RateWindow::Minute);
        assert_eq!(" Hour ".parse::<RateWindow>().unwrap(), RateWindow::Hour);
        assert_eq!("s".parse::<RateWindow>().unwrap(), RateWindow::Second);
        assert_eq!("day".parse::<RateWindow>().unwrap(), RateWindow::Day);
        assert!(matches!(
            "fortnight".parse::<RateWindow>(),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_windows_are_calendar_aligned() {
        let window = RateWindow::Minute;

        // 12:00:00 and 12:00:59 share a bucket, 12:01:00 starts a new one
        let noon = 1_700_049_600;
        assert_eq!(window.bucket(noon), window.bucket(noon + 59));
        assert_ne!(window.bucket(noon), window.bucket(noon + 60));

        assert_eq!(window.reset_after(noon), Duration::from_secs(60));
        assert_eq!(window.reset_after(noon + 45), Duration::from_secs(15));
    }

    #[test]
    fn test_counter_keys_are_scoped() {
        let now = 1_700_049_600;
        let a = RateWindow::Minute.counter_key("ratelimit", "user1", now);
        let b = RateWindow::Minute.counter_key("ratelimit", "user2", now);
        let c = RateWindow::Hour.counter_key("ratelimit", "user1", now);

        assert_eq!(a, format!("ratelimit:user1:minute:{}", now / 60));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_status_remaining() {
        let status = RateLimitStatus::new(true, 2, 3, RateWindow::Minute, 1_700_049_630);
        assert_eq!(status.remaining, 1);
        assert_eq!(status.reset_after, Duration::from_secs(30));

        let denied = RateLimitStatus::new(false, 3, 3, RateWindow::Minute, 1_700_049_630);
        assert_eq!(denied.remaining, 0);
    }
}
