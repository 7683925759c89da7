// Timeframe-aware expiry for cache entries

use super::keys::{BarInterval, DataRequest, DataSpan};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpiryPolicy {
    Never,
    After { seconds: i64 },
}

impl ExpiryPolicy {
    pub fn after(duration: Duration) -> Self {
        ExpiryPolicy::After {
            seconds: duration.num_seconds(),
        }
    }

    /// Checked lazily on read against the entry's creation time
    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            ExpiryPolicy::Never => false,
            ExpiryPolicy::After { seconds } => match Duration::try_seconds(*seconds) {
                Some(ttl) => now.signed_duration_since(created_at) > ttl,
                // Beyond chrono's range, so effectively unbounded
                None => false,
            },
        }
    }
}

/// Longest TTL a configuration may ask for (ten years)
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

/// TTLs per interval class. Finer bars go stale sooner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirySettings {
    #[serde(default = "default_sub_hourly_hours")]
    pub sub_hourly_hours: i64,
    #[serde(default = "default_intraday_hours")]
    pub intraday_hours: i64,
    #[serde(default = "default_daily_hours")]
    pub daily_hours: i64,
    /// Explicit ranges that ended in the past never change
    #[serde(default = "default_true")]
    pub freeze_closed_ranges: bool,
}

fn default_sub_hourly_hours() -> i64 { 12 }
fn default_intraday_hours() -> i64 { 24 }
fn default_daily_hours() -> i64 { 168 }
fn default_true() -> bool { true }

impl Default for ExpirySettings {
    fn default() -> Self {
        Self {
            sub_hourly_hours: default_sub_hourly_hours(),
            intraday_hours: default_intraday_hours(),
            daily_hours: default_daily_hours(),
            freeze_closed_ranges: default_true(),
        }
    }
}

impl ExpirySettings {
    pub fn ttl_for(&self, interval: BarInterval) -> Duration {
        let hours = match interval.minutes() {
            m if m < 60 => self.sub_hourly_hours,
            m if m < 1440 => self.intraday_hours,
            _ => self.daily_hours,
        };
        Duration::hours(hours.clamp(0, MAX_TTL_HOURS))
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, hours) in [
            ("expiry.sub_hourly_hours", self.sub_hourly_hours),
            ("expiry.intraday_hours", self.intraday_hours),
            ("expiry.daily_hours", self.daily_hours),
        ] {
            if !(1..=MAX_TTL_HOURS).contains(&hours) {
                return Err(format!("{} must be within 1-{}, got {}", name, MAX_TTL_HOURS, hours));
            }
        }
        Ok(())
    }

    /// Policy for entries derived from `request`, evaluated at `now`
    pub fn policy_for(&self, request: &DataRequest, now: DateTime<Utc>) -> ExpiryPolicy {
        if self.freeze_closed_ranges {
            if let DataSpan::Range { end, .. } = request.span {
                if end <= now {
                    return ExpiryPolicy::Never;
                }
            }
        }
        ExpiryPolicy::after(self.ttl_for(request.interval))
    }
}
