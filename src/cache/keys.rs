//! Content-addressed cache keys
//!
//! Keys are SHA-256 digests of the *semantic* identity of a request. Inputs are
//! normalized first (symbol case, interval spelling, extras ordering) so that
//! equivalent requests written differently still share a key.

use crate::optimization::params::ParameterSet;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Bar interval normalized to whole minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BarInterval {
    minutes: u32,
}

impl BarInterval {
    pub fn from_minutes(minutes: u32) -> Self {
        Self { minutes }
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes as i64)
    }
}

impl FromStr for BarInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (digits, unit) = raw.split_at(split);

        let count: u32 = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| format!("invalid interval '{}'", s))?
        };

        let per_unit = match unit {
            "" | "m" | "min" | "mins" | "minute" | "minutes" | "t" => 1,
            "h" | "hr" | "hour" | "hours" => 60,
            "d" | "day" | "days" => 1440,
            "w" | "wk" | "week" | "weeks" => 10080,
            _ => return Err(format!("invalid interval unit in '{}'", s)),
        };

        let minutes = count
            .checked_mul(per_unit)
            .ok_or_else(|| format!("interval '{}' is too large", s))?;
        if minutes == 0 {
            return Err(format!("interval '{}' must be positive", s));
        }
        Ok(Self { minutes })
    }
}

impl fmt::Display for BarInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.minutes;
        if m % 10080 == 0 {
            write!(f, "{}w", m / 10080)
        } else if m % 1440 == 0 {
            write!(f, "{}d", m / 1440)
        } else if m % 60 == 0 {
            write!(f, "{}h", m / 60)
        } else {
            write!(f, "{}m", m)
        }
    }
}

impl TryFrom<String> for BarInterval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BarInterval> for String {
    fn from(value: BarInterval) -> Self {
        value.to_string()
    }
}

/// Longest trailing window a configuration may request (a century)
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Requested history: a trailing duration or an explicit `[start, end)` range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSpan {
    Lookback { days: u32 },
    Range { start: DateTime<Utc>, end: DateTime<Utc> },
}

impl DataSpan {
    fn canonical(&self) -> String {
        match self {
            DataSpan::Lookback { days } => format!("lookback:{}d", days),
            DataSpan::Range { start, end } => format!(
                "range:{}/{}",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
                end.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
        }
    }

    /// Resolve to concrete bounds relative to `now`; `None` when a lookback
    /// reaches past the representable calendar
    pub fn bounds(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            DataSpan::Lookback { days } => {
                let window = Duration::try_days(i64::from(*days))?;
                Some((now.checked_sub_signed(window)?, now))
            }
            DataSpan::Range { start, end } => Some((*start, *end)),
        }
    }
}

/// A market-data request as passed to the loader collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub asset_category: String,
    pub symbol: String,
    pub interval: BarInterval,
    pub span: DataSpan,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl DataRequest {
    pub fn new(asset_category: &str, symbol: &str, interval: BarInterval, span: DataSpan) -> Self {
        Self {
            asset_category: asset_category.trim().to_ascii_lowercase(),
            symbol: symbol.trim().to_ascii_uppercase(),
            interval,
            span,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extras
            .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        self
    }

    /// `SYMBOL_interval`, used in file names and asset grouping
    pub fn asset_id(&self) -> String {
        format!("{}_{}", self.symbol.trim().to_ascii_uppercase(), self.interval)
    }

    fn canonical(&self) -> String {
        let extras = self
            .extras
            .iter()
            .map(|(k, v)| format!("{}={}", k.trim().to_ascii_lowercase(), v.trim()))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "category={}|symbol={}|interval={}m|span={}|extras={}",
            self.asset_category.trim().to_ascii_lowercase(),
            self.symbol.trim().to_ascii_uppercase(),
            self.interval.minutes(),
            self.span.canonical(),
            extras
        )
    }
}

/// Which cache namespace a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    MarketData,
    Result,
}

impl CacheKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            CacheKind::MarketData => "market_data",
            CacheKind::Result => "results",
        }
    }
}

/// Deterministic fingerprint; equality is exact string equality
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    kind: CacheKind,
    digest: String,
}

impl CacheKey {
    /// Key for a market-data request
    pub fn data(request: &DataRequest) -> Self {
        Self {
            kind: CacheKind::MarketData,
            digest: digest(&request.canonical()),
        }
    }

    /// Key for one backtest: data identity plus canonical parameters
    pub fn result(data_key: &CacheKey, parameters: &ParameterSet) -> Self {
        let material = format!("{}|params:{}", data_key.digest, parameters.canonical_string());
        Self {
            kind: CacheKind::Result,
            digest: digest(&material),
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Object key under a cache namespace, sharded by the first digest byte
    pub fn storage_key(&self, namespace: &str) -> String {
        crate::transport::join_key(&[
            namespace,
            self.kind.dir_name(),
            &self.digest[..2],
            &format!("{}.json", self.digest),
        ])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            CacheKind::MarketData => "data",
            CacheKind::Result => "result",
        };
        write!(f, "{}-{}", tag, self.digest)
    }
}

fn digest(material: &str) -> String {
    hex::encode(Sha256::digest(material.as_bytes()))
}
