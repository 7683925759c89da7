// Loads bars from `{data_dir}/{SYMBOL}_{interval}.csv`

use super::{BacktestError, Bar, MarketData, MarketDataLoader};
use crate::cache::keys::DataRequest;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Clone)]
pub struct CsvMarketDataLoader {
    data_dir: PathBuf,
}

impl CsvMarketDataLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, request: &DataRequest) -> PathBuf {
        self.data_dir.join(format!("{}.csv", request.asset_id()))
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, or unix seconds
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

impl MarketDataLoader for CsvMarketDataLoader {
    fn load(&self, request: &DataRequest) -> Result<MarketData, BacktestError> {
        let path = self.path_for(request);
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| BacktestError::Data(format!("{}: {}", path.display(), e)))?;

        let (start, end) = request.span.bounds(Utc::now()).ok_or_else(|| {
            BacktestError::Data(format!("{}: requested span is out of range", request.asset_id()))
        })?;
        let mut bars = Vec::new();
        for row in reader.deserialize::<BarRow>() {
            let row = row.map_err(|e| BacktestError::Data(format!("{}: {}", path.display(), e)))?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
                BacktestError::Data(format!("{}: bad timestamp '{}'", path.display(), row.timestamp))
            })?;
            if timestamp >= start && timestamp < end {
                bars.push(Bar {
                    timestamp,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                });
            }
        }
        bars.sort_by_key(|b| b.timestamp);

        info!("📈 Loaded {} bars for {} from {}", bars.len(), request.asset_id(), path.display());
        Ok(MarketData {
            symbol: request.symbol.clone(),
            interval: request.interval.to_string(),
            bars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::DataSpan;
    use chrono::TimeZone;
    use std::fs;

    #[test]
    fn test_loads_and_trims_to_span() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BTCUSDT_1h.csv"),
            "timestamp,open,high,low,close,volume\n\
             2024-01-01T00:00:00Z,1,2,0.5,1.5,10\n\
             2024-01-01 01:00:00,1.5,2,1,1.8,12\n\
             1704074400,1.8,2.2,1.7,2.0,9\n\
             2024-02-01T00:00:00Z,2,3,1,2.5,4\n",
        )
        .unwrap();

        let request = DataRequest::new(
            "crypto",
            "btcusdt",
            "60m".parse().unwrap(),
            DataSpan::Range {
                start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            },
        );
        let data = CsvMarketDataLoader::new(dir.path()).load(&request).unwrap();

        assert_eq!(data.symbol, "BTCUSDT");
        assert_eq!(data.interval, "1h");
        assert_eq!(data.len(), 3);
        assert_eq!(data.bars[2].close, 2.0);
    }

    #[test]
    fn test_missing_file_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = DataRequest::new("crypto", "ETHUSDT", "1d".parse().unwrap(), DataSpan::Lookback { days: 5 });
        assert!(matches!(
            CsvMarketDataLoader::new(dir.path()).load(&request),
            Err(BacktestError::Data(_))
        ));
    }

    #[test]
    fn test_unrepresentable_lookback_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BTCUSDT_1h.csv"),
            "timestamp,open,high,low,close,volume\n2024-01-01T00:00:00Z,1,2,0.5,1.5,10\n",
        )
        .unwrap();
        let request = DataRequest::new(
            "crypto",
            "BTCUSDT",
            "1h".parse().unwrap(),
            DataSpan::Lookback { days: 4_000_000_000 },
        );
        assert!(matches!(
            CsvMarketDataLoader::new(dir.path()).load(&request),
            Err(BacktestError::Data(_))
        ));
    }
}
