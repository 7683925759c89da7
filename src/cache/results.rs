//! Backtest result cache
//!
//! Keyed on (data key, canonical parameters). Restarting a search re-derives
//! the same keys and skips everything already stored, no matter which worker
//! stored it. Racing workers may both compute a key; the values are
//! equivalent so whichever write lands last is fine.

use super::expiry::ExpiryPolicy;
use super::keys::CacheKey;
use super::{EntryStore, Fetched};
use crate::backtesting::BacktestOutput;
use crate::error::OptimizerResult;
use crate::optimization::params::ParameterSet;
use crate::transport::Transport;
use std::sync::Arc;

pub struct ResultCache {
    store: EntryStore,
}

impl ResultCache {
    pub fn new(transport: Arc<dyn Transport>, namespace: &str) -> Self {
        Self {
            store: EntryStore::new(transport, namespace),
        }
    }

    pub fn key_for(&self, data_key: &CacheKey, params: &ParameterSet) -> CacheKey {
        CacheKey::result(data_key, params)
    }

    pub fn fetch_or_compute<F>(
        &self,
        result_key: &CacheKey,
        expiry: ExpiryPolicy,
        compute: F,
    ) -> OptimizerResult<Fetched<BacktestOutput>>
    where
        F: FnOnce() -> OptimizerResult<BacktestOutput>,
    {
        self.store.fetch_or_insert_with(result_key, expiry, compute)
    }

    pub fn contains(&self, result_key: &CacheKey) -> bool {
        self.store.contains::<BacktestOutput>(result_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtesting::BacktestMetrics;
    use crate::cache::{CacheOutcome, DataRequest, DataSpan};
    use crate::optimization::params::{ParamValue, ParameterSchema};
    use crate::transport::LocalTransport;

    fn output(pnl: f64) -> BacktestOutput {
        BacktestOutput {
            metrics: BacktestMetrics {
                final_pnl: pnl,
                total_trades: 12,
                win_rate: 55.0,
                sharpe_ratio: 1.2,
                max_drawdown: 8.0,
            },
            trades: Vec::new(),
        }
    }

    #[test]
    fn test_idempotent_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(LocalTransport::new(dir.path()));
        let schema = ParameterSchema::bb_vwap();
        let data_key = CacheKey::data(&DataRequest::new(
            "crypto",
            "BTCUSDT",
            "1h".parse().unwrap(),
            DataSpan::Lookback { days: 30 },
        ));
        let params = schema
            .build_with_defaults(vec![("bb_window", ParamValue::Int(25))])
            .unwrap();

        // Two workers racing on the same key, each with its own cache handle
        let worker_a = ResultCache::new(transport.clone(), "cache");
        let worker_b = ResultCache::new(transport.clone(), "cache");
        let key = worker_a.key_for(&data_key, &params);
        assert_eq!(key, worker_b.key_for(&data_key, &params));

        let a = worker_a.fetch_or_compute(&key, ExpiryPolicy::Never, || Ok(output(100.0))).unwrap();
        assert_eq!(a.outcome, CacheOutcome::Miss);
        // A second writer overwrites with an equivalent value
        let store = EntryStore::new(transport.clone(), "cache");
        store
            .store(&key, ExpiryPolicy::Never, &output(100.0), chrono::Utc::now())
            .unwrap();

        let read = worker_b
            .fetch_or_compute(&key, ExpiryPolicy::Never, || Ok(output(-1.0)))
            .unwrap();
        assert!(read.outcome.is_hit());
        assert_eq!(read.value, a.value);
        assert!(worker_b.contains(&key));
    }
}
