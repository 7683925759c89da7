//! Market-data cache
//!
//! Keyed on the semantic data request; entries expire by interval class.

use super::expiry::ExpirySettings;
use super::keys::{CacheKey, DataRequest};
use super::{EntryStore, Fetched};
use crate::backtesting::MarketData;
use crate::error::OptimizerResult;
use crate::transport::Transport;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct MarketDataCache {
    store: EntryStore,
    expiry: ExpirySettings,
}

impl MarketDataCache {
    pub fn new(transport: Arc<dyn Transport>, namespace: &str, expiry: ExpirySettings) -> Self {
        Self {
            store: EntryStore::new(transport, namespace),
            expiry,
        }
    }

    pub fn key_for(&self, request: &DataRequest) -> CacheKey {
        CacheKey::data(request)
    }

    /// Cached data for `request`, calling `loader` on a miss, an expired entry,
    /// or an unreadable entry
    pub fn fetch_or_load<F>(&self, request: &DataRequest, loader: F) -> OptimizerResult<Fetched<MarketData>>
    where
        F: FnOnce() -> OptimizerResult<MarketData>,
    {
        let key = self.key_for(request);
        let policy = self.expiry.policy_for(request, Utc::now());
        let fetched = self.store.fetch_or_insert_with(&key, policy, loader)?;
        if !fetched.outcome.is_hit() {
            info!(
                "📥 Cached {} bars for {} ({:?})",
                fetched.value.len(),
                request.asset_id(),
                fetched.outcome
            );
        }
        Ok(fetched)
    }
}
