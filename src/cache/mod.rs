//! Content-addressable cache over a `Transport`
//!
//! Entries are JSON envelopes (`CacheEntry`) holding the payload plus the key,
//! creation time and expiry policy. Entries are only ever replaced whole: a
//! miss, an expired entry, or an undeserializable entry all lead to the value
//! being produced again and overwritten. Workers share the store without
//! locks; values for one key are equivalent, so last write wins.

pub mod expiry;
pub mod keys;
pub mod market_data;
pub mod results;

use crate::error::{OptimizerError, OptimizerResult};
use crate::transport::{join_key, Transport};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use expiry::{ExpiryPolicy, ExpirySettings};
pub use keys::{BarInterval, CacheKey, CacheKind, DataRequest, DataSpan};
pub use market_data::MarketDataCache;
pub use results::ResultCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expiry: ExpiryPolicy,
    pub payload: T,
}

/// Envelope metadata without the payload, for maintenance passes
#[derive(Debug, Clone, Deserialize)]
struct EntryHeader {
    created_at: DateTime<Utc>,
    expiry: ExpiryPolicy,
}

/// How a lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Expired,
    Corrupt,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit)
    }
}

#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub outcome: CacheOutcome,
}

enum Lookup<T> {
    Hit(T),
    Miss,
    Expired,
    Corrupt(String),
}

/// Typed get/put of envelopes under one namespace
#[derive(Clone)]
pub(crate) struct EntryStore {
    transport: Arc<dyn Transport>,
    namespace: String,
}

impl EntryStore {
    pub(crate) fn new(transport: Arc<dyn Transport>, namespace: &str) -> Self {
        Self {
            transport,
            namespace: namespace.to_string(),
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn lookup<T: DeserializeOwned>(&self, key: &CacheKey, now: DateTime<Utc>) -> Lookup<T> {
        let storage_key = key.storage_key(&self.namespace);
        let bytes = match self.transport.get_opt(&storage_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                warn!("⚠️  Cache read failed for {}: {} (treating as miss)", key, e);
                return Lookup::Miss;
            }
        };

        match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
            Ok(entry) if entry.key != key.to_string() => {
                Lookup::Corrupt(format!("envelope key mismatch ({})", entry.key))
            }
            Ok(entry) if entry.expiry.is_expired(entry.created_at, now) => Lookup::Expired,
            Ok(entry) => Lookup::Hit(entry.payload),
            Err(e) => Lookup::Corrupt(e.to_string()),
        }
    }

    fn store<T: Serialize>(
        &self,
        key: &CacheKey,
        expiry: ExpiryPolicy,
        payload: &T,
        now: DateTime<Utc>,
    ) -> OptimizerResult<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            created_at: now,
            expiry,
            payload,
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.transport.put(&key.storage_key(&self.namespace), &bytes)?;
        Ok(())
    }

    /// Return the cached value or produce, store and return a fresh one.
    ///
    /// Producer errors propagate and nothing is stored. A failed cache write
    /// is logged and the produced value is still returned.
    pub(crate) fn fetch_or_insert_with<T, F>(
        &self,
        key: &CacheKey,
        expiry: ExpiryPolicy,
        produce: F,
    ) -> OptimizerResult<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> OptimizerResult<T>,
    {
        let now = Utc::now();
        let outcome = match self.lookup::<T>(key, now) {
            Lookup::Hit(value) => {
                debug!("Cache hit {}", key);
                return Ok(Fetched {
                    value,
                    outcome: CacheOutcome::Hit,
                });
            }
            Lookup::Miss => CacheOutcome::Miss,
            Lookup::Expired => {
                debug!("Cache entry {} expired, refreshing", key);
                CacheOutcome::Expired
            }
            Lookup::Corrupt(reason) => {
                let err = OptimizerError::CacheIntegrity {
                    key: key.to_string(),
                    reason,
                };
                warn!("⚠️  {} (recomputing)", err);
                CacheOutcome::Corrupt
            }
        };

        let value = produce()?;
        if let Err(e) = self.store(key, expiry, &value, Utc::now()) {
            warn!("⚠️  Failed to write cache entry {}: {}", key, e);
        }
        Ok(Fetched { value, outcome })
    }

    /// True when a fresh, readable entry exists
    pub(crate) fn contains<T: DeserializeOwned>(&self, key: &CacheKey) -> bool {
        matches!(self.lookup::<T>(key, Utc::now()), Lookup::Hit(_))
    }

    fn prefix(&self, kind: CacheKind) -> String {
        format!("{}/", join_key(&[&self.namespace, kind.dir_name()]))
    }
}

/// Entry count and size for one cache namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub corrupt: usize,
    pub deleted: usize,
}

/// Manual maintenance over a cache namespace
pub struct CacheMaintenance {
    store: EntryStore,
}

impl CacheMaintenance {
    pub fn new(transport: Arc<dyn Transport>, namespace: &str) -> Self {
        Self {
            store: EntryStore::new(transport, namespace),
        }
    }

    pub fn stats(&self, kind: CacheKind) -> OptimizerResult<CacheStats> {
        let objects = self.store.transport().list(&self.store.prefix(kind))?;
        let mut stats = CacheStats::default();
        for object in objects {
            stats.entries += 1;
            stats.total_bytes += object.size;
            stats.oldest = Some(stats.oldest.map_or(object.modified, |o| o.min(object.modified)));
            stats.newest = Some(stats.newest.map_or(object.modified, |n| n.max(object.modified)));
        }
        Ok(stats)
    }

    /// Delete expired and unreadable entries
    pub fn sweep_expired(&self, kind: CacheKind) -> OptimizerResult<SweepReport> {
        self.sweep_expired_at(kind, Utc::now())
    }

    pub fn sweep_expired_at(&self, kind: CacheKind, now: DateTime<Utc>) -> OptimizerResult<SweepReport> {
        let transport = self.store.transport();
        let objects = transport.list(&self.store.prefix(kind))?;
        let mut report = SweepReport::default();
        let mut doomed = Vec::new();

        for object in objects {
            report.scanned += 1;
            let bytes = match transport.get_opt(&object.key) {
                Ok(Some(bytes)) => bytes,
                // Removed by another worker in the meantime
                Ok(None) => continue,
                Err(e) => {
                    warn!("⚠️  Skipping {} during sweep: {}", object.key, e);
                    continue;
                }
            };

            match serde_json::from_slice::<EntryHeader>(&bytes) {
                Ok(header) if header.expiry.is_expired(header.created_at, now) => {
                    report.expired += 1;
                    doomed.push(object.key);
                }
                Ok(_) => {}
                Err(_) => {
                    report.corrupt += 1;
                    doomed.push(object.key);
                }
            }
        }

        if !doomed.is_empty() {
            report.deleted = transport.delete_many(&doomed)?;
        }
        info!(
            "🧹 Swept {} {} entries: {} expired, {} corrupt",
            report.scanned,
            kind.dir_name(),
            report.expired,
            report.corrupt
        );
        Ok(report)
    }

    /// Delete every entry of a kind
    pub fn clear(&self, kind: CacheKind) -> OptimizerResult<usize> {
        let transport = self.store.transport();
        let keys: Vec<String> = transport
            .list(&self.store.prefix(kind))?
            .into_iter()
            .map(|o| o.key)
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(transport.delete_many(&keys)?)
    }
}
