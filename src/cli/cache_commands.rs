// Cache maintenance commands
use crate::CacheTarget;
use strategy_optimizer::{CacheKind, CacheMaintenance, OptimizerConfig, OptimizerResult};
use tracing::{info, warn};

fn kinds(target: CacheTarget) -> Vec<CacheKind> {
    match target {
        CacheTarget::MarketData => vec![CacheKind::MarketData],
        CacheTarget::Results => vec![CacheKind::Result],
        CacheTarget::All => vec![CacheKind::MarketData, CacheKind::Result],
    }
}

fn maintenance(config: &OptimizerConfig) -> CacheMaintenance {
    CacheMaintenance::new(config.cache_transport(), &config.storage.cache_prefix)
}

pub fn stats(target: CacheTarget, config: &OptimizerConfig) -> OptimizerResult<()> {
    let cache = maintenance(config);
    info!("📦 Cache: {}", config.storage.cache_prefix);
    for kind in kinds(target) {
        let stats = cache.stats(kind)?;
        info!(
            "   {}: {} entries, {:.2} MB",
            kind.dir_name(),
            stats.entries,
            stats.total_bytes as f64 / (1024.0 * 1024.0)
        );
        if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
            info!("     oldest {}  newest {}", oldest.format("%Y-%m-%d %H:%M"), newest.format("%Y-%m-%d %H:%M"));
        }
    }
    Ok(())
}

pub fn sweep(target: CacheTarget, config: &OptimizerConfig) -> OptimizerResult<()> {
    let cache = maintenance(config);
    for kind in kinds(target) {
        let report = cache.sweep_expired(kind)?;
        info!("✅ {}: deleted {} of {} entries", kind.dir_name(), report.deleted, report.scanned);
    }
    Ok(())
}

pub fn clear(target: CacheTarget, confirmed: bool, config: &OptimizerConfig) -> OptimizerResult<()> {
    if !confirmed {
        warn!("⚠️  This deletes every {:?} cache entry; re-run with --yes", target);
        return Ok(());
    }
    let cache = maintenance(config);
    for kind in kinds(target) {
        let deleted = cache.clear(kind)?;
        info!("🧹 {}: deleted {} entries", kind.dir_name(), deleted);
    }
    Ok(())
}
