//! Parameter search
//!
//! `params` defines the typed parameter schema, `space` enumerates candidate
//! sets (grid or seeded random), and `driver` evaluates them one at a time
//! through the result cache.

pub mod driver;
pub mod params;
pub mod space;

use serde::{Deserialize, Serialize};

pub use driver::{SearchDriver, SearchSettings, SearchState, SearchSummary, StorageLayout};
pub use params::{ParamField, ParamGroup, ParamKind, ParamValue, ParameterSchema, ParameterSet, SchemaError};
pub use space::{ParamRange, ParameterSpace, SearchMode, Shard};

/// Metrics recorded per evaluated combination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub final_pnl: f64,
    pub total_trades: u64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Wall-clock seconds for the evaluation
    pub execution_time: f64,
}

/// One evaluated parameter combination.
///
/// `run_id` is the 1-based row position inside `source_file`. It is only
/// unique within that file; rows from different files can share it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRun {
    pub run_id: usize,
    pub source_file: String,
    pub timestamp: String,
    pub symbol: String,
    pub interval: String,
    pub metrics: RunMetrics,
    pub parameters: ParameterSet,
}

impl OptimizationRun {
    /// `SYMBOL_interval`
    pub fn asset_id(&self) -> String {
        format!("{}_{}", self.symbol, self.interval)
    }
}

/// Best run seen so far per objective, threaded through the search loop as
/// plain state rather than globals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BestTrackers {
    pub best_pnl: Option<OptimizationRun>,
    pub best_sharpe: Option<OptimizationRun>,
    pub best_win_rate: Option<OptimizationRun>,
    pub lowest_drawdown: Option<OptimizationRun>,
}

impl BestTrackers {
    /// Fold one run in. Ties keep the earlier run.
    pub fn update(self, run: &OptimizationRun) -> Self {
        let m = &run.metrics;
        Self {
            best_pnl: keep_better(self.best_pnl, run, m.final_pnl, |best| m.final_pnl > best.metrics.final_pnl),
            best_sharpe: keep_better(self.best_sharpe, run, m.sharpe_ratio, |best| {
                m.sharpe_ratio > best.metrics.sharpe_ratio
            }),
            best_win_rate: keep_better(self.best_win_rate, run, m.win_rate, |best| {
                m.win_rate > best.metrics.win_rate
            }),
            lowest_drawdown: keep_better(self.lowest_drawdown, run, m.max_drawdown, |best| {
                m.max_drawdown < best.metrics.max_drawdown
            }),
        }
    }
}

/// A candidate whose tracked metric is NaN or infinite never becomes the best
fn keep_better<F>(
    current: Option<OptimizationRun>,
    candidate: &OptimizationRun,
    value: f64,
    beats: F,
) -> Option<OptimizationRun>
where
    F: Fn(&OptimizationRun) -> bool,
{
    if !value.is_finite() {
        return current;
    }
    match current {
        Some(best) if !beats(&best) => Some(best),
        _ => Some(candidate.clone()),
    }
}
