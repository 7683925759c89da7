// Validity filter applied to every result row before selection

use crate::optimization::RunMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterThresholds {
    pub min_trades: u64,
    /// Percent, 0-100
    pub min_win_rate: f64,
    /// Ceiling on max drawdown, percent
    pub max_drawdown: f64,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            min_trades: 10,
            min_win_rate: 0.0,
            max_drawdown: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    TooFewTrades,
    LowWinRate,
    ExcessiveDrawdown,
    NonPositivePnl,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterReason::TooFewTrades => "too_few_trades",
            FilterReason::LowWinRate => "low_win_rate",
            FilterReason::ExcessiveDrawdown => "excessive_drawdown",
            FilterReason::NonPositivePnl => "non_positive_pnl",
        };
        write!(f, "{}", name)
    }
}

impl FilterThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.min_win_rate) {
            return Err(format!("filters.min_win_rate must be within 0-100, got {}", self.min_win_rate));
        }
        if !self.max_drawdown.is_finite() || self.max_drawdown < 0.0 {
            return Err(format!("filters.max_drawdown must be non-negative, got {}", self.max_drawdown));
        }
        Ok(())
    }

    /// Every check the row fails; empty means the row is kept
    pub fn failures(&self, metrics: &RunMetrics) -> Vec<FilterReason> {
        let mut reasons = Vec::new();
        if metrics.total_trades < self.min_trades {
            reasons.push(FilterReason::TooFewTrades);
        }
        if !(metrics.win_rate >= self.min_win_rate) {
            reasons.push(FilterReason::LowWinRate);
        }
        if !(metrics.max_drawdown <= self.max_drawdown) {
            reasons.push(FilterReason::ExcessiveDrawdown);
        }
        if !(metrics.final_pnl > 0.0) {
            reasons.push(FilterReason::NonPositivePnl);
        }
        reasons
    }

    pub fn passes(&self, metrics: &RunMetrics) -> bool {
        self.failures(metrics).is_empty()
    }
}
