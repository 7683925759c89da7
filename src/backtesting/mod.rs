// Backtest collaborator interfaces and the data that crosses them
//
// Indicator math and order simulation live outside this crate. The optimizer
// only needs bars in, metrics and a trade log out.

pub mod command;
pub mod csv_loader;

use crate::cache::keys::DataRequest;
use crate::optimization::params::ParameterSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use command::CommandBacktester;
pub use csv_loader::CsvMarketDataLoader;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub interval: String,
    pub bars: Vec<Bar>,
}

impl MarketData {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Summary metrics reported by the backtest engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub final_pnl: f64,
    pub total_trades: u64,
    /// Percent, 0-100
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    /// Percent of peak equity, positive
    pub max_drawdown: f64,
}

/// One closed trade from the engine's trade log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub balance_before: f64,
    pub balance_after: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestOutput {
    pub metrics: BacktestMetrics,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum BacktestError {
    #[error("Engine could not be started: {0}")]
    Spawn(String),

    #[error("Engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Engine output could not be parsed: {0}")]
    BadOutput(String),

    #[error("Market data unavailable: {0}")]
    Data(String),
}

impl From<BacktestError> for crate::error::OptimizerError {
    fn from(err: BacktestError) -> Self {
        match err {
            BacktestError::Data(msg) => crate::error::OptimizerError::DataLoad(msg),
            other => crate::error::OptimizerError::Backtest(other.to_string()),
        }
    }
}

/// `run_backtest(market_data, parameters) -> (metrics, trade_log)`
pub trait Backtester {
    fn run_backtest(&self, data: &MarketData, params: &ParameterSet) -> Result<BacktestOutput, BacktestError>;
}

impl<F> Backtester for F
where
    F: Fn(&MarketData, &ParameterSet) -> Result<BacktestOutput, BacktestError>,
{
    fn run_backtest(&self, data: &MarketData, params: &ParameterSet) -> Result<BacktestOutput, BacktestError> {
        self(data, params)
    }
}

/// Fetches market data for a request on a cache miss
pub trait MarketDataLoader {
    fn load(&self, request: &DataRequest) -> Result<MarketData, BacktestError>;
}

impl<F> MarketDataLoader for F
where
    F: Fn(&DataRequest) -> Result<MarketData, BacktestError>,
{
    fn load(&self, request: &DataRequest) -> Result<MarketData, BacktestError> {
        self(request)
    }
}
