// Common test utilities and helpers
#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;
use strategy_optimizer::backtesting::{BacktestMetrics, Bar, TradeRecord};
use strategy_optimizer::{
    BacktestError, BacktestOutput, Backtester, DataRequest, DataSpan, LocalTransport, MarketData, OptimizationRun, ParamValue,
    ParameterSchema, ParameterSet, RunMetrics, Transport,
};
use tempfile::TempDir;

/// Local transport rooted in a fresh temporary directory
pub fn temp_transport() -> (TempDir, Arc<dyn Transport>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(dir.path()));
    (dir, transport)
}

pub fn btc_request() -> DataRequest {
    DataRequest::new(
        "crypto",
        "BTCUSDT",
        "1h".parse().expect("interval"),
        DataSpan::Lookback { days: 30 },
    )
}

/// Flat synthetic bars, one per hour
pub fn sample_market_data(request: &DataRequest, count: usize) -> MarketData {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let bars = (0..count)
        .map(|i| {
            let price = 100.0 + i as f64;
            Bar {
                timestamp: start + Duration::hours(i as i64),
                open: price,
                high: price + 1.0,
                low: price - 1.0,
                close: price,
                volume: 10.0,
            }
        })
        .collect();
    MarketData {
        symbol: request.symbol.clone(),
        interval: request.interval.to_string(),
        bars,
    }
}

/// Deterministic engine stand-in: PnL grows with `bb_window * bb_std`, one
/// trade per 5 bars of window. Counts its invocations.
pub struct FakeEngine {
    pub calls: Cell<usize>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self { calls: Cell::new(0) }
    }
}

impl Backtester for FakeEngine {
    fn run_backtest(&self, data: &MarketData, params: &ParameterSet) -> Result<BacktestOutput, BacktestError> {
        self.calls.set(self.calls.get() + 1);
        let window = params.get("bb_window").map(|v| v.as_f64()).unwrap_or(20.0);
        let std = params.get("bb_std").map(|v| v.as_f64()).unwrap_or(2.0);
        let trades = (window / 5.0) as u64;

        let start = data.bars.first().map(|b| b.timestamp).unwrap_or_else(Utc::now);
        let per_trade = window * std / trades.max(1) as f64;
        let mut balance = 1000.0;
        let trade_log = (0..trades)
            .map(|i| {
                let before = balance;
                balance += per_trade;
                TradeRecord {
                    entry_time: start + Duration::hours(i as i64 * 2),
                    exit_time: start + Duration::hours(i as i64 * 2 + 1),
                    pnl: per_trade,
                    balance_before: before,
                    balance_after: balance,
                }
            })
            .collect();

        Ok(BacktestOutput {
            metrics: BacktestMetrics {
                final_pnl: window * std,
                total_trades: trades,
                win_rate: 50.0 + std,
                sharpe_ratio: std,
                max_drawdown: 40.0 - window,
            },
            trades: trade_log,
        })
    }
}

pub fn params(values: &[(&str, ParamValue)]) -> ParameterSet {
    ParameterSchema::bb_vwap()
        .build_with_defaults(values.iter().map(|(k, v)| (k.to_string(), *v)))
        .expect("valid parameters")
}

/// Result row with the given metrics and default parameters plus `bb_window`
pub fn run_row(symbol: &str, interval: &str, pnl: f64, trades: u64, bb_window: i64) -> OptimizationRun {
    OptimizationRun {
        run_id: 0,
        source_file: String::new(),
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        metrics: RunMetrics {
            final_pnl: pnl,
            total_trades: trades,
            win_rate: 55.0,
            sharpe_ratio: 1.0,
            max_drawdown: 10.0,
            execution_time: 0.1,
        },
        parameters: params(&[("bb_window", ParamValue::Int(bb_window))]),
    }
}

pub fn values(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}
