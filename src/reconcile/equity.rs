// Equity curves rebuilt from pooled order records

use crate::error::{OptimizerError, OptimizerResult};
use crate::records::OrderRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub datetime: DateTime<Utc>,
    pub asset_id: String,
    pub pnl: f64,
    pub cumulative_pnl: f64,
    pub balance: f64,
    /// Percent below the running peak
    pub drawdown_pct: f64,
    pub source_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquitySummary {
    pub trades: usize,
    pub starting_balance: f64,
    pub ending_balance: f64,
    pub total_pnl: f64,
    pub return_pct: f64,
    pub max_drawdown_pct: f64,
    pub winning_trades: usize,
    pub first_trade: Option<DateTime<Utc>>,
    pub last_trade: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquityCurve {
    pub points: Vec<EquityPoint>,
    pub summary: EquitySummary,
}

/// Cumulative curve over `orders`, which are sorted chronologically here.
/// Equal timestamps keep their input order.
pub fn build_curve(mut orders: Vec<&OrderRecord>, starting_balance: f64) -> EquityCurve {
    orders.sort_by(|a, b| a.datetime.cmp(&b.datetime));

    let mut points = Vec::with_capacity(orders.len());
    let mut cumulative = 0.0;
    let mut peak = starting_balance;
    let mut max_drawdown: f64 = 0.0;
    let mut winning_trades = 0;

    for order in &orders {
        cumulative += order.pnl;
        if order.pnl > 0.0 {
            winning_trades += 1;
        }
        let balance = starting_balance + cumulative;
        if balance > peak {
            peak = balance;
        }
        let drawdown = if peak > 0.0 { (peak - balance) / peak * 100.0 } else { 0.0 };
        max_drawdown = max_drawdown.max(drawdown);

        points.push(EquityPoint {
            datetime: order.datetime,
            asset_id: order.asset_id(),
            pnl: order.pnl,
            cumulative_pnl: cumulative,
            balance,
            drawdown_pct: drawdown,
            source_file: order.source_file.clone(),
        });
    }

    let ending_balance = starting_balance + cumulative;
    let summary = EquitySummary {
        trades: orders.len(),
        starting_balance,
        ending_balance,
        total_pnl: cumulative,
        return_pct: if starting_balance > 0.0 {
            cumulative / starting_balance * 100.0
        } else {
            0.0
        },
        max_drawdown_pct: max_drawdown,
        winning_trades,
        first_trade: orders.first().map(|o| o.datetime),
        last_trade: orders.last().map(|o| o.datetime),
    };

    EquityCurve { points, summary }
}

/// Balance before the chronologically first trade
pub fn starting_balance(orders: &[&OrderRecord]) -> f64 {
    orders
        .iter()
        .min_by(|a, b| a.datetime.cmp(&b.datetime))
        .map(|o| o.balance_before)
        .unwrap_or(0.0)
}

pub fn curve_csv(points: &[EquityPoint]) -> OptimizerResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "datetime",
        "asset_id",
        "pnl",
        "cumulative_pnl",
        "balance",
        "drawdown_pct",
        "source_file",
    ])?;
    for p in points {
        writer.write_record([
            p.datetime.to_rfc3339_opts(SecondsFormat::Secs, true),
            p.asset_id.clone(),
            p.pnl.to_string(),
            p.cumulative_pnl.to_string(),
            p.balance.to_string(),
            format!("{:.4}", p.drawdown_pct),
            p.source_file.clone(),
        ])?;
    }
    writer.into_inner().map_err(|e| OptimizerError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::ParameterSet;
    use chrono::TimeZone;

    fn order(hour: u32, pnl: f64, before: f64) -> OrderRecord {
        OrderRecord {
            optimization_run: None,
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            entry_time: None,
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            pnl,
            balance_before: before,
            balance_after: before + pnl,
            parameters: ParameterSet::from_values(Default::default()),
            source_file: "orders/a.csv".to_string(),
        }
    }

    #[test]
    fn test_curve_sorted_and_summarized() {
        let orders = [order(3, -50.0, 1100.0), order(1, 100.0, 1000.0), order(5, 25.0, 1050.0)];
        let refs: Vec<&OrderRecord> = orders.iter().collect();
        let start = starting_balance(&refs);
        assert_eq!(start, 1000.0);

        let curve = build_curve(refs, start);
        let balances: Vec<f64> = curve.points.iter().map(|p| p.balance).collect();
        assert_eq!(balances, vec![1100.0, 1050.0, 1075.0]);
        assert_eq!(curve.summary.trades, 3);
        assert_eq!(curve.summary.ending_balance, 1075.0);
        assert!((curve.summary.return_pct - 7.5).abs() < 1e-9);
        assert!((curve.summary.max_drawdown_pct - 50.0 / 1100.0 * 100.0).abs() < 1e-9);
        assert_eq!(curve.summary.winning_trades, 2);
    }

    #[test]
    fn test_empty_curve() {
        let curve = build_curve(Vec::new(), 0.0);
        assert!(curve.points.is_empty());
        assert_eq!(curve.summary.return_pct, 0.0);
        assert_eq!(curve.summary.first_trade, None);
    }

    #[test]
    fn test_curve_csv_header() {
        let orders = [order(1, 10.0, 100.0)];
        let curve = build_curve(orders.iter().collect(), 100.0);
        let text = String::from_utf8(curve_csv(&curve.points).unwrap()).unwrap();
        assert!(text.starts_with("datetime,asset_id,pnl,cumulative_pnl,balance,drawdown_pct,source_file"));
        assert_eq!(text.lines().count(), 2);
    }
}
