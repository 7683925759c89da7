// Winner selection per objective within one asset group.
// Rows arrive in (file key, run_id) order; every rule keeps the earliest row
// on a full tie.

use crate::optimization::OptimizationRun;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const BALANCED_PNL_WEIGHT: f64 = 0.6;
const BALANCED_DRAWDOWN_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    FinalPnl,
    WinRate,
    MaxDrawdown,
    Balanced,
    SharpeRatio,
}

impl Objective {
    pub const ALL: [Objective; 5] = [
        Objective::FinalPnl,
        Objective::WinRate,
        Objective::MaxDrawdown,
        Objective::Balanced,
        Objective::SharpeRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::FinalPnl => "final_pnl",
            Objective::WinRate => "win_rate",
            Objective::MaxDrawdown => "max_drawdown",
            Objective::Balanced => "balanced",
            Objective::SharpeRatio => "sharpe_ratio",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Objective::FinalPnl => "highest final PnL",
            Objective::WinRate => "highest win rate (ties: higher PnL)",
            Objective::MaxDrawdown => "lowest max drawdown",
            Objective::Balanced => "0.6 x normalized PnL + 0.4 x (1 - normalized drawdown)",
            Objective::SharpeRatio => "highest Sharpe ratio (ties: higher PnL)",
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "final_pnl" | "pnl" => Ok(Objective::FinalPnl),
            "win_rate" => Ok(Objective::WinRate),
            "max_drawdown" | "drawdown" => Ok(Objective::MaxDrawdown),
            "balanced" => Ok(Objective::Balanced),
            "sharpe_ratio" | "sharpe" => Ok(Objective::SharpeRatio),
            other => Err(format!(
                "Unknown objective '{}' (expected final_pnl, win_rate, max_drawdown, balanced, sharpe_ratio)",
                other
            )),
        }
    }
}

/// Winning row and, for `balanced`, its composite score
#[derive(Debug, Clone, PartialEq)]
pub struct Selected<'a> {
    pub run: &'a OptimizationRun,
    pub score: Option<f64>,
}

/// Scale `value` into [0, 1] over `[min, max]`; a zero-width range maps to 0
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range > 0.0 {
        (value - min) / range
    } else {
        0.0
    }
}

fn pick<'a, F>(rows: &[&'a OptimizationRun], beats: F) -> Option<&'a OptimizationRun>
where
    F: Fn(&OptimizationRun, &OptimizationRun) -> bool,
{
    let mut best: Option<&'a OptimizationRun> = None;
    for &row in rows {
        match best {
            Some(current) if !beats(row, current) => {}
            _ => best = Some(row),
        }
    }
    best
}

/// Composite scores aligned with `rows`
pub fn balanced_scores(rows: &[&OptimizationRun]) -> Vec<f64> {
    let (mut pnl_min, mut pnl_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut dd_min, mut dd_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for row in rows {
        pnl_min = pnl_min.min(row.metrics.final_pnl);
        pnl_max = pnl_max.max(row.metrics.final_pnl);
        dd_min = dd_min.min(row.metrics.max_drawdown);
        dd_max = dd_max.max(row.metrics.max_drawdown);
    }

    rows.iter()
        .map(|row| {
            let pnl = normalize(row.metrics.final_pnl, pnl_min, pnl_max);
            let dd = normalize(row.metrics.max_drawdown, dd_min, dd_max);
            BALANCED_PNL_WEIGHT * pnl + BALANCED_DRAWDOWN_WEIGHT * (1.0 - dd)
        })
        .collect()
}

/// Winner among the rows of one asset group
pub fn select<'a>(objective: Objective, rows: &[&'a OptimizationRun]) -> Option<Selected<'a>> {
    let run = match objective {
        Objective::FinalPnl => pick(rows, |a, b| a.metrics.final_pnl > b.metrics.final_pnl),
        Objective::WinRate => pick(rows, |a, b| {
            a.metrics.win_rate > b.metrics.win_rate
                || (a.metrics.win_rate == b.metrics.win_rate && a.metrics.final_pnl > b.metrics.final_pnl)
        }),
        Objective::MaxDrawdown => pick(rows, |a, b| a.metrics.max_drawdown < b.metrics.max_drawdown),
        Objective::SharpeRatio => pick(rows, |a, b| {
            a.metrics.sharpe_ratio > b.metrics.sharpe_ratio
                || (a.metrics.sharpe_ratio == b.metrics.sharpe_ratio && a.metrics.final_pnl > b.metrics.final_pnl)
        }),
        Objective::Balanced => {
            let scores = balanced_scores(rows);
            let mut best: Option<(usize, f64)> = None;
            for (i, score) in scores.iter().enumerate() {
                match best {
                    Some((_, top)) if *score <= top => {}
                    _ => best = Some((i, *score)),
                }
            }
            return best.map(|(i, score)| Selected {
                run: rows[i],
                score: Some(score),
            });
        }
    }?;
    Some(Selected { run, score: None })
}
