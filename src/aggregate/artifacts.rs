//! Best-configuration artifacts
//!
//! Per asset and objective a grouped JSON document; per objective a flattened
//! CSV, a plain-text summary and a portfolio rollup. The reconciler reads the
//! JSON and CSV forms back to recover the winning parameter set.

use super::select::Objective;
use crate::error::{OptimizerError, OptimizerResult};
use crate::optimization::{OptimizationRun, ParamGroup, ParamValue, ParameterSchema, ParameterSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSection {
    pub asset_id: String,
    pub symbol: String,
    pub interval: String,
    pub objective: Objective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSection {
    pub final_pnl: f64,
    pub total_trades: u64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balanced_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_file: String,
    /// Row position inside `source_file`; not unique across files
    pub run_id: usize,
    pub generated_at: DateTime<Utc>,
}

/// Winning configuration for one (asset, objective)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestConfigArtifact {
    pub asset: AssetSection,
    pub indicator_parameters: BTreeMap<String, ParamValue>,
    pub risk_parameters: BTreeMap<String, ParamValue>,
    pub behavior_flags: BTreeMap<String, ParamValue>,
    pub performance: PerformanceSection,
    pub provenance: Provenance,
}

impl BestConfigArtifact {
    pub fn new(
        objective: Objective,
        run: &OptimizationRun,
        score: Option<f64>,
        schema: &ParameterSchema,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut indicator_parameters = BTreeMap::new();
        let mut risk_parameters = BTreeMap::new();
        let mut behavior_flags = BTreeMap::new();
        for (name, value) in run.parameters.iter() {
            let section = match schema.group_of(name, value) {
                ParamGroup::Indicator => &mut indicator_parameters,
                ParamGroup::Risk => &mut risk_parameters,
                ParamGroup::Behavior => &mut behavior_flags,
            };
            section.insert(name.clone(), *value);
        }

        Self {
            asset: AssetSection {
                asset_id: run.asset_id(),
                symbol: run.symbol.clone(),
                interval: run.interval.clone(),
                objective,
            },
            indicator_parameters,
            risk_parameters,
            behavior_flags,
            performance: PerformanceSection {
                final_pnl: run.metrics.final_pnl,
                total_trades: run.metrics.total_trades,
                win_rate: run.metrics.win_rate,
                sharpe_ratio: run.metrics.sharpe_ratio,
                max_drawdown: run.metrics.max_drawdown,
                execution_time: run.metrics.execution_time,
                balanced_score: score,
            },
            provenance: Provenance {
                source_file: run.source_file.clone(),
                run_id: run.run_id,
                generated_at,
            },
        }
    }

    /// All parameter sections merged back into one set
    pub fn parameters(&self) -> ParameterSet {
        let values = self
            .indicator_parameters
            .iter()
            .chain(&self.risk_parameters)
            .chain(&self.behavior_flags)
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        ParameterSet::from_values(values)
    }
}

/// Selected configuration as the reconciler needs it
#[derive(Debug, Clone, PartialEq)]
pub struct BestConfigRow {
    pub symbol: String,
    pub interval: String,
    pub objective: Option<Objective>,
    pub parameters: ParameterSet,
}

impl BestConfigRow {
    pub fn asset_id(&self) -> String {
        format!("{}_{}", self.symbol, self.interval)
    }
}

impl From<&BestConfigArtifact> for BestConfigRow {
    fn from(artifact: &BestConfigArtifact) -> Self {
        Self {
            symbol: artifact.asset.symbol.clone(),
            interval: artifact.asset.interval.clone(),
            objective: Some(artifact.asset.objective),
            parameters: artifact.parameters(),
        }
    }
}

const FLAT_COLUMNS: [&str; 13] = [
    "asset_id",
    "symbol",
    "interval",
    "objective",
    "final_pnl",
    "total_trades",
    "win_rate",
    "sharpe_ratio",
    "max_drawdown",
    "balanced_score",
    "run_id",
    "source_file",
    "generated_at",
];

/// Parameter columns: schema order first, then any extra names sorted
fn parameter_columns(artifacts: &[BestConfigArtifact], schema: &ParameterSchema) -> Vec<String> {
    let mut columns: Vec<String> = schema.names().map(str::to_string).collect();
    let mut extras: Vec<String> = artifacts
        .iter()
        .flat_map(|a| a.parameters().iter().map(|(k, _)| k.clone()).collect::<Vec<_>>())
        .filter(|name| schema.field(name).is_none())
        .collect();
    extras.sort();
    extras.dedup();
    columns.extend(extras);
    columns
}

/// `best_configs.csv` for one objective
pub fn best_configs_csv(artifacts: &[BestConfigArtifact], schema: &ParameterSchema) -> OptimizerResult<Vec<u8>> {
    let params = parameter_columns(artifacts, schema);
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header: Vec<&str> = FLAT_COLUMNS
        .iter()
        .copied()
        .chain(params.iter().map(String::as_str))
        .collect();
    writer.write_record(&header)?;

    for artifact in artifacts {
        let p = &artifact.performance;
        let set = artifact.parameters();
        let mut record = vec![
            artifact.asset.asset_id.clone(),
            artifact.asset.symbol.clone(),
            artifact.asset.interval.clone(),
            artifact.asset.objective.to_string(),
            p.final_pnl.to_string(),
            p.total_trades.to_string(),
            p.win_rate.to_string(),
            p.sharpe_ratio.to_string(),
            p.max_drawdown.to_string(),
            p.balanced_score.map(|s| format!("{:.6}", s)).unwrap_or_default(),
            artifact.provenance.run_id.to_string(),
            artifact.provenance.source_file.clone(),
            artifact.provenance.generated_at.to_rfc3339(),
        ];
        record.extend(params.iter().map(|name| set.get(name).map(|v| v.to_string()).unwrap_or_default()));
        writer.write_record(&record)?;
    }

    writer.into_inner().map_err(|e| OptimizerError::Io(e.into_error()))
}

/// Read a flattened best-config CSV
pub fn read_best_configs_csv(bytes: &[u8], source: &str) -> OptimizerResult<Vec<BestConfigRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (Some(symbol_col), Some(interval_col)) = (position("symbol"), position("interval")) else {
        return Err(OptimizerError::InputUnreadable {
            path: source.to_string(),
            reason: "missing symbol/interval columns".to_string(),
        });
    };
    let objective_col = position("objective");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut values = BTreeMap::new();
        for (i, name) in headers.iter().enumerate() {
            let name = name.trim();
            if FLAT_COLUMNS.contains(&name) || name.is_empty() {
                continue;
            }
            if let Some(value) = record.get(i).and_then(ParamValue::parse_cell) {
                values.insert(name.to_string(), value);
            }
        }
        let (symbol, interval) = crate::records::normalize_asset(
            record.get(symbol_col).unwrap_or_default(),
            record.get(interval_col).unwrap_or_default(),
        );
        rows.push(BestConfigRow {
            symbol,
            interval,
            objective: objective_col
                .and_then(|i| record.get(i))
                .and_then(|o| o.parse().ok()),
            parameters: ParameterSet::from_values(values),
        });
    }
    Ok(rows)
}

/// Cross-asset rollup for one objective
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub objective: Objective,
    pub assets_considered: usize,
    pub assets_selected: usize,
    pub assets_omitted: Vec<String>,
    pub total_final_pnl: f64,
    pub total_trades: u64,
    pub average_win_rate: f64,
    pub average_sharpe_ratio: f64,
    pub worst_max_drawdown: f64,
    pub generated_at: DateTime<Utc>,
}

impl PortfolioSummary {
    pub fn new(
        objective: Objective,
        artifacts: &[BestConfigArtifact],
        assets_omitted: Vec<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let n = artifacts.len();
        let mean = |f: fn(&PerformanceSection) -> f64| {
            if n == 0 {
                0.0
            } else {
                artifacts.iter().map(|a| f(&a.performance)).sum::<f64>() / n as f64
            }
        };
        Self {
            objective,
            assets_considered: n + assets_omitted.len(),
            assets_selected: n,
            total_final_pnl: artifacts.iter().map(|a| a.performance.final_pnl).sum(),
            total_trades: artifacts.iter().map(|a| a.performance.total_trades).sum(),
            average_win_rate: mean(|p: &PerformanceSection| p.win_rate),
            average_sharpe_ratio: mean(|p: &PerformanceSection| p.sharpe_ratio),
            worst_max_drawdown: artifacts
                .iter()
                .map(|a| a.performance.max_drawdown)
                .fold(0.0, f64::max),
            assets_omitted,
            generated_at,
        }
    }
}

/// Human-readable `summary.txt`
pub fn summary_text(objective: Objective, artifacts: &[BestConfigArtifact], portfolio: &PortfolioSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Best configurations: {} ({})", objective, objective.description());
    let _ = writeln!(out, "Generated: {}", portfolio.generated_at.to_rfc3339());
    let _ = writeln!(
        out,
        "Assets: {} selected, {} omitted",
        portfolio.assets_selected,
        portfolio.assets_omitted.len()
    );
    let _ = writeln!(out);

    for artifact in artifacts {
        let p = &artifact.performance;
        let _ = writeln!(out, "== {} ==", artifact.asset.asset_id);
        let _ = writeln!(
            out,
            "  PnL {:.2} | trades {} | win rate {:.2}% | sharpe {:.3} | max DD {:.2}%",
            p.final_pnl, p.total_trades, p.win_rate, p.sharpe_ratio, p.max_drawdown
        );
        for (title, section) in [
            ("indicators", &artifact.indicator_parameters),
            ("risk", &artifact.risk_parameters),
            ("behavior", &artifact.behavior_flags),
        ] {
            if section.is_empty() {
                continue;
            }
            let params = section
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "  {}: {}", title, params);
        }
        let _ = writeln!(
            out,
            "  source: {} (run {})",
            artifact.provenance.source_file, artifact.provenance.run_id
        );
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Portfolio");
    let _ = writeln!(out, "  total PnL: {:.2}", portfolio.total_final_pnl);
    let _ = writeln!(out, "  total trades: {}", portfolio.total_trades);
    let _ = writeln!(out, "  average win rate: {:.2}%", portfolio.average_win_rate);
    let _ = writeln!(out, "  worst max drawdown: {:.2}%", portfolio.worst_max_drawdown);
    if !portfolio.assets_omitted.is_empty() {
        let _ = writeln!(
            out,
            "  omitted (no rows passed filters): {}",
            portfolio.assets_omitted.join(", ")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::RunMetrics;

    fn artifact() -> BestConfigArtifact {
        let schema = ParameterSchema::bb_vwap();
        let run = OptimizationRun {
            run_id: 4,
            source_file: "results/runs/BTCUSDT_1h_grid_1.csv".to_string(),
            timestamp: String::new(),
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            metrics: RunMetrics {
                final_pnl: 420.0,
                total_trades: 33,
                win_rate: 57.5,
                sharpe_ratio: 1.7,
                max_drawdown: 9.5,
                execution_time: 0.8,
            },
            parameters: schema
                .build_with_defaults(vec![("require_reversal", ParamValue::Bool(true))])
                .unwrap(),
        };
        BestConfigArtifact::new(Objective::FinalPnl, &run, None, &schema, Utc::now())
    }

    #[test]
    fn test_parameters_are_grouped() {
        let artifact = artifact();
        assert!(artifact.indicator_parameters.contains_key("bb_window"));
        assert!(artifact.risk_parameters.contains_key("stop_loss_atr_multiplier"));
        assert_eq!(artifact.behavior_flags.get("require_reversal"), Some(&ParamValue::Bool(true)));
        assert_eq!(artifact.parameters().len(), 12);

        let json = serde_json::to_string(&artifact).unwrap();
        let back: BestConfigArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parameters(), artifact.parameters());
    }

    #[test]
    fn test_flat_csv_reads_back() {
        let schema = ParameterSchema::bb_vwap();
        let artifact = artifact();
        let bytes = best_configs_csv(std::slice::from_ref(&artifact), &schema).unwrap();
        let rows = read_best_configs_csv(&bytes, "best_configs.csv").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asset_id(), "BTCUSDT_1h");
        assert_eq!(rows[0].objective, Some(Objective::FinalPnl));
        assert!(rows[0].parameters.approx_matches(&artifact.parameters(), 1e-9));
        assert!(artifact.parameters().approx_matches(&rows[0].parameters, 1e-9));
    }

    #[test]
    fn test_portfolio_counts_omissions() {
        let artifact = artifact();
        let summary = PortfolioSummary::new(
            Objective::FinalPnl,
            &[artifact.clone(), artifact],
            vec!["ETHUSDT_1h".to_string()],
            Utc::now(),
        );
        assert_eq!(summary.assets_considered, 3);
        assert_eq!(summary.assets_selected, 2);
        assert_eq!(summary.total_final_pnl, 840.0);
        assert_eq!(summary.worst_max_drawdown, 9.5);

        let text = summary_text(Objective::FinalPnl, &[], &summary);
        assert!(text.contains("omitted (no rows passed filters): ETHUSDT_1h"));
    }
}
