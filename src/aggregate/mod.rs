//! Cross-worker result aggregation
//!
//! Reads every result CSV under a prefix, filters rows for validity, groups
//! them by asset and selects one winner per objective. Output is regenerated
//! from scratch on every run.

pub mod artifacts;
pub mod filter;
pub mod select;

use crate::error::{OptimizerError, OptimizerResult};
use crate::optimization::{OptimizationRun, ParameterSchema};
use crate::records::{read_result_csv, ParsedFile};
use crate::transport::{join_key, Transport};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub use artifacts::{BestConfigArtifact, BestConfigRow, PortfolioSummary};
pub use filter::{FilterReason, FilterThresholds};
pub use select::Objective;

/// A result file that could not be used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadableFile {
    pub file: String,
    pub reason: String,
}

/// Rows from all readable files, in (file key, run_id) order
#[derive(Debug, Clone, Default)]
pub struct LoadedRuns {
    pub files_read: Vec<String>,
    pub unreadable: Vec<UnreadableFile>,
    pub rows: Vec<OptimizationRun>,
    pub malformed_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub passed: Vec<OptimizationRun>,
    pub rejected: usize,
    /// A row failing several checks counts once per failed check
    pub by_reason: BTreeMap<FilterReason, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveReport {
    pub objective: Objective,
    pub assets_selected: usize,
    pub assets_omitted: Vec<String>,
    pub output_prefix: String,
}

/// `aggregation_report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationReport {
    pub generated_at: DateTime<Utc>,
    pub input_prefix: String,
    pub output_prefix: String,
    pub thresholds: FilterThresholds,
    pub files_read: usize,
    pub unreadable_files: Vec<UnreadableFile>,
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub rows_passed: usize,
    pub rows_rejected: usize,
    pub rejections: BTreeMap<FilterReason, usize>,
    pub assets_seen: Vec<String>,
    pub objectives: Vec<ObjectiveReport>,
}

pub struct Aggregator {
    input: Arc<dyn Transport>,
    output: Arc<dyn Transport>,
    schema: ParameterSchema,
}

impl Aggregator {
    pub fn new(input: Arc<dyn Transport>, output: Arc<dyn Transport>, schema: ParameterSchema) -> Self {
        Self { input, output, schema }
    }

    /// Read every `.csv` under `prefix`.
    ///
    /// An unlistable prefix, or one holding no CSV files, is fatal. Individual
    /// files that cannot be read or parsed are recorded and skipped.
    pub fn load(&self, prefix: &str) -> OptimizerResult<LoadedRuns> {
        let listing = self.input.list(prefix).map_err(|e| OptimizerError::InputUnreadable {
            path: prefix.to_string(),
            reason: e.to_string(),
        })?;
        let keys: Vec<String> = listing
            .into_iter()
            .map(|o| o.key)
            .filter(|k| k.to_ascii_lowercase().ends_with(".csv"))
            .collect();
        if keys.is_empty() {
            return Err(OptimizerError::InputUnreadable {
                path: prefix.to_string(),
                reason: "no result CSV files found".to_string(),
            });
        }

        info!("📂 Reading {} result files under {}", keys.len(), prefix);
        let parsed: Vec<(String, Result<ParsedFile<OptimizationRun>, String>)> = keys
            .par_iter()
            .map(|key| {
                let result = self
                    .input
                    .get(key)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| read_result_csv(&bytes, key, &self.schema).map_err(|e| e.to_string()));
                (key.clone(), result)
            })
            .collect();

        let mut loaded = LoadedRuns::default();
        for (key, result) in parsed {
            match result {
                Ok(file) => {
                    if file.skipped_rows > 0 {
                        warn!("⚠️  {}: skipped {} malformed rows", key, file.skipped_rows);
                    }
                    loaded.malformed_rows += file.skipped_rows;
                    loaded.rows.extend(file.rows);
                    loaded.files_read.push(key);
                }
                Err(reason) => {
                    warn!("⚠️  Skipping unreadable result file {}: {}", key, reason);
                    loaded.unreadable.push(UnreadableFile { file: key, reason });
                }
            }
        }
        Ok(loaded)
    }

    /// Keep rows passing every threshold
    pub fn filter(rows: Vec<OptimizationRun>, thresholds: &FilterThresholds) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        for row in rows {
            let failures = thresholds.failures(&row.metrics);
            if failures.is_empty() {
                outcome.passed.push(row);
            } else {
                outcome.rejected += 1;
                for reason in failures {
                    *outcome.by_reason.entry(reason).or_insert(0) += 1;
                }
            }
        }
        outcome
    }

    /// Rows by `SYMBOL_interval`, order preserved within each group
    pub fn group(rows: &[OptimizationRun]) -> BTreeMap<String, Vec<&OptimizationRun>> {
        let mut groups: BTreeMap<String, Vec<&OptimizationRun>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.asset_id()).or_default().push(row);
        }
        groups
    }

    /// Winners for one objective plus the assets with no surviving rows
    pub fn select_best(
        &self,
        objective: Objective,
        groups: &BTreeMap<String, Vec<&OptimizationRun>>,
        assets_seen: &[String],
        generated_at: DateTime<Utc>,
    ) -> (Vec<BestConfigArtifact>, Vec<String>) {
        let mut artifacts = Vec::new();
        for rows in groups.values() {
            if let Some(chosen) = select::select(objective, rows) {
                artifacts.push(BestConfigArtifact::new(
                    objective,
                    chosen.run,
                    chosen.score,
                    &self.schema,
                    generated_at,
                ));
            }
        }
        let omitted = assets_seen
            .iter()
            .filter(|asset| !groups.contains_key(*asset))
            .cloned()
            .collect();
        (artifacts, omitted)
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> OptimizerResult<()> {
        self.output.put(key, &serde_json::to_vec_pretty(value)?)?;
        Ok(())
    }

    /// Full pass: load, filter, group, select, write artifacts and report
    pub fn run(
        &self,
        input_prefix: &str,
        output_prefix: &str,
        objectives: &[Objective],
        thresholds: &FilterThresholds,
    ) -> OptimizerResult<AggregationReport> {
        let generated_at = Utc::now();
        let loaded = self.load(input_prefix)?;
        let rows_read = loaded.rows.len();

        let mut assets_seen: Vec<String> = loaded.rows.iter().map(|r| r.asset_id()).collect();
        assets_seen.sort();
        assets_seen.dedup();

        let filtered = Self::filter(loaded.rows, thresholds);
        info!(
            "🔎 {} of {} rows passed filters (min trades {}, min win rate {}%, max drawdown {}%)",
            filtered.passed.len(),
            rows_read,
            thresholds.min_trades,
            thresholds.min_win_rate,
            thresholds.max_drawdown
        );
        let groups = Self::group(&filtered.passed);

        let mut objective_reports = Vec::new();
        for &objective in objectives {
            let (artifacts, omitted) = self.select_best(objective, &groups, &assets_seen, generated_at);
            let dir = join_key(&[output_prefix, objective.as_str()]);

            for artifact in &artifacts {
                let key = join_key(&[&dir, &format!("{}.json", artifact.asset.asset_id)]);
                self.put_json(&key, artifact)?;
            }
            self.output.put(
                &join_key(&[&dir, "best_configs.csv"]),
                &artifacts::best_configs_csv(&artifacts, &self.schema)?,
            )?;

            let portfolio = PortfolioSummary::new(objective, &artifacts, omitted.clone(), generated_at);
            self.put_json(&join_key(&[&dir, "portfolio_summary.json"]), &portfolio)?;
            self.output.put(
                &join_key(&[&dir, "summary.txt"]),
                artifacts::summary_text(objective, &artifacts, &portfolio).as_bytes(),
            )?;

            for asset in &omitted {
                warn!("⚠️  {}: no rows passed filters, omitted from {}", asset, objective);
            }
            info!("🏆 {}: {} assets selected, {} omitted", objective, artifacts.len(), omitted.len());
            objective_reports.push(ObjectiveReport {
                objective,
                assets_selected: artifacts.len(),
                assets_omitted: omitted,
                output_prefix: dir,
            });
        }

        let report = AggregationReport {
            generated_at,
            input_prefix: input_prefix.to_string(),
            output_prefix: output_prefix.to_string(),
            thresholds: thresholds.clone(),
            files_read: loaded.files_read.len(),
            unreadable_files: loaded.unreadable,
            rows_read,
            malformed_rows: loaded.malformed_rows,
            rows_passed: filtered.passed.len(),
            rows_rejected: filtered.rejected,
            rejections: filtered.by_reason,
            assets_seen,
            objectives: objective_reports,
        };
        self.put_json(&join_key(&[output_prefix, "aggregation_report.json"]), &report)?;
        Ok(report)
    }
}
