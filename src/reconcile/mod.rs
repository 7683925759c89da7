//! Reconciliation of winning configurations with trade-level order logs
//!
//! Order files do not carry a usable run identifier, so a winner is matched to
//! its trades by comparing every parameter with an absolute tolerance. Orders
//! from several files can match the same configuration when distinct runs
//! happened to use the same values; all of them are pooled.

pub mod equity;

use crate::aggregate::artifacts::read_best_configs_csv;
use crate::aggregate::{BestConfigArtifact, BestConfigRow, UnreadableFile};
use crate::error::{OptimizerError, OptimizerResult};
use crate::records::{read_order_csv, OrderRecord};
use crate::transport::{join_key, Transport};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub use equity::{EquityCurve, EquityPoint, EquitySummary};

pub const DEFAULT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    pub tolerance: f64,
    pub skip_portfolio: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            skip_portfolio: false,
        }
    }
}

/// All order rows under a prefix
#[derive(Debug, Clone, Default)]
pub struct LoadedOrders {
    pub orders: Vec<OrderRecord>,
    pub files_read: usize,
    pub unreadable: Vec<UnreadableFile>,
    pub malformed_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetReconciliation {
    pub asset_id: String,
    pub matched_orders: usize,
    pub source_files: Vec<String>,
    pub summary: EquitySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedAsset {
    pub asset_id: String,
    pub reason: String,
}

/// `reconciliation_report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub generated_at: DateTime<Utc>,
    pub best_config_source: String,
    pub orders_prefix: String,
    pub tolerance: f64,
    pub configurations: usize,
    pub order_files_read: usize,
    pub unreadable_order_files: Vec<UnreadableFile>,
    pub malformed_order_rows: usize,
    pub reconciled: Vec<AssetReconciliation>,
    pub skipped: Vec<SkippedAsset>,
    pub warnings: Vec<String>,
    pub portfolio: Option<EquitySummary>,
}

/// Orders for the same asset whose parameters all lie within `tolerance` of
/// the configuration's. A parameter absent from an order is a non-match.
pub fn matching_orders<'a>(config: &BestConfigRow, orders: &'a [OrderRecord], tolerance: f64) -> Vec<&'a OrderRecord> {
    let asset_id = config.asset_id();
    orders
        .iter()
        .filter(|o| o.asset_id() == asset_id)
        .filter(|o| config.parameters.approx_matches(&o.parameters, tolerance))
        .collect()
}

pub struct Reconciler {
    input: Arc<dyn Transport>,
    output: Arc<dyn Transport>,
}

impl Reconciler {
    pub fn new(input: Arc<dyn Transport>, output: Arc<dyn Transport>) -> Self {
        Self { input, output }
    }

    /// Best configurations from a flattened CSV or a JSON artifact (a single
    /// object or an array). Unreadable input is fatal.
    pub fn load_best_configs(&self, key: &str) -> OptimizerResult<Vec<BestConfigRow>> {
        let unreadable = |reason: String| OptimizerError::InputUnreadable {
            path: key.to_string(),
            reason,
        };
        let bytes = self.input.get(key).map_err(|e| unreadable(e.to_string()))?;

        if key.to_ascii_lowercase().ends_with(".json") {
            if let Ok(artifact) = serde_json::from_slice::<BestConfigArtifact>(&bytes) {
                return Ok(vec![BestConfigRow::from(&artifact)]);
            }
            let artifacts: Vec<BestConfigArtifact> =
                serde_json::from_slice(&bytes).map_err(|e| unreadable(e.to_string()))?;
            Ok(artifacts.iter().map(BestConfigRow::from).collect())
        } else {
            read_best_configs_csv(&bytes, key).map_err(|e| unreadable(e.to_string()))
        }
    }

    /// Every order CSV under `prefix`. A missing prefix yields no orders; the
    /// affected assets are reported as skipped by the caller.
    pub fn load_orders(&self, prefix: &str) -> LoadedOrders {
        let keys: Vec<String> = match self.input.list(prefix) {
            Ok(objects) => objects
                .into_iter()
                .map(|o| o.key)
                .filter(|k| k.to_ascii_lowercase().ends_with(".csv"))
                .collect(),
            Err(e) => {
                warn!("⚠️  Cannot list order files under {}: {}", prefix, e);
                Vec::new()
            }
        };

        let parsed: Vec<(String, Result<_, String>)> = keys
            .par_iter()
            .map(|key| {
                let result = self
                    .input
                    .get(key)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| read_order_csv(&bytes, key).map_err(|e| e.to_string()));
                (key.clone(), result)
            })
            .collect();

        let mut loaded = LoadedOrders::default();
        for (key, result) in parsed {
            match result {
                Ok(file) => {
                    loaded.files_read += 1;
                    loaded.malformed_rows += file.skipped_rows;
                    loaded.orders.extend(file.rows);
                }
                Err(reason) => {
                    warn!("⚠️  Skipping unreadable order file {}: {}", key, reason);
                    loaded.unreadable.push(UnreadableFile { file: key, reason });
                }
            }
        }
        loaded
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> OptimizerResult<()> {
        self.output.put(key, &serde_json::to_vec_pretty(value)?)?;
        Ok(())
    }

    /// Match, build per-asset and portfolio curves, write outputs and report
    pub fn run(
        &self,
        best_config_key: &str,
        orders_prefix: &str,
        output_prefix: &str,
        settings: &ReconcileSettings,
    ) -> OptimizerResult<ReconciliationReport> {
        let configs = self.load_best_configs(best_config_key)?;
        let loaded = self.load_orders(orders_prefix);
        info!(
            "🔗 Reconciling {} configurations against {} orders from {} files (tolerance {:e})",
            configs.len(),
            loaded.orders.len(),
            loaded.files_read,
            settings.tolerance
        );

        let mut warnings = Vec::new();
        let mut skipped = Vec::new();
        let mut reconciled = Vec::new();
        let mut portfolio_orders: Vec<&OrderRecord> = Vec::new();
        let mut portfolio_start = 0.0;
        let mut seen = BTreeSet::new();

        for config in &configs {
            let asset_id = config.asset_id();
            if !seen.insert(asset_id.clone()) {
                let msg = format!("{}: duplicate configuration ignored", asset_id);
                warn!("⚠️  {}", msg);
                warnings.push(msg);
                continue;
            }

            let reason = if !loaded.orders.iter().any(|o| o.asset_id() == asset_id) {
                Some("no order records for asset")
            } else {
                None
            };
            let matched = matching_orders(config, &loaded.orders, settings.tolerance);
            let reason = reason.or(if matched.is_empty() {
                Some("no order records matched the configuration")
            } else {
                None
            });
            if let Some(reason) = reason {
                warn!("⚠️  {}: {}, skipping", asset_id, reason);
                warnings.push(format!("{}: {}", asset_id, reason));
                skipped.push(SkippedAsset {
                    asset_id,
                    reason: reason.to_string(),
                });
                continue;
            }

            let source_files: Vec<String> = matched
                .iter()
                .map(|o| o.source_file.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if source_files.len() > 1 {
                let msg = format!(
                    "{}: matched orders span {} files; pooling them",
                    asset_id,
                    source_files.len()
                );
                warn!("⚠️  {}", msg);
                warnings.push(msg);
            }

            let start = equity::starting_balance(&matched);
            let curve = equity::build_curve(matched.clone(), start);
            self.output.put(
                &join_key(&[output_prefix, &format!("{}_equity.csv", asset_id)]),
                &equity::curve_csv(&curve.points)?,
            )?;
            self.put_json(
                &join_key(&[output_prefix, &format!("{}_summary.json", asset_id)]),
                &curve.summary,
            )?;
            info!(
                "📈 {}: {} trades, return {:.2}%, max DD {:.2}%",
                asset_id, curve.summary.trades, curve.summary.return_pct, curve.summary.max_drawdown_pct
            );

            portfolio_start += start;
            portfolio_orders.extend(matched.iter().copied());
            reconciled.push(AssetReconciliation {
                asset_id,
                matched_orders: matched.len(),
                source_files,
                summary: curve.summary,
            });
        }

        let portfolio = if settings.skip_portfolio || reconciled.is_empty() {
            None
        } else {
            let curve = equity::build_curve(portfolio_orders, portfolio_start);
            self.output.put(
                &join_key(&[output_prefix, "portfolio_equity.csv"]),
                &equity::curve_csv(&curve.points)?,
            )?;
            self.put_json(&join_key(&[output_prefix, "portfolio_summary.json"]), &curve.summary)?;
            info!(
                "💼 Portfolio: {} assets, {} trades, return {:.2}%",
                reconciled.len(),
                curve.summary.trades,
                curve.summary.return_pct
            );
            Some(curve.summary)
        };

        let report = ReconciliationReport {
            generated_at: Utc::now(),
            best_config_source: best_config_key.to_string(),
            orders_prefix: orders_prefix.to_string(),
            tolerance: settings.tolerance,
            configurations: configs.len(),
            order_files_read: loaded.files_read,
            unreadable_order_files: loaded.unreadable.clone(),
            malformed_order_rows: loaded.malformed_rows,
            reconciled,
            skipped,
            warnings,
            portfolio,
        };
        self.put_json(&join_key(&[output_prefix, "reconciliation_report.json"]), &report)?;
        Ok(report)
    }
}
