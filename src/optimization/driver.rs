//! Search driver
//!
//! Evaluates candidates one at a time inside a single worker: derive the
//! result key, consult the result cache, run the backtest on a miss, append
//! the CSV rows, fold the run into the best-so-far trackers. Every
//! `progress_every` evaluations the progress file is rewritten and the rows
//! written since the previous checkpoint are shipped: appended in place when
//! the output transport can append, otherwise spooled to a local temp file
//! that is uploaded once when the run finishes.

use super::params::{ParameterSchema, ParameterSet};
use super::space::{SearchMode, Shard};
use super::{BestTrackers, OptimizationRun, RunMetrics};
use crate::backtesting::{Backtester, MarketData, MarketDataLoader, TradeRecord};
use crate::cache::{CacheKey, CacheOutcome, DataRequest, ExpiryPolicy, ExpirySettings, MarketDataCache, ResultCache};
use crate::error::{OptimizerError, OptimizerResult};
use crate::progress::{estimate_remaining, OptimizationProgress, ProgressStatus};
use crate::records::{OrderCsvWriter, ResultCsvWriter};
use crate::transport::{join_key, Transport};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Top-level prefixes of the three namespaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    pub cache: String,
    pub results: String,
    pub logs: String,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            cache: "cache".to_string(),
            results: "results".to_string(),
            logs: "logs".to_string(),
        }
    }
}

impl StorageLayout {
    pub fn runs_prefix(&self) -> String {
        format!("{}/", join_key(&[&self.results, "runs"]))
    }

    pub fn orders_prefix(&self) -> String {
        format!("{}/", join_key(&[&self.results, "orders"]))
    }

    pub fn results_file(&self, run_name: &str) -> String {
        join_key(&[&self.results, "runs", &format!("{}.csv", run_name)])
    }

    pub fn orders_file(&self, run_name: &str) -> String {
        join_key(&[&self.results, "orders", &format!("{}_orders.csv", run_name)])
    }

    pub fn progress_file(&self, run_name: &str) -> String {
        join_key(&[&self.logs, "progress", &format!("{}.json", run_name)])
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub mode: SearchMode,
    pub shard: Shard,
    pub run_name: Option<String>,
    pub progress_every: usize,
    pub show_progress_bar: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            mode: SearchMode::Grid,
            shard: Shard::all(),
            run_name: None,
            progress_every: 10,
            show_progress_bar: true,
        }
    }
}

/// Counters and trackers threaded through the evaluation loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub completed: usize,
    pub computed: usize,
    pub cached: usize,
    pub failed: usize,
    pub trackers: BestTrackers,
}

impl SearchState {
    /// Rows written so far; the next row's `run_id` is this plus one
    pub fn rows(&self) -> usize {
        self.computed + self.cached
    }
}

/// One successful evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub run: OptimizationRun,
    pub trades: Vec<TradeRecord>,
    pub outcome: CacheOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    pub run_name: String,
    pub results_file: String,
    pub orders_file: String,
    pub progress_file: String,
    pub total: usize,
    pub completed: usize,
    pub computed: usize,
    pub cached: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
    pub trackers: BestTrackers,
}

/// Everything fixed for the duration of one run
struct RunContext {
    run_name: String,
    request: DataRequest,
    data_key: CacheKey,
    data: MarketData,
    expiry: ExpiryPolicy,
}

pub struct SearchDriver {
    market_data: MarketDataCache,
    results: ResultCache,
    output: Arc<dyn Transport>,
    layout: StorageLayout,
    expiry: ExpirySettings,
    schema: ParameterSchema,
    settings: SearchSettings,
}

impl SearchDriver {
    /// `cache` backs both caches; `output` receives result, order and
    /// progress files. They may be different backends.
    pub fn new(
        cache: Arc<dyn Transport>,
        output: Arc<dyn Transport>,
        layout: StorageLayout,
        expiry: ExpirySettings,
        schema: ParameterSchema,
        settings: SearchSettings,
    ) -> Self {
        Self {
            market_data: MarketDataCache::new(cache.clone(), &layout.cache, expiry.clone()),
            results: ResultCache::new(cache, &layout.cache),
            output,
            layout,
            expiry,
            schema,
            settings,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// `{SYMBOL}_{interval}_{mode}_{YYYYmmddHHMMSS}` plus a shard suffix
    pub fn default_run_name(&self, request: &DataRequest) -> String {
        format!(
            "{}_{}_{}{}",
            request.asset_id(),
            self.settings.mode,
            Utc::now().format("%Y%m%d%H%M%S"),
            self.settings.shard.suffix()
        )
    }

    /// Evaluate one candidate. Backtest failures are counted and logged; they
    /// never end the search.
    fn evaluate(
        &self,
        mut state: SearchState,
        ctx: &RunContext,
        params: &ParameterSet,
        backtester: &dyn Backtester,
    ) -> (SearchState, Option<Evaluation>) {
        let started = Instant::now();
        let result_key = self.results.key_for(&ctx.data_key, params);
        let fetched = self.results.fetch_or_compute(&result_key, ctx.expiry, || {
            backtester
                .run_backtest(&ctx.data, params)
                .map_err(OptimizerError::from)
        });
        state.completed += 1;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("⚠️  Backtest failed for [{}]: {}", params.label(), e);
                state.failed += 1;
                return (state, None);
            }
        };

        if fetched.outcome.is_hit() {
            state.cached += 1;
        } else {
            state.computed += 1;
        }

        let m = &fetched.value.metrics;
        let run = OptimizationRun {
            run_id: state.rows(),
            source_file: self.layout.results_file(&ctx.run_name),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            symbol: ctx.request.symbol.clone(),
            interval: ctx.request.interval.to_string(),
            metrics: RunMetrics {
                final_pnl: m.final_pnl,
                total_trades: m.total_trades,
                win_rate: m.win_rate,
                sharpe_ratio: m.sharpe_ratio,
                max_drawdown: m.max_drawdown,
                execution_time: started.elapsed().as_secs_f64(),
            },
            parameters: params.clone(),
        };
        state.trackers = state.trackers.update(&run);
        debug!(
            "{} #{} pnl={:.2} trades={} ({:?})",
            ctx.run_name, run.run_id, run.metrics.final_pnl, run.metrics.total_trades, fetched.outcome
        );

        (
            state,
            Some(Evaluation {
                run,
                trades: fetched.value.trades,
                outcome: fetched.outcome,
            }),
        )
    }

    /// Run the search over `candidates` for one market-data request.
    ///
    /// Fails only when the market data cannot be obtained or the output files
    /// cannot be encoded; everything else is counted in the summary.
    pub fn run(
        &self,
        request: &DataRequest,
        candidates: &[ParameterSet],
        loader: &dyn MarketDataLoader,
        backtester: &dyn Backtester,
    ) -> OptimizerResult<SearchSummary> {
        let started = Instant::now();
        let run_name = self
            .settings
            .run_name
            .clone()
            .unwrap_or_else(|| self.default_run_name(request));

        let data = self
            .market_data
            .fetch_or_load(request, || loader.load(request).map_err(OptimizerError::from))?
            .value;
        if data.is_empty() {
            warn!("⚠️  No bars for {}; every backtest will see empty data", request.asset_id());
        }

        let ctx = RunContext {
            run_name: run_name.clone(),
            request: request.clone(),
            data_key: self.market_data.key_for(request),
            data,
            expiry: self.expiry.policy_for(request, Utc::now()),
        };

        info!(
            "🔍 Starting {} search {} ({} candidates, shard {})",
            self.settings.mode,
            run_name,
            candidates.len(),
            self.settings.shard
        );

        let total = candidates.len();
        let progress = if self.settings.show_progress_bar {
            OptimizationProgress::new(total)
        } else {
            OptimizationProgress::hidden(total)
        };
        let mut files = RunFiles::open(self.output.as_ref(), &self.layout, &self.schema, &run_name)?;
        let mut state = SearchState::default();

        for params in candidates {
            let (next, evaluation) = self.evaluate(state, &ctx, params, backtester);
            state = next;

            if let Some(evaluation) = evaluation {
                files.results_csv.write_run(&evaluation.run)?;
                files.orders_csv.write_trades(&evaluation.run, &evaluation.trades)?;
            }

            let best_pnl = state.trackers.best_pnl.as_ref().map(|r| r.metrics.final_pnl);
            progress.update(state.completed, best_pnl, &params.label());

            let every = self.settings.progress_every.max(1);
            if state.completed % every == 0 && state.completed < total {
                files.ship(self.output.as_ref())?;
                self.publish_status(&ctx, &state, total, started, false)?;
            }
        }

        files.finish(self.output.as_ref())?;
        self.publish_status(&ctx, &state, total, started, true)?;
        progress.finish(state.trackers.best_pnl.as_ref().map(|r| r.metrics.final_pnl));

        info!(
            "✅ {} finished: {} computed, {} cached, {} failed of {}",
            run_name, state.computed, state.cached, state.failed, total
        );

        Ok(SearchSummary {
            results_file: self.layout.results_file(&run_name),
            orders_file: self.layout.orders_file(&run_name),
            progress_file: self.layout.progress_file(&run_name),
            run_name,
            total,
            completed: state.completed,
            computed: state.computed,
            cached: state.cached,
            failed: state.failed,
            elapsed_secs: started.elapsed().as_secs_f64(),
            trackers: state.trackers,
        })
    }

    /// Rewrite the status record. Write failures are logged; the next
    /// checkpoint tries again.
    fn publish_status(
        &self,
        ctx: &RunContext,
        state: &SearchState,
        total: usize,
        started: Instant,
        finished: bool,
    ) -> OptimizerResult<()> {
        let elapsed = started.elapsed();
        let status = ProgressStatus {
            run_name: ctx.run_name.clone(),
            completed: state.completed,
            total,
            computed: state.computed,
            cached: state.cached,
            failed: state.failed,
            elapsed_secs: elapsed.as_secs_f64(),
            eta_secs: estimate_remaining(elapsed, state.completed, total),
            finished,
            updated_at: Utc::now(),
        };

        let key = self.layout.progress_file(&ctx.run_name);
        if let Err(e) = self.output.put(&key, &serde_json::to_vec_pretty(&status)?) {
            warn!("⚠️  Failed to publish {}: {}", key, e);
        }
        debug!("Published checkpoint {}/{} for {}", state.completed, total, ctx.run_name);
        Ok(())
    }
}

/// Both CSVs of one run and where their rows end up
struct RunFiles {
    results_csv: ResultCsvWriter,
    orders_csv: OrderCsvWriter,
    results: CsvOutput,
    orders: CsvOutput,
}

impl RunFiles {
    fn open(
        output: &dyn Transport,
        layout: &StorageLayout,
        schema: &ParameterSchema,
        run_name: &str,
    ) -> OptimizerResult<Self> {
        Ok(Self {
            results_csv: ResultCsvWriter::new(schema)?,
            orders_csv: OrderCsvWriter::new(schema)?,
            results: CsvOutput::open(output, layout.results_file(run_name))?,
            orders: CsvOutput::open(output, layout.orders_file(run_name))?,
        })
    }

    /// Move the rows written since the last call out of memory
    fn ship(&mut self, output: &dyn Transport) -> OptimizerResult<()> {
        self.results.write(output, self.results_csv.drain()?)?;
        self.orders.write(output, self.orders_csv.drain()?)?;
        Ok(())
    }

    fn finish(mut self, output: &dyn Transport) -> OptimizerResult<()> {
        self.ship(output)?;
        self.results.finish(output)?;
        self.orders.finish(output)
    }
}

/// Destination of one growing CSV
struct CsvOutput {
    key: String,
    /// Local staging file when the transport cannot append
    spool: Option<File>,
    /// Rows a failed append left behind
    pending: Vec<u8>,
}

impl CsvOutput {
    fn open(output: &dyn Transport, key: String) -> OptimizerResult<Self> {
        let spool = if output.supports_append() {
            // A rerun under the same name starts from an empty file
            output.delete(&key)?;
            None
        } else {
            Some(tempfile::tempfile()?)
        };
        Ok(Self {
            key,
            spool,
            pending: Vec::new(),
        })
    }

    fn write(&mut self, output: &dyn Transport, chunk: Vec<u8>) -> OptimizerResult<()> {
        self.pending.extend_from_slice(&chunk);
        if self.pending.is_empty() {
            return Ok(());
        }
        match self.spool.as_mut() {
            Some(file) => file.write_all(&self.pending)?,
            None => {
                if let Err(e) = output.append(&self.key, &self.pending) {
                    warn!("⚠️  Failed to append to {}: {}", self.key, e);
                    return Ok(());
                }
            }
        }
        self.pending.clear();
        Ok(())
    }

    /// Upload the spooled rows, if this output was spooled
    fn finish(self, output: &dyn Transport) -> OptimizerResult<()> {
        let Some(mut file) = self.spool else {
            if !self.pending.is_empty() {
                warn!("⚠️  {} is missing {} bytes that could not be appended", self.key, self.pending.len());
            }
            return Ok(());
        };
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        if let Err(e) = output.put(&self.key, &bytes) {
            warn!("⚠️  Failed to publish {}: {}", self.key, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtesting::{BacktestError, BacktestMetrics, BacktestOutput, Bar};
    use crate::cache::DataSpan;
    use crate::optimization::params::ParamValue;
    use crate::optimization::space::ParameterSpace;
    use crate::transport::LocalTransport;
    use crate::transport::{ObjectInfo, TransportResult};
    use std::cell::Cell;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn request() -> DataRequest {
        DataRequest::new("crypto", "BTCUSDT", "1h".parse().unwrap(), DataSpan::Lookback { days: 30 })
    }

    fn loader(request: &DataRequest) -> Result<MarketData, BacktestError> {
        Ok(MarketData {
            symbol: request.symbol.clone(),
            interval: request.interval.to_string(),
            bars: vec![Bar {
                timestamp: Utc::now(),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            }],
        })
    }

    fn candidates(schema: &ParameterSchema) -> Vec<ParameterSet> {
        let mut grid = BTreeMap::new();
        grid.insert(
            "bb_window".to_string(),
            vec![ParamValue::Int(10), ParamValue::Int(20), ParamValue::Int(30)],
        );
        ParameterSpace {
            grid,
            random: BTreeMap::new(),
        }
        .grid_candidates(schema)
        .unwrap()
    }

    /// Local storage that counts the writes each key receives
    struct Recording {
        inner: LocalTransport,
        append: bool,
        writes: Mutex<BTreeMap<String, (usize, usize)>>,
    }

    impl Recording {
        fn new(root: &std::path::Path, append: bool) -> Self {
            Self {
                inner: LocalTransport::new(root),
                append,
                writes: Mutex::new(BTreeMap::new()),
            }
        }

        fn record(&self, key: &str, len: usize) {
            let mut writes = self.writes.lock().unwrap();
            let entry = writes.entry(key.to_string()).or_default();
            entry.0 += 1;
            entry.1 += len;
        }

        /// (calls, bytes) written to `key`
        fn writes_to(&self, key: &str) -> (usize, usize) {
            self.writes.lock().unwrap().get(key).copied().unwrap_or_default()
        }
    }

    impl Transport for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn get(&self, key: &str) -> TransportResult<Vec<u8>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, bytes: &[u8]) -> TransportResult<()> {
            self.record(key, bytes.len());
            self.inner.put(key, bytes)
        }

        fn exists(&self, key: &str) -> TransportResult<bool> {
            self.inner.exists(key)
        }

        fn list(&self, prefix: &str) -> TransportResult<Vec<ObjectInfo>> {
            self.inner.list(prefix)
        }

        fn delete(&self, key: &str) -> TransportResult<()> {
            self.inner.delete(key)
        }

        fn supports_append(&self) -> bool {
            self.append
        }

        fn append(&self, key: &str, bytes: &[u8]) -> TransportResult<()> {
            self.record(key, bytes.len());
            self.inner.append(key, bytes)
        }
    }

    fn windows(schema: &ParameterSchema, count: i64) -> Vec<ParameterSet> {
        let mut grid = BTreeMap::new();
        grid.insert("bb_window".to_string(), (1..=count).map(ParamValue::Int).collect());
        ParameterSpace {
            grid,
            random: BTreeMap::new(),
        }
        .grid_candidates(schema)
        .unwrap()
    }

    fn recording_driver(root: &std::path::Path, output: Arc<Recording>) -> SearchDriver {
        SearchDriver::new(
            Arc::new(LocalTransport::new(root.join("cache_store"))),
            output,
            StorageLayout::default(),
            ExpirySettings::default(),
            ParameterSchema::bb_vwap(),
            SearchSettings {
                run_name: Some("long_run".to_string()),
                progress_every: 2,
                show_progress_bar: false,
                ..SearchSettings::default()
            },
        )
    }

    fn driver(root: &std::path::Path) -> SearchDriver {
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(root));
        SearchDriver::new(
            transport.clone(),
            transport,
            StorageLayout::default(),
            ExpirySettings::default(),
            ParameterSchema::bb_vwap(),
            SearchSettings {
                run_name: Some("test_run".to_string()),
                progress_every: 2,
                show_progress_bar: false,
                ..SearchSettings::default()
            },
        )
    }

    #[test]
    fn test_failures_are_counted_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());
        let schema = ParameterSchema::bb_vwap();
        let calls = Cell::new(0);
        let flaky = |_: &MarketData, params: &ParameterSet| {
            calls.set(calls.get() + 1);
            match params.get("bb_window") {
                Some(ParamValue::Int(20)) => Err(BacktestError::BadOutput("boom".to_string())),
                Some(v) => Ok(BacktestOutput {
                    metrics: BacktestMetrics {
                        final_pnl: v.as_f64(),
                        total_trades: 10,
                        ..BacktestMetrics::default()
                    },
                    trades: Vec::new(),
                }),
                None => unreachable!(),
            }
        };

        let summary = driver.run(&request(), &candidates(&schema), &loader, &flaky).unwrap();
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.computed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.trackers.best_pnl.as_ref().unwrap().metrics.final_pnl, 30.0);
        // Second run in the same process: only the failed candidate is retried
        let again = driver.run(&request(), &candidates(&schema), &loader, &flaky).unwrap();
        assert_eq!(again.cached, 2);
        assert_eq!(again.failed, 1);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_files_published() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());
        let schema = ParameterSchema::bb_vwap();
        let engine = |_: &MarketData, _: &ParameterSet| Ok::<_, BacktestError>(BacktestOutput::default());

        let summary = driver.run(&request(), &candidates(&schema), &loader, &engine).unwrap();
        assert_eq!(summary.results_file, "results/runs/test_run.csv");

        let store = LocalTransport::new(dir.path());
        let csv = String::from_utf8(store.get(&summary.results_file).unwrap()).unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.starts_with("timestamp,symbol,interval,final_pnl"));

        let status: ProgressStatus = serde_json::from_slice(&store.get(&summary.progress_file).unwrap()).unwrap();
        assert!(status.finished);
        assert_eq!(status.completed, 3);
        assert_eq!(status.eta_secs, Some(0.0));
    }

    #[test]
    fn test_checkpoints_ship_each_row_once() {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(Recording::new(&dir.path().join("out"), true));
        let driver = recording_driver(dir.path(), output.clone());
        let schema = ParameterSchema::bb_vwap();
        let engine = |_: &MarketData, _: &ParameterSet| Ok::<_, BacktestError>(BacktestOutput::default());

        for _ in 0..2 {
            let summary = driver.run(&request(), &windows(&schema, 60), &loader, &engine).unwrap();
            let csv = output.get(&summary.results_file).unwrap();
            // A rerun under the same name replaces the file instead of extending it
            assert_eq!(String::from_utf8_lossy(&csv).lines().count(), 61);
        }

        let summary = driver.run(&request(), &windows(&schema, 60), &loader, &engine).unwrap();
        let final_len = output.get(&summary.results_file).unwrap().len();
        let (calls, bytes) = output.writes_to(&summary.results_file);
        assert_eq!(bytes, 3 * final_len);
        assert_eq!(calls, 3 * 30);
    }

    #[test]
    fn test_spooled_output_is_uploaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(Recording::new(&dir.path().join("out"), false));
        let driver = recording_driver(dir.path(), output.clone());
        let schema = ParameterSchema::bb_vwap();
        let engine = |_: &MarketData, _: &ParameterSet| Ok::<_, BacktestError>(BacktestOutput::default());

        let summary = driver.run(&request(), &windows(&schema, 60), &loader, &engine).unwrap();
        let csv = output.get(&summary.results_file).unwrap();
        assert_eq!(String::from_utf8_lossy(&csv).lines().count(), 61);
        assert_eq!(output.writes_to(&summary.results_file), (1, csv.len()));
        assert_eq!(output.writes_to(&summary.orders_file).0, 1);
        // Progress is still rewritten at every checkpoint
        assert_eq!(output.writes_to(&summary.progress_file).0, 30);
    }

    #[test]
    fn test_default_run_name_includes_shard() {
        let dir = tempfile::tempdir().unwrap();
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(dir.path()));
        let driver = SearchDriver::new(
            transport.clone(),
            transport,
            StorageLayout::default(),
            ExpirySettings::default(),
            ParameterSchema::bb_vwap(),
            SearchSettings {
                mode: SearchMode::Random,
                shard: Shard::new(1, 4).unwrap(),
                ..SearchSettings::default()
            },
        );
        let name = driver.default_run_name(&request());
        assert!(name.starts_with("BTCUSDT_1h_random_"));
        assert!(name.ends_with("_s1of4"));
    }
}
