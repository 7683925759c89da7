//! Result and order CSV formats
//!
//! Search workers write these; the aggregator and reconciler read them back.
//! Readers are lenient about column order and extra columns. Any column that
//! is not a known metric or identity column is treated as a strategy
//! parameter.

use crate::backtesting::csv_loader::parse_timestamp;
use crate::backtesting::TradeRecord;
use crate::cache::BarInterval;
use crate::error::{OptimizerError, OptimizerResult};
use crate::optimization::{OptimizationRun, ParamValue, ParameterSchema, ParameterSet, RunMetrics};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Leading columns of a result file; parameter columns follow in schema order
pub const RESULT_COLUMNS: [&str; 9] = [
    "timestamp",
    "symbol",
    "interval",
    "final_pnl",
    "total_trades",
    "win_rate",
    "sharpe_ratio",
    "max_drawdown",
    "execution_time",
];

/// Leading columns of an order file; parameter columns follow
pub const ORDER_COLUMNS: [&str; 8] = [
    "optimization_run",
    "symbol",
    "interval",
    "entry_time",
    "datetime",
    "pnl",
    "balance_before",
    "balance_after",
];

/// Non-parameter columns tolerated in foreign files
const IGNORED_COLUMNS: [&str; 2] = ["run_id", "source_file"];

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Swap in an empty buffer and hand back what the old one held
fn drain_writer(writer: &mut csv::Writer<Vec<u8>>) -> OptimizerResult<Vec<u8>> {
    let full = std::mem::replace(writer, csv::Writer::from_writer(Vec::new()));
    full.into_inner()
        .map_err(|e| OptimizerError::from(e.into_error()))
}

/// Result CSV encoder. Rows are held only until the next `drain`, so a
/// checkpoint ships just the rows written since the previous one.
pub struct ResultCsvWriter {
    writer: csv::Writer<Vec<u8>>,
    param_names: Vec<String>,
    rows: usize,
}

impl ResultCsvWriter {
    pub fn new(schema: &ParameterSchema) -> OptimizerResult<Self> {
        let param_names: Vec<String> = schema.names().map(str::to_string).collect();
        let mut writer = csv::Writer::from_writer(Vec::new());
        let header: Vec<&str> = RESULT_COLUMNS
            .iter()
            .copied()
            .chain(param_names.iter().map(String::as_str))
            .collect();
        writer.write_record(&header)?;
        Ok(Self {
            writer,
            param_names,
            rows: 0,
        })
    }

    pub fn write_run(&mut self, run: &OptimizationRun) -> OptimizerResult<()> {
        let m = &run.metrics;
        let mut record = vec![
            run.timestamp.clone(),
            run.symbol.clone(),
            run.interval.clone(),
            m.final_pnl.to_string(),
            m.total_trades.to_string(),
            m.win_rate.to_string(),
            m.sharpe_ratio.to_string(),
            m.max_drawdown.to_string(),
            format!("{:.6}", m.execution_time),
        ];
        for name in &self.param_names {
            record.push(run.parameters.get(name).map(|v| v.to_string()).unwrap_or_default());
        }
        self.writer.write_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Bytes written since the previous drain; the first drain starts with
    /// the header
    pub fn drain(&mut self) -> OptimizerResult<Vec<u8>> {
        drain_writer(&mut self.writer)
    }
}

/// Order-log CSV encoder, drained like `ResultCsvWriter`
pub struct OrderCsvWriter {
    writer: csv::Writer<Vec<u8>>,
    param_names: Vec<String>,
    rows: usize,
}

impl OrderCsvWriter {
    pub fn new(schema: &ParameterSchema) -> OptimizerResult<Self> {
        let param_names: Vec<String> = schema.names().map(str::to_string).collect();
        let mut writer = csv::Writer::from_writer(Vec::new());
        let header: Vec<&str> = ORDER_COLUMNS
            .iter()
            .copied()
            .chain(param_names.iter().map(String::as_str))
            .collect();
        writer.write_record(&header)?;
        Ok(Self {
            writer,
            param_names,
            rows: 0,
        })
    }

    pub fn write_trades(&mut self, run: &OptimizationRun, trades: &[TradeRecord]) -> OptimizerResult<()> {
        let params: Vec<String> = self
            .param_names
            .iter()
            .map(|name| run.parameters.get(name).map(|v| v.to_string()).unwrap_or_default())
            .collect();

        for trade in trades {
            let mut record = vec![
                run.run_id.to_string(),
                run.symbol.clone(),
                run.interval.clone(),
                format_time(&trade.entry_time),
                format_time(&trade.exit_time),
                trade.pnl.to_string(),
                trade.balance_before.to_string(),
                trade.balance_after.to_string(),
            ];
            record.extend(params.iter().cloned());
            self.writer.write_record(&record)?;
            self.rows += 1;
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn drain(&mut self) -> OptimizerResult<Vec<u8>> {
        drain_writer(&mut self.writer)
    }
}

/// One executed trade read back from an order file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Informational only; never used for matching
    pub optimization_run: Option<String>,
    pub symbol: String,
    pub interval: String,
    pub entry_time: Option<DateTime<Utc>>,
    pub datetime: DateTime<Utc>,
    pub pnl: f64,
    pub balance_before: f64,
    pub balance_after: f64,
    pub parameters: ParameterSet,
    pub source_file: String,
}

impl OrderRecord {
    pub fn asset_id(&self) -> String {
        format!("{}_{}", self.symbol, self.interval)
    }
}

/// Rows read from one file plus how many were unusable
#[derive(Debug, Clone)]
pub struct ParsedFile<T> {
    pub rows: Vec<T>,
    pub skipped_rows: usize,
}

/// Upper-cased symbol and canonical interval; unknown interval spellings are
/// kept as written
pub fn normalize_asset(symbol: &str, interval: &str) -> (String, String) {
    let interval = interval
        .parse::<BarInterval>()
        .map(|i| i.to_string())
        .unwrap_or_else(|_| interval.trim().to_string());
    (symbol.trim().to_ascii_uppercase(), interval)
}

/// `SYMBOL_interval` taken from a file name such as
/// `runs/BTCUSDT_1h_grid_20240101000000.csv`
pub fn asset_from_file_name(path: &str) -> Option<(String, String)> {
    let name = path.rsplit('/').next()?;
    let stem = name.split('.').next()?;
    let mut parts = stem.split('_');
    let symbol = parts.next().filter(|s| !s.is_empty())?;
    let interval = parts.next()?.parse::<BarInterval>().ok()?;
    Some(normalize_asset(symbol, &interval.to_string()))
}

struct Columns {
    index: BTreeMap<String, usize>,
    params: Vec<(usize, String)>,
}

impl Columns {
    fn new(headers: &csv::StringRecord, known: &[&str]) -> Self {
        let mut index = BTreeMap::new();
        let mut params = Vec::new();
        for (i, raw) in headers.iter().enumerate() {
            let name = raw.trim().to_string();
            if known.contains(&name.as_str()) {
                index.insert(name, i);
            } else if !name.is_empty() && !IGNORED_COLUMNS.contains(&name.as_str()) {
                params.push((i, name));
            }
        }
        Self { index, params }
    }

    fn require(&self, names: &[&str], source: &str) -> OptimizerResult<()> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| !self.index.contains_key(*n))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(OptimizerError::DataValidity(format!(
                "{}: missing columns {}",
                source,
                missing.join(", ")
            )))
        }
    }

    fn cell<'r>(&self, record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        self.index
            .get(name)
            .and_then(|i| record.get(*i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn number(&self, record: &csv::StringRecord, name: &str) -> Option<f64> {
        self.cell(record, name)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    fn asset(&self, record: &csv::StringRecord, fallback: &Option<(String, String)>) -> Option<(String, String)> {
        match (self.cell(record, "symbol"), self.cell(record, "interval")) {
            (Some(symbol), Some(interval)) => Some(normalize_asset(symbol, interval)),
            _ => fallback.clone(),
        }
    }

    fn parameters(&self, record: &csv::StringRecord, schema: Option<&ParameterSchema>) -> ParameterSet {
        let mut values = BTreeMap::new();
        for (i, name) in &self.params {
            let Some(value) = record.get(*i).and_then(ParamValue::parse_cell) else {
                continue;
            };
            let value = match schema.and_then(|s| s.field(name)) {
                Some(field) => field.coerce(value).unwrap_or(value),
                None => value,
            };
            values.insert(name.clone(), value);
        }
        ParameterSet::from_values(values)
    }
}

/// Parse a result file. `run_id` is the 1-based data-row position in the file.
pub fn read_result_csv(
    bytes: &[u8],
    source_file: &str,
    schema: &ParameterSchema,
) -> OptimizerResult<ParsedFile<OptimizationRun>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let columns = Columns::new(reader.headers()?, &RESULT_COLUMNS);
    columns.require(&["final_pnl", "total_trades", "win_rate", "max_drawdown"], source_file)?;
    let fallback = asset_from_file_name(source_file);

    let mut rows = Vec::new();
    let mut skipped_rows = 0;
    for (i, record) in reader.records().enumerate() {
        let row = i + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!("{} row {}: {}", source_file, row, e);
                skipped_rows += 1;
                continue;
            }
        };

        let parsed = (|| {
            let (symbol, interval) = columns.asset(&record, &fallback)?;
            let metrics = RunMetrics {
                final_pnl: columns.number(&record, "final_pnl")?,
                total_trades: columns
                    .number(&record, "total_trades")
                    .filter(|t| *t >= 0.0)
                    .map(|t| t.round() as u64)?,
                win_rate: columns.number(&record, "win_rate")?,
                sharpe_ratio: columns.number(&record, "sharpe_ratio").unwrap_or(0.0),
                max_drawdown: columns.number(&record, "max_drawdown")?,
                execution_time: columns.number(&record, "execution_time").unwrap_or(0.0),
            };
            Some(OptimizationRun {
                run_id: row,
                source_file: source_file.to_string(),
                timestamp: columns.cell(&record, "timestamp").unwrap_or_default().to_string(),
                symbol,
                interval,
                metrics,
                parameters: columns.parameters(&record, Some(schema)),
            })
        })();

        match parsed {
            Some(run) => rows.push(run),
            None => {
                debug!("{} row {}: missing metric or asset identity", source_file, row);
                skipped_rows += 1;
            }
        }
    }

    Ok(ParsedFile { rows, skipped_rows })
}

/// Parse an order file. Parameters are read as written, without schema
/// coercion, since they are only ever compared with tolerance.
pub fn read_order_csv(bytes: &[u8], source_file: &str) -> OptimizerResult<ParsedFile<OrderRecord>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let columns = Columns::new(reader.headers()?, &ORDER_COLUMNS);
    columns.require(&["datetime", "pnl", "balance_before", "balance_after"], source_file)?;
    let fallback = asset_from_file_name(source_file);

    let mut rows = Vec::new();
    let mut skipped_rows = 0;
    for (i, record) in reader.records().enumerate() {
        let Ok(record) = record else {
            skipped_rows += 1;
            continue;
        };

        let parsed = (|| {
            let (symbol, interval) = columns.asset(&record, &fallback)?;
            Some(OrderRecord {
                optimization_run: columns.cell(&record, "optimization_run").map(str::to_string),
                symbol,
                interval,
                entry_time: columns.cell(&record, "entry_time").and_then(parse_timestamp),
                datetime: columns.cell(&record, "datetime").and_then(parse_timestamp)?,
                pnl: columns.number(&record, "pnl")?,
                balance_before: columns.number(&record, "balance_before")?,
                balance_after: columns.number(&record, "balance_after")?,
                parameters: columns.parameters(&record, None),
                source_file: source_file.to_string(),
            })
        })();

        match parsed {
            Some(order) => rows.push(order),
            None => {
                debug!("{} row {}: unusable order record", source_file, i + 1);
                skipped_rows += 1;
            }
        }
    }

    Ok(ParsedFile { rows, skipped_rows })
}
