// Configuration management for the strategy optimizer

use crate::aggregate::FilterThresholds;
use crate::cache::keys::MAX_LOOKBACK_DAYS;
use crate::cache::{BarInterval, DataRequest, DataSpan, ExpirySettings};
use crate::optimization::{ParamRange, ParamValue, ParameterSchema, ParameterSpace, SearchMode, Shard, StorageLayout};
use crate::transport::{create_transport, Transport, TransportKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the local backend (and the fallback for remote)
    pub root: PathBuf,
    pub cache_transport: TransportKind,
    pub results_transport: TransportKind,
    pub cache_prefix: String,
    pub results_prefix: String,
    pub logs_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            cache_transport: TransportKind::Local,
            results_transport: TransportKind::Local,
            cache_prefix: "cache".to_string(),
            results_prefix: "results".to_string(),
            logs_prefix: "logs".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn layout(&self) -> StorageLayout {
        StorageLayout {
            cache: self.cache_prefix.clone(),
            results: self.results_prefix.clone(),
            logs: self.logs_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub asset_category: String,
    pub symbol: String,
    pub interval: String,
    /// Trailing window in days; ignored when `start`/`end` are set
    pub lookback_days: Option<u32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Provider-disambiguating extras such as `exchange`
    pub extras: BTreeMap<String, String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            asset_category: "crypto".to_string(),
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            lookback_days: Some(90),
            start: None,
            end: None,
            extras: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub mode: SearchMode,
    /// Sample count in random mode
    pub iterations: usize,
    pub seed: u64,
    /// Evaluations between progress checkpoints
    pub progress_every: usize,
    /// `INDEX/COUNT`
    pub shard: Option<String>,
    pub run_name: Option<String>,
    pub progress_bar: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Grid,
            iterations: 100,
            seed: 42,
            progress_every: 10,
            shard: None,
            run_name: None,
            progress_bar: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Engine executable; parameters and bars are sent as JSON on stdin
    pub engine_command: Option<String>,
    pub engine_args: Vec<String>,
    /// Directory holding `{SYMBOL}_{interval}.csv` bar files
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub grid: BTreeMap<String, Vec<ParamValue>>,
    #[serde(default)]
    pub random: BTreeMap<String, ParamRange>,
    #[serde(default)]
    pub filters: FilterThresholds,
    #[serde(default)]
    pub expiry: ExpirySettings,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let mut grid = BTreeMap::new();
        grid.insert(
            "bb_window".to_string(),
            vec![ParamValue::Int(15), ParamValue::Int(20), ParamValue::Int(25)],
        );
        grid.insert(
            "bb_std".to_string(),
            vec![ParamValue::Float(1.5), ParamValue::Float(2.0), ParamValue::Float(2.5)],
        );
        grid.insert(
            "risk_reward_ratio".to_string(),
            vec![ParamValue::Float(1.5), ParamValue::Float(2.0)],
        );
        grid.insert(
            "require_reversal".to_string(),
            vec![ParamValue::Bool(false), ParamValue::Bool(true)],
        );

        let mut random = BTreeMap::new();
        random.insert(
            "bb_window".to_string(),
            ParamRange::Span {
                min: 10.0,
                max: 40.0,
                step: Some(5.0),
            },
        );
        random.insert(
            "bb_std".to_string(),
            ParamRange::Span {
                min: 1.0,
                max: 3.0,
                step: Some(0.25),
            },
        );

        Self {
            storage: StorageConfig::default(),
            data: DataConfig::default(),
            search: SearchConfig::default(),
            grid,
            random,
            filters: FilterThresholds::default(),
            expiry: ExpirySettings::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(format!("{}: {}", path.display(), e)))?;

        let config: OptimizerConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            info!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// Strategy parameter schema searched by this configuration
    pub fn schema(&self) -> ParameterSchema {
        ParameterSchema::bb_vwap()
    }

    /// Backend for the market-data and result caches
    pub fn cache_transport(&self) -> Arc<dyn Transport> {
        create_transport(self.storage.cache_transport, &self.storage.root)
    }

    /// Backend for result, order, progress and report files
    pub fn results_transport(&self) -> Arc<dyn Transport> {
        create_transport(self.storage.results_transport, &self.storage.root)
    }

    pub fn space(&self) -> ParameterSpace {
        ParameterSpace {
            grid: self.grid.clone(),
            random: self.random.clone(),
        }
    }

    pub fn interval(&self) -> Result<BarInterval, ConfigError> {
        self.data
            .interval
            .parse()
            .map_err(|e: String| ConfigError::Validation(format!("data.interval: {}", e)))
    }

    pub fn span(&self) -> Result<DataSpan, ConfigError> {
        match (self.data.start, self.data.end, self.data.lookback_days) {
            (Some(start), Some(end), _) => {
                if start >= end {
                    return Err(ConfigError::Validation(
                        "data.start must be before data.end".to_string(),
                    ));
                }
                Ok(DataSpan::Range { start, end })
            }
            (Some(_), None, _) | (None, Some(_), _) => Err(ConfigError::Validation(
                "data.start and data.end must be given together".to_string(),
            )),
            (None, None, Some(days)) if days > MAX_LOOKBACK_DAYS => Err(ConfigError::Validation(format!(
                "data.lookback_days must be at most {}, got {}",
                MAX_LOOKBACK_DAYS, days
            ))),
            (None, None, Some(days)) if days > 0 => Ok(DataSpan::Lookback { days }),
            (None, None, _) => Err(ConfigError::Validation(
                "data.lookback_days must be positive when no start/end range is set".to_string(),
            )),
        }
    }

    /// The market-data request this configuration describes
    pub fn data_request(&self) -> Result<DataRequest, ConfigError> {
        let request = DataRequest::new(&self.data.asset_category, &self.data.symbol, self.interval()?, self.span()?);
        Ok(self
            .data
            .extras
            .iter()
            .fold(request, |req, (k, v)| req.with_extra(k, v)))
    }

    pub fn shard(&self) -> Result<Shard, ConfigError> {
        match &self.search.shard {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| ConfigError::Validation(format!("search.shard: {}", e))),
            None => Ok(Shard::all()),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.symbol.trim().is_empty() {
            return Err(ConfigError::Validation("data.symbol must not be empty".to_string()));
        }
        if self.data.asset_category.trim().is_empty() {
            return Err(ConfigError::Validation("data.asset_category must not be empty".to_string()));
        }
        self.interval()?;
        self.span()?;
        self.shard()?;

        if self.search.mode == SearchMode::Random && self.search.iterations == 0 {
            return Err(ConfigError::Validation(
                "search.iterations must be greater than 0 in random mode".to_string(),
            ));
        }
        if self.search.progress_every == 0 {
            return Err(ConfigError::Validation(
                "search.progress_every must be greater than 0".to_string(),
            ));
        }

        for (name, prefix) in [
            ("storage.cache_prefix", &self.storage.cache_prefix),
            ("storage.results_prefix", &self.storage.results_prefix),
            ("storage.logs_prefix", &self.storage.logs_prefix),
        ] {
            if prefix.trim_matches('/').is_empty() || prefix.contains("..") {
                return Err(ConfigError::Validation(format!("{} must be a non-empty relative prefix", name)));
            }
        }

        self.filters.validate().map_err(ConfigError::Validation)?;
        self.expiry.validate().map_err(ConfigError::Validation)?;

        let schema = self.schema();
        let space = self.space();
        space
            .grid_size(&schema)
            .map_err(|e| ConfigError::Validation(format!("grid: {}", e)))?;
        if self.search.mode == SearchMode::Random {
            space
                .random_candidates(&schema, 1, self.search.seed)
                .map_err(|e| ConfigError::Validation(format!("random: {}", e)))?;
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
