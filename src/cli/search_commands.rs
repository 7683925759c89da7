// Search worker commands
use clap::Args;
use strategy_optimizer::backtesting::BacktestError;
use strategy_optimizer::{
    CommandBacktester, CsvMarketDataLoader, DataRequest, MarketData, MarketDataLoader, OptimizerConfig, OptimizerError,
    OptimizerResult, PreFlightValidator, SearchDriver, SearchMode, SearchSettings,
};
use tracing::{info, warn};

#[derive(Args, Debug, Default)]
pub struct SearchArgs {
    /// Search mode (grid or random)
    #[arg(short, long)]
    pub mode: Option<SearchMode>,

    /// Random-search iterations
    #[arg(short, long)]
    pub iterations: Option<usize>,

    /// Random-search seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// This worker's shard as INDEX/COUNT, e.g. 0/4
    #[arg(long, env = "OPTIMIZER_SHARD")]
    pub shard: Option<String>,

    /// Name for the result, order and progress files
    #[arg(long)]
    pub run_name: Option<String>,

    /// Override the configured symbol
    #[arg(long)]
    pub symbol: Option<String>,

    /// Override the configured bar interval
    #[arg(long)]
    pub interval: Option<String>,

    /// Hide the progress bar (log lines only)
    #[arg(long)]
    pub no_progress: bool,

    /// Skip pre-flight checks
    #[arg(long)]
    pub skip_validation: bool,
}

impl SearchArgs {
    /// Fold command-line overrides into the loaded configuration
    pub fn apply(&self, mut config: OptimizerConfig) -> OptimizerResult<OptimizerConfig> {
        if let Some(mode) = self.mode {
            config.search.mode = mode;
        }
        if let Some(iterations) = self.iterations {
            config.search.iterations = iterations;
        }
        if let Some(seed) = self.seed {
            config.search.seed = seed;
        }
        if self.shard.is_some() {
            config.search.shard = self.shard.clone();
        }
        if self.run_name.is_some() {
            config.search.run_name = self.run_name.clone();
        }
        if let Some(symbol) = &self.symbol {
            config.data.symbol = symbol.clone();
        }
        if let Some(interval) = &self.interval {
            config.data.interval = interval.clone();
        }
        if self.no_progress {
            config.search.progress_bar = false;
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn validate(config: &OptimizerConfig) -> OptimizerResult<()> {
    let validation = PreFlightValidator::new(config.clone()).validate_for_search();
    validation.display();
    if validation.passed {
        Ok(())
    } else {
        Err(OptimizerError::DataValidity("pre-flight validation failed".to_string()))
    }
}

pub fn run_search(args: &SearchArgs, config: OptimizerConfig) -> OptimizerResult<()> {
    let config = args.apply(config)?;

    if !args.skip_validation {
        validate(&config)?;
    }

    let schema = config.schema();
    let shard = config.shard()?;
    let candidates = config.space().candidates(
        &schema,
        config.search.mode,
        config.search.iterations,
        config.search.seed,
        shard,
    )?;
    let request = config.data_request()?;

    info!("🎯 {} {} search for {}", config.search.mode, shard, request.asset_id());
    info!("   Candidates: {}", candidates.len());
    if config.search.mode == SearchMode::Random {
        info!("   Seed: {}", config.search.seed);
    }

    let engine = config.backtest.engine_command.as_deref().ok_or_else(|| {
        OptimizerError::Config(strategy_optimizer::ConfigError::Validation(
            "backtest.engine_command is not set".to_string(),
        ))
    })?;
    let backtester = CommandBacktester::new(engine, config.backtest.engine_args.clone());

    let csv_loader = config.backtest.data_dir.clone().map(CsvMarketDataLoader::new);
    let cache_only = |request: &DataRequest| -> Result<MarketData, BacktestError> {
        Err(BacktestError::Data(format!(
            "{} is not cached and no backtest.data_dir is configured",
            request.asset_id()
        )))
    };
    let loader: &dyn MarketDataLoader = match &csv_loader {
        Some(loader) => loader,
        None => {
            warn!("⚠️  No data directory configured; relying on cached market data");
            &cache_only
        }
    };

    let driver = SearchDriver::new(
        config.cache_transport(),
        config.results_transport(),
        config.storage.layout(),
        config.expiry.clone(),
        schema,
        SearchSettings {
            mode: config.search.mode,
            shard,
            run_name: config.search.run_name.clone(),
            progress_every: config.search.progress_every,
            show_progress_bar: config.search.progress_bar,
        },
    );

    let summary = driver.run(&request, &candidates, loader, &backtester)?;

    info!("");
    info!("📊 Search Summary: {}", summary.run_name);
    info!("   Evaluated: {} of {}", summary.completed, summary.total);
    info!("   Computed:  {}", summary.computed);
    info!("   Cached:    {}", summary.cached);
    info!("   Failed:    {}", summary.failed);
    info!("   Elapsed:   {:.1}s", summary.elapsed_secs);
    if let Some(best) = &summary.trackers.best_pnl {
        info!("🏆 Best PnL: {:.2} [{}]", best.metrics.final_pnl, best.parameters.label());
    }
    if let Some(best) = &summary.trackers.best_sharpe {
        info!("   Best Sharpe: {:.3} [{}]", best.metrics.sharpe_ratio, best.parameters.label());
    }
    info!("📁 Results: {}", summary.results_file);
    info!("📁 Orders:  {}", summary.orders_file);
    Ok(())
}
