// Aggregation and reconciliation commands
use clap::Args;
use strategy_optimizer::reconcile::DEFAULT_TOLERANCE;
use strategy_optimizer::transport::join_key;
use strategy_optimizer::{
    Aggregator, Objective, OptimizerConfig, OptimizerResult, PreFlightValidator, ReconcileSettings, Reconciler,
    Spinner,
};
use tracing::{info, warn};

#[derive(Args, Debug, Default)]
pub struct AggregateArgs {
    /// Prefix holding the workers' result CSVs [default: <results>/runs]
    #[arg(short, long)]
    pub input: Option<String>,

    /// Prefix for the generated artifacts [default: <results>/aggregated]
    #[arg(short, long)]
    pub output: Option<String>,

    /// Objectives to select for (repeatable) [default: all]
    #[arg(long = "objective")]
    pub objectives: Vec<Objective>,

    #[arg(long)]
    pub min_trades: Option<u64>,

    /// Minimum win rate in percent
    #[arg(long)]
    pub min_win_rate: Option<f64>,

    /// Maximum drawdown in percent
    #[arg(long)]
    pub max_drawdown: Option<f64>,
}

#[derive(Args, Debug, Default)]
pub struct ReconcileArgs {
    /// best_configs.csv or a per-asset JSON artifact
    /// [default: <results>/aggregated/final_pnl/best_configs.csv]
    #[arg(short, long)]
    pub best_configs: Option<String>,

    /// Prefix holding the workers' order CSVs [default: <results>/orders]
    #[arg(long)]
    pub orders: Option<String>,

    /// Prefix for equity curves and summaries [default: <results>/reconciled]
    #[arg(short, long)]
    pub output: Option<String>,

    /// Absolute tolerance for parameter matching
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Only per-asset curves
    #[arg(long)]
    pub skip_portfolio: bool,
}

fn ensure_valid(config: &OptimizerConfig) -> OptimizerResult<()> {
    let validation = PreFlightValidator::new(config.clone()).validate_for_reporting();
    if !validation.passed {
        validation.display();
        return Err(strategy_optimizer::OptimizerError::DataValidity(
            "configuration validation failed".to_string(),
        ));
    }
    Ok(())
}

pub fn aggregate(args: &AggregateArgs, config: &OptimizerConfig) -> OptimizerResult<()> {
    let mut thresholds = config.filters.clone();
    if let Some(v) = args.min_trades {
        thresholds.min_trades = v;
    }
    if let Some(v) = args.min_win_rate {
        thresholds.min_win_rate = v;
    }
    if let Some(v) = args.max_drawdown {
        thresholds.max_drawdown = v;
    }
    let mut config = config.clone();
    config.filters = thresholds.clone();
    ensure_valid(&config)?;

    let layout = config.storage.layout();
    let input = args.input.clone().unwrap_or_else(|| layout.runs_prefix());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| join_key(&[&layout.results, "aggregated"]));
    let objectives = if args.objectives.is_empty() {
        Objective::ALL.to_vec()
    } else {
        args.objectives.clone()
    };

    info!("🔎 Aggregating {} -> {}", input, output);
    for objective in &objectives {
        info!("   {}: {}", objective, objective.description());
    }

    let transport = config.results_transport();
    let aggregator = Aggregator::new(transport.clone(), transport, config.schema());
    let spinner = Spinner::new("Reading result files...");
    let report = match aggregator.run(&input, &output, &objectives, &thresholds) {
        Ok(report) => {
            spinner.finish(&format!("Read {} files", report.files_read));
            report
        }
        Err(e) => {
            spinner.finish_with_error(&e.to_string());
            return Err(e);
        }
    };

    info!("");
    info!("📊 Aggregation Summary");
    info!("   Files read:      {}", report.files_read);
    info!("   Rows read:       {}", report.rows_read);
    info!("   Rows passed:     {}", report.rows_passed);
    info!("   Rows rejected:   {}", report.rows_rejected);
    for (reason, count) in &report.rejections {
        info!("     {}: {}", reason, count);
    }
    if !report.unreadable_files.is_empty() {
        warn!("⚠️  {} unreadable files skipped", report.unreadable_files.len());
    }
    for objective in &report.objectives {
        info!(
            "🏆 {}: {} assets ({} omitted) -> {}",
            objective.objective,
            objective.assets_selected,
            objective.assets_omitted.len(),
            objective.output_prefix
        );
    }
    Ok(())
}

pub fn reconcile(args: &ReconcileArgs, config: &OptimizerConfig) -> OptimizerResult<()> {
    ensure_valid(config)?;

    let layout = config.storage.layout();
    let best_configs = args.best_configs.clone().unwrap_or_else(|| {
        join_key(&[
            &layout.results,
            "aggregated",
            Objective::FinalPnl.as_str(),
            "best_configs.csv",
        ])
    });
    let orders = args.orders.clone().unwrap_or_else(|| layout.orders_prefix());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| join_key(&[&layout.results, "reconciled"]));

    info!("🔗 Reconciling {} with orders under {}", best_configs, orders);

    let transport = config.results_transport();
    let reconciler = Reconciler::new(transport.clone(), transport);
    let settings = ReconcileSettings {
        tolerance: args.tolerance,
        skip_portfolio: args.skip_portfolio,
    };
    let report = reconciler.run(&best_configs, &orders, &output, &settings)?;

    info!("");
    info!("📊 Reconciliation Summary");
    info!("   Configurations: {}", report.configurations);
    info!("   Reconciled:     {}", report.reconciled.len());
    info!("   Skipped:        {}", report.skipped.len());
    for asset in &report.reconciled {
        info!(
            "   {}: {} trades, return {:.2}%, max DD {:.2}%",
            asset.asset_id, asset.summary.trades, asset.summary.return_pct, asset.summary.max_drawdown_pct
        );
    }
    if let Some(portfolio) = &report.portfolio {
        info!(
            "💼 Portfolio: {:.2} -> {:.2} ({:.2}%)",
            portfolio.starting_balance, portfolio.ending_balance, portfolio.return_pct
        );
    }
    if !report.warnings.is_empty() {
        warn!("⚠️  {} warning(s), see reconciliation_report.json", report.warnings.len());
    }
    info!("📁 Output: {}", output);
    Ok(())
}
