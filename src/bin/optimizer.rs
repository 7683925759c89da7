// Strategy Optimizer - unified CLI
// Search workers, cross-worker aggregation, reconciliation and cache upkeep

use clap::{Parser, Subcommand, ValueEnum};
use strategy_optimizer::{ConfigError, OptimizerConfig, TransportKind};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Load command modules from cli directory
#[path = "../cli/cache_commands.rs"]
mod cache_commands;
#[path = "../cli/report_commands.rs"]
mod report_commands;
#[path = "../cli/search_commands.rs"]
mod search_commands;

#[derive(Parser)]
#[command(name = "optimizer")]
#[command(version = "0.3.0")]
#[command(about = "Distributed strategy parameter search and result aggregation", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml", env = "OPTIMIZER_CONFIG")]
    config: String,

    /// Root directory for the local storage backend
    #[arg(long, global = true, env = "OPTIMIZER_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Backend for the shared caches (local or remote)
    #[arg(long, global = true, env = "OPTIMIZER_CACHE_TRANSPORT")]
    cache_transport: Option<TransportKind>,

    /// Backend for result, order and report files (local or remote)
    #[arg(long, global = true, env = "OPTIMIZER_RESULTS_TRANSPORT")]
    results_transport: Option<TransportKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run pre-flight checks without searching
    Validate,

    /// Run one search worker
    Search(search_commands::SearchArgs),

    /// Merge result files from every worker and pick winners
    Aggregate(report_commands::AggregateArgs),

    /// Rebuild equity curves for selected configurations from order logs
    Reconcile(report_commands::ReconcileArgs),

    /// Inspect and maintain the shared caches
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CacheTarget {
    MarketData,
    Results,
    All,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Entry counts and sizes
    Stats {
        #[arg(short, long, value_enum, default_value = "all")]
        kind: CacheTarget,
    },

    /// Delete expired and unreadable entries
    Sweep {
        #[arg(short, long, value_enum, default_value = "all")]
        kind: CacheTarget,
    },

    /// Delete every entry
    Clear {
        #[arg(short, long, value_enum, default_value = "all")]
        kind: CacheTarget,

        /// Required to actually delete
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging first (before config load so we can see config errors)
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Strategy Optimizer v0.3.0");
    info!("📁 Config: {}", cli.config);

    let outcome = match &cli.command {
        // Init doesn't require config (it creates it)
        Commands::Init { force } => init_config(&cli.config, *force),
        command => {
            let config = load_config_or_exit(&cli);
            match command {
                Commands::Init { .. } => Ok(()),
                Commands::Validate => search_commands::validate(&config),
                Commands::Search(args) => search_commands::run_search(args, config),
                Commands::Aggregate(args) => report_commands::aggregate(args, &config),
                Commands::Reconcile(args) => report_commands::reconcile(args, &config),
                Commands::Cache(CacheCommands::Stats { kind }) => cache_commands::stats(*kind, &config),
                Commands::Cache(CacheCommands::Sweep { kind }) => cache_commands::sweep(*kind, &config),
                Commands::Cache(CacheCommands::Clear { kind, yes }) => cache_commands::clear(*kind, *yes, &config),
            }
        }
    };

    if let Err(e) = outcome {
        error!("❌ {} error: {}", e.category(), e.user_message());
        std::process::exit(1);
    }
}

/// Load config, apply command-line overrides, or exit with a helpful message
fn load_config_or_exit(cli: &Cli) -> OptimizerConfig {
    let mut config = match OptimizerConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration Error");
            error!("{}", e);

            if matches!(e, ConfigError::FileRead(_)) {
                error!("");
                error!("💡 Quick fix:");
                error!("   1. Run: optimizer init");
                error!("   2. Edit {} (symbol, grid, backtest.engine_command)", cli.config);
                error!("   3. Try again");
            }

            std::process::exit(1);
        }
    };

    if let Some(root) = &cli.storage_root {
        config.storage.root = root.clone();
    }
    if let Some(kind) = cli.cache_transport {
        config.storage.cache_transport = kind;
    }
    if let Some(kind) = cli.results_transport {
        config.storage.results_transport = kind;
    }
    config
}

fn init_config(config_path: &str, force: bool) -> strategy_optimizer::OptimizerResult<()> {
    info!("🔧 Initializing configuration...");

    if std::path::Path::new(config_path).exists() && !force {
        warn!("⚠️  {} already exists, skipping (use --force to overwrite)", config_path);
        return Ok(());
    }

    let default_config = include_str!("../../config.toml.example");
    std::fs::write(config_path, default_config)?;
    info!("📝 Created {}", config_path);

    info!("✅ Configuration initialized!");
    info!("💡 Next steps:");
    info!("   1. Set backtest.engine_command and backtest.data_dir in {}", config_path);
    info!("   2. Run: optimizer search --shard 0/4   (one per worker)");
    info!("   3. Run: optimizer aggregate");
    Ok(())
}
