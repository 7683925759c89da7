// Strategy Optimizer Library
//
// Sharded parameter search with a shared cache, cross-worker aggregation of
// results and reconciliation of winners against their order logs

pub mod aggregate;
pub mod backtesting;
pub mod cache;
pub mod config;
pub mod error;      // Unified error handling
pub mod optimization;
pub mod progress;
pub mod reconcile;
pub mod records;    // Result and order CSV formats
pub mod transport;
pub mod validation; // Pre-flight validation

// Re-export error types
pub use error::{OptimizerError, OptimizerResult};

// Re-export validation types
pub use validation::{PreFlightValidator, ValidationCheck, ValidationLevel, ValidationResult};

// Re-export configuration
pub use config::{ConfigError, OptimizerConfig};

// Re-export storage and cache
pub use cache::{
    BarInterval, CacheKey, CacheKind, CacheMaintenance, DataRequest, DataSpan, ExpiryPolicy, ExpirySettings,
    MarketDataCache, ResultCache,
};
pub use transport::{create_transport, LocalTransport, RemoteTransport, Transport, TransportError, TransportKind};

// Re-export backtesting seams
pub use backtesting::{
    Backtester, BacktestError, BacktestOutput, CommandBacktester, CsvMarketDataLoader, MarketData, MarketDataLoader,
};

// Re-export search, aggregation and reconciliation
pub use aggregate::{Aggregator, FilterThresholds, Objective};
pub use optimization::{
    BestTrackers, OptimizationRun, ParamValue, ParameterSchema, ParameterSet, ParameterSpace, RunMetrics,
    SearchDriver, SearchMode, SearchSettings, Shard,
};
pub use progress::{OptimizationProgress, Spinner};
pub use reconcile::{ReconcileSettings, Reconciler};
