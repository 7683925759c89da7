//! Unified error handling for the optimizer
//!
//! Errors are grouped the way the pipeline treats them: transport and cache
//! problems are contained (logged, counted, worked around), data-validity
//! problems skip the affected row or asset, and only fatal input errors stop a
//! batch.

use crate::config::ConfigError;
use crate::optimization::params::SchemaError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    // Misconfigured remote storage is recovered by falling back to local
    #[error(transparent)]
    Transport(#[from] TransportError),

    // Cache integrity (recovered by recomputing)
    #[error("Corrupt cache entry {key}: {reason}")]
    CacheIntegrity { key: String, reason: String },

    // Data validity (affected unit skipped)
    #[error("Invalid data: {0}")]
    DataValidity(String),

    // Fatal input errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot read input {path}: {reason}")]
    InputUnreadable { path: String, reason: String },

    #[error("Parameter schema error: {0}")]
    Schema(#[from] SchemaError),

    // External collaborators
    #[error("Backtest failed: {0}")]
    Backtest(String),

    #[error("Market data load failed: {0}")]
    DataLoad(String),

    // Encoding and I/O
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OptimizerError {
    /// Error category for logs and summaries
    pub fn category(&self) -> &'static str {
        match self {
            OptimizerError::Transport(TransportError::Config(_)) => "transport-config",
            OptimizerError::Transport(_) => "transport",
            OptimizerError::CacheIntegrity { .. } => "cache-integrity",
            OptimizerError::DataValidity(_) => "data-validity",
            OptimizerError::Config(_)
            | OptimizerError::InputUnreadable { .. }
            | OptimizerError::Schema(_) => "fatal-input",
            OptimizerError::Backtest(_) | OptimizerError::DataLoad(_) => "collaborator",
            OptimizerError::Csv(_) | OptimizerError::Json(_) | OptimizerError::Io(_) => "io",
        }
    }

    /// Only operator action can fix these
    pub fn is_fatal(&self) -> bool {
        self.category() == "fatal-input"
    }

    /// Message with a hint for the operator
    pub fn user_message(&self) -> String {
        match self {
            OptimizerError::Config(e) => {
                format!(
                    "{}\n\n\
                    💡 Quick fix:\n\
                    1. Run: optimizer init\n\
                    2. Check the TOML syntax and value ranges in your config file",
                    e
                )
            }
            OptimizerError::InputUnreadable { path, reason } => {
                format!(
                    "Cannot read {}: {}\n\n\
                    💡 Check:\n\
                    - The path exists in the selected storage backend\n\
                    - --results-transport / --storage-root point where the workers wrote",
                    path, reason
                )
            }
            OptimizerError::Schema(e) => {
                format!(
                    "{}\n\n\
                    💡 Parameter names and types in [grid] / [random] must match the strategy schema",
                    e
                )
            }
            OptimizerError::Transport(TransportError::Config(msg)) => {
                format!(
                    "Remote storage is not usable: {}\n\n\
                    💡 Set OPTIMIZER_REMOTE_ENDPOINT, OPTIMIZER_REMOTE_BUCKET,\n\
                    OPTIMIZER_REMOTE_ACCESS_KEY and OPTIMIZER_REMOTE_SECRET_KEY",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_category() {
        let err = OptimizerError::CacheIntegrity {
            key: "result-ab".to_string(),
            reason: "truncated".to_string(),
        };
        assert_eq!(err.category(), "cache-integrity");
        assert!(!err.is_fatal());

        let err = OptimizerError::InputUnreadable {
            path: "results/runs".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(err.category(), "fatal-input");
        assert!(err.is_fatal());

        let err: OptimizerError = TransportError::Config("bucket missing".to_string()).into();
        assert_eq!(err.category(), "transport-config");
    }

    #[test]
    fn test_user_message() {
        let err = OptimizerError::InputUnreadable {
            path: "results/runs".to_string(),
            reason: "no such directory".to_string(),
        };
        let msg = err.user_message();
        assert!(msg.contains("results/runs"));
        assert!(msg.contains("💡"));

        let err: OptimizerError = TransportError::Config("OPTIMIZER_REMOTE_BUCKET is not set".to_string()).into();
        let msg = err.user_message();
        assert!(msg.starts_with("Remote storage is not usable: OPTIMIZER_REMOTE_BUCKET"));
        assert!(msg.contains("OPTIMIZER_REMOTE_SECRET_KEY"));

        let err: OptimizerError = TransportError::NotFound("cache/x".to_string()).into();
        assert_eq!(err.user_message(), err.to_string());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let err: OptimizerError = io_err.into();
        assert!(matches!(err, OptimizerError::Io(_)));
        assert_eq!(err.category(), "io");
    }
}
