//! Pre-flight validation for optimization runs
//!
//! Checks configuration, candidate space, data source and backtest engine
//! before any work is scheduled, so a misconfigured worker fails in seconds
//! rather than after loading data.

use crate::config::OptimizerConfig;
use crate::optimization::SearchMode;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Above this many candidates per worker a shard split is suggested
const LARGE_SEARCH_WARNING: usize = 10_000;

/// Validation result with detailed findings
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
}

#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub level: ValidationLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLevel {
    Critical, // Must pass for the run to proceed
    Warning,  // Should pass, but the run can continue
    Info,
}

impl ValidationCheck {
    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            level: ValidationLevel::Info,
        }
    }

    fn fail(name: &str, level: ValidationLevel, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            level,
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        ValidationResult {
            passed: true,
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, check: ValidationCheck) {
        if !check.passed && check.level == ValidationLevel::Critical {
            self.passed = false;
        }
        self.checks.push(check);
    }

    pub fn critical_failures(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.level == ValidationLevel::Critical)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.level == ValidationLevel::Warning)
            .collect()
    }

    pub fn display(&self) {
        info!("🔍 Pre-flight Validation");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        for check in &self.checks {
            let icon = if check.passed {
                "✅"
            } else {
                match check.level {
                    ValidationLevel::Critical => "❌",
                    ValidationLevel::Warning => "⚠️",
                    ValidationLevel::Info => "ℹ️",
                }
            };
            info!("{} {} - {}", icon, check.name, check.message);
        }

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if !self.passed {
            let failures = self.critical_failures();
            error!("❌ Validation failed: {} critical issue(s)", failures.len());
            for failure in failures {
                error!("   • {}: {}", failure.name, failure.message);
            }
        } else {
            let warnings = self.warnings();
            if !warnings.is_empty() {
                warn!("⚠️  {} warning(s) detected", warnings.len());
                for warning in warnings {
                    warn!("   • {}: {}", warning.name, warning.message);
                }
            }
            info!("✅ All critical checks passed");
        }
    }
}

/// Pre-flight validator for search workers
pub struct PreFlightValidator {
    config: OptimizerConfig,
}

impl PreFlightValidator {
    pub fn new(config: OptimizerConfig) -> Self {
        PreFlightValidator { config }
    }

    /// Everything a search worker needs
    pub fn validate_for_search(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        let config_check = self.check_config();
        let config_ok = config_check.passed;
        result.add_check(config_check);
        if config_ok {
            result.add_check(self.check_candidates());
        }
        result.add_check(self.check_data_dir());
        result.add_check(self.check_engine());

        result
    }

    /// Aggregation and reconciliation only touch storage
    pub fn validate_for_reporting(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        result.add_check(self.check_config());
        result
    }

    fn check_config(&self) -> ValidationCheck {
        match self.config.validate() {
            Ok(()) => ValidationCheck::ok(
                "Configuration",
                format!(
                    "{} {} ({} mode)",
                    self.config.data.symbol, self.config.data.interval, self.config.search.mode
                ),
            ),
            Err(e) => ValidationCheck::fail("Configuration", ValidationLevel::Critical, e.to_string()),
        }
    }

    fn check_candidates(&self) -> ValidationCheck {
        let schema = self.config.schema();
        let space = self.config.space();
        let total = match self.config.search.mode {
            SearchMode::Grid => match space.grid_size(&schema) {
                Ok(n) => n,
                Err(e) => return ValidationCheck::fail("Candidates", ValidationLevel::Critical, e.to_string()),
            },
            SearchMode::Random => self.config.search.iterations,
        };
        let shard = match self.config.shard() {
            Ok(s) => s,
            Err(e) => return ValidationCheck::fail("Candidates", ValidationLevel::Critical, e.to_string()),
        };
        let assigned = (0..total).filter(|&i| shard.includes(i)).count();

        if assigned == 0 {
            ValidationCheck::fail(
                "Candidates",
                ValidationLevel::Critical,
                format!("shard {} receives none of {} candidates", shard, total),
            )
        } else if assigned > LARGE_SEARCH_WARNING {
            ValidationCheck::fail(
                "Candidates",
                ValidationLevel::Warning,
                format!("{} candidates for shard {}; consider more shards", assigned, shard),
            )
        } else {
            ValidationCheck::ok("Candidates", format!("{} of {} (shard {})", assigned, total, shard))
        }
    }

    fn check_data_dir(&self) -> ValidationCheck {
        match &self.config.backtest.data_dir {
            Some(dir) if dir.is_dir() => ValidationCheck::ok("Market Data", dir.display().to_string()),
            Some(dir) => ValidationCheck::fail(
                "Market Data",
                ValidationLevel::Critical,
                format!("data directory {} not found", dir.display()),
            ),
            None => ValidationCheck::fail(
                "Market Data",
                ValidationLevel::Warning,
                "no data directory configured; only cached market data can be used",
            ),
        }
    }

    fn check_engine(&self) -> ValidationCheck {
        let Some(command) = &self.config.backtest.engine_command else {
            return ValidationCheck::fail(
                "Backtest Engine",
                ValidationLevel::Critical,
                "backtest.engine_command is not set",
            );
        };
        match find_program(command) {
            Some(path) => ValidationCheck::ok("Backtest Engine", path.display().to_string()),
            None => ValidationCheck::fail(
                "Backtest Engine",
                ValidationLevel::Warning,
                format!("'{}' not found on PATH", command),
            ),
        }
    }
}

/// Resolve a program name the way a shell would, without running it
fn find_program(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_result() {
        let mut result = ValidationResult::new();
        assert!(result.passed);

        result.add_check(ValidationCheck::ok("Test", "OK"));
        result.add_check(ValidationCheck::fail("Soft", ValidationLevel::Warning, "meh"));
        assert!(result.passed);
        assert_eq!(result.warnings().len(), 1);

        result.add_check(ValidationCheck::fail("Fail", ValidationLevel::Critical, "Failed"));
        assert!(!result.passed);
        assert_eq!(result.critical_failures().len(), 1);
    }

    #[test]
    fn test_search_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OptimizerConfig::default();
        config.backtest.data_dir = Some(dir.path().to_path_buf());
        config.backtest.engine_command = None;

        let result = PreFlightValidator::new(config.clone()).validate_for_search();
        assert!(!result.passed);
        assert_eq!(result.critical_failures()[0].name, "Backtest Engine");

        let engine = dir.path().join("engine.sh");
        std::fs::write(&engine, "#!/bin/sh\n").unwrap();
        config.backtest.engine_command = Some(engine.display().to_string());
        let result = PreFlightValidator::new(config.clone()).validate_for_search();
        assert!(result.passed, "{:?}", result.checks);

        config.backtest.data_dir = Some(dir.path().join("missing"));
        assert!(!PreFlightValidator::new(config).validate_for_search().passed);
    }

    #[test]
    fn test_empty_shard_is_critical() {
        let mut config = OptimizerConfig::default();
        config.search.mode = SearchMode::Random;
        config.search.iterations = 2;
        config.search.shard = Some("4/5".to_string());
        let check = PreFlightValidator::new(config).check_candidates();
        assert!(!check.passed);
        assert_eq!(check.level, ValidationLevel::Critical);
    }
}
