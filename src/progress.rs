//! Progress reporting for long-running searches
//!
//! A terminal bar via indicatif, plus a small JSON status record that the
//! search driver republishes to the logs location so other machines can
//! follow a run without a terminal.

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progress bar for search iterations
pub struct OptimizationProgress {
    pub progress: ProgressBar,
    pub total_iterations: usize,
}

impl OptimizationProgress {
    /// Create a new optimization progress bar
    pub fn new(total_iterations: usize) -> Self {
        let progress = ProgressBar::new(total_iterations as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})\n{msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        Self {
            progress,
            total_iterations,
        }
    }

    /// Bar that never draws; used for batch runs and tests
    pub fn hidden(total_iterations: usize) -> Self {
        let progress = ProgressBar::with_draw_target(Some(total_iterations as u64), ProgressDrawTarget::hidden());
        Self {
            progress,
            total_iterations,
        }
    }

    /// Update progress with current iteration and best PnL so far
    pub fn update(&self, iteration: usize, best_pnl: Option<f64>, current_params: &str) {
        self.progress.set_position(iteration as u64);
        let best = best_pnl
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_string());
        self.progress
            .set_message(format!("🎯 Best PnL: {} | Testing: {}", best, current_params));
    }

    /// Mark search as complete
    pub fn finish(&self, best_pnl: Option<f64>) {
        let message = match best_pnl {
            Some(p) => format!("✅ Search complete! Best PnL: {:.2}", p),
            None => "✅ Search complete! No successful evaluations".to_string(),
        };
        self.progress.finish_with_message(message);
    }

    /// Mark search as failed
    pub fn finish_with_error(&self, error: &str) {
        self.progress.finish_with_message(format!("❌ Failed: {}", error));
    }
}

/// Spinner for quick operations
pub struct Spinner {
    pub spinner: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message(message.to_string());

        Self { spinner }
    }

    pub fn finish(&self, message: &str) {
        self.spinner.finish_with_message(format!("✅ {}", message));
    }

    pub fn finish_with_error(&self, message: &str) {
        self.spinner.finish_with_message(format!("❌ {}", message));
    }
}

/// Snapshot of a running search, published as `{logs}/progress/{run}.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStatus {
    pub run_name: String,
    pub completed: usize,
    pub total: usize,
    pub computed: usize,
    pub cached: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
    pub eta_secs: Option<f64>,
    pub finished: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProgressStatus {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

/// Remaining time from the average so far; `None` until something completed
pub fn estimate_remaining(elapsed: Duration, completed: usize, total: usize) -> Option<f64> {
    if completed == 0 {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / completed as f64;
    Some(per_item * total.saturating_sub(completed) as f64)
}
