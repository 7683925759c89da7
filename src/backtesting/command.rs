//! External engine invoked as a subprocess
//!
//! The engine receives one JSON request on stdin and must print one JSON
//! `BacktestOutput` on stdout.

use super::{BacktestError, BacktestOutput, Backtester, MarketData};
use crate::optimization::params::ParameterSet;
use serde::Serialize;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Serialize)]
struct EngineRequest<'a> {
    symbol: &'a str,
    interval: &'a str,
    parameters: &'a ParameterSet,
    bars: &'a [super::Bar],
}

#[derive(Debug, Clone)]
pub struct CommandBacktester {
    program: String,
    args: Vec<String>,
}

impl CommandBacktester {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Backtester for CommandBacktester {
    fn run_backtest(&self, data: &MarketData, params: &ParameterSet) -> Result<BacktestOutput, BacktestError> {
        let request = EngineRequest {
            symbol: &data.symbol,
            interval: &data.interval,
            parameters: params,
            bars: &data.bars,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| BacktestError::Spawn(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BacktestError::Spawn(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .map_err(|e| BacktestError::Spawn(format!("writing request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BacktestError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(BacktestError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!("Engine returned {} bytes for {}", output.stdout.len(), params.label());
        serde_json::from_slice(&output.stdout).map_err(|e| BacktestError::BadOutput(e.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::optimization::params::ParameterSchema;

    fn data() -> MarketData {
        MarketData {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            bars: Vec::new(),
        }
    }

    #[test]
    fn test_parses_engine_output() {
        let script = r#"cat > /dev/null; echo '{"metrics":{"final_pnl":12.5,"total_trades":3,"win_rate":66.7,"sharpe_ratio":1.1,"max_drawdown":4.0},"trades":[]}'"#;
        let engine = CommandBacktester::new("sh", vec!["-c".to_string(), script.to_string()]);
        let params = ParameterSchema::bb_vwap().build_with_defaults(Vec::<(String, _)>::new()).unwrap();

        let output = engine.run_backtest(&data(), &params).unwrap();
        assert_eq!(output.metrics.total_trades, 3);
        assert_eq!(output.metrics.final_pnl, 12.5);
    }

    #[test]
    fn test_reports_engine_failure() {
        let engine = CommandBacktester::new(
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; echo boom >&2; exit 3".to_string()],
        );
        let params = ParameterSchema::bb_vwap().build_with_defaults(Vec::<(String, _)>::new()).unwrap();

        match engine.run_backtest(&data(), &params) {
            Err(BacktestError::Failed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
