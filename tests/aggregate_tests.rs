// Integration tests for cross-worker aggregation

mod common;

use common::{run_row, temp_transport};
use strategy_optimizer::aggregate::artifacts::read_best_configs_csv;
use strategy_optimizer::aggregate::{AggregationReport, BestConfigArtifact, FilterReason, PortfolioSummary};
use strategy_optimizer::records::ResultCsvWriter;
use strategy_optimizer::{
    Aggregator, FilterThresholds, Objective, OptimizationRun, OptimizerError, ParamValue, ParameterSchema, Transport,
};

fn write_results(transport: &dyn Transport, key: &str, rows: &[OptimizationRun]) {
    let mut writer = ResultCsvWriter::new(&ParameterSchema::bb_vwap()).unwrap();
    for row in rows {
        writer.write_run(row).unwrap();
    }
    transport.put(key, &writer.drain().unwrap()).unwrap();
}

fn aggregator(transport: std::sync::Arc<dyn Transport>) -> Aggregator {
    Aggregator::new(transport.clone(), transport, ParameterSchema::bb_vwap())
}

#[test]
fn test_three_workers_single_winner() {
    let (_dir, transport) = temp_transport();
    write_results(&*transport, "results/runs/w0.csv", &[run_row("BTCUSDT", "1h", 100.0, 20, 10)]);
    write_results(&*transport, "results/runs/w1.csv", &[run_row("BTCUSDT", "1h", -50.0, 5, 20)]);
    write_results(&*transport, "results/runs/w2.csv", &[run_row("BTCUSDT", "1h", 300.0, 50, 30)]);

    let thresholds = FilterThresholds {
        min_trades: 10,
        ..FilterThresholds::default()
    };
    let report = aggregator(transport.clone())
        .run("results/runs", "results/aggregated", &[Objective::FinalPnl], &thresholds)
        .unwrap();

    assert_eq!(report.files_read, 3);
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_passed, 2);
    assert_eq!(report.rows_rejected, 1);
    assert_eq!(report.rejections.get(&FilterReason::TooFewTrades), Some(&1));
    assert_eq!(report.rejections.get(&FilterReason::NonPositivePnl), Some(&1));

    let artifact: BestConfigArtifact = serde_json::from_slice(
        &transport
            .get("results/aggregated/final_pnl/BTCUSDT_1h.json")
            .unwrap(),
    )
    .unwrap();
    assert_eq!(artifact.performance.final_pnl, 300.0);
    assert_eq!(artifact.provenance.source_file, "results/runs/w2.csv");
    assert_eq!(artifact.provenance.run_id, 1);
    assert_eq!(artifact.indicator_parameters.get("bb_window"), Some(&ParamValue::Int(30)));
    assert_eq!(artifact.behavior_flags.get("require_reversal"), Some(&ParamValue::Bool(false)));

    let rows = read_best_configs_csv(
        &transport.get("results/aggregated/final_pnl/best_configs.csv").unwrap(),
        "best_configs.csv",
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].asset_id(), "BTCUSDT_1h");
    assert!(rows[0].parameters.approx_matches(&artifact.parameters(), 1e-12));

    assert!(transport.exists("results/aggregated/final_pnl/summary.txt").unwrap());
    let stored: AggregationReport =
        serde_json::from_slice(&transport.get("results/aggregated/aggregation_report.json").unwrap()).unwrap();
    assert_eq!(stored.rows_passed, 2);
}

#[test]
fn test_asset_without_survivors_is_omitted() {
    let (_dir, transport) = temp_transport();
    write_results(
        &*transport,
        "results/runs/btc.csv",
        &[run_row("BTCUSDT", "1h", 120.0, 30, 20), run_row("ETHUSDT", "4h", 80.0, 3, 20)],
    );

    let report = aggregator(transport.clone())
        .run(
            "results/runs",
            "out",
            &[Objective::FinalPnl, Objective::Balanced],
            &FilterThresholds::default(),
        )
        .unwrap();

    assert_eq!(report.assets_seen, vec!["BTCUSDT_1h".to_string(), "ETHUSDT_4h".to_string()]);
    for objective in &report.objectives {
        assert_eq!(objective.assets_selected, 1);
        assert_eq!(objective.assets_omitted, vec!["ETHUSDT_4h".to_string()]);
    }
    assert!(!transport.exists("out/final_pnl/ETHUSDT_4h.json").unwrap());

    let portfolio: PortfolioSummary =
        serde_json::from_slice(&transport.get("out/balanced/portfolio_summary.json").unwrap()).unwrap();
    assert_eq!(portfolio.assets_selected, 1);
    assert_eq!(portfolio.assets_considered, 2);
    assert_eq!(portfolio.total_final_pnl, 120.0);
}

#[test]
fn test_filter_keeps_exactly_passing_rows() {
    let thresholds = FilterThresholds {
        min_trades: 10,
        min_win_rate: 50.0,
        max_drawdown: 15.0,
    };
    let mut rows = vec![
        run_row("BTCUSDT", "1h", 10.0, 10, 10),
        run_row("BTCUSDT", "1h", 10.0, 9, 10),
        run_row("BTCUSDT", "1h", 0.0, 10, 10),
    ];
    let mut high_dd = run_row("BTCUSDT", "1h", 10.0, 10, 10);
    high_dd.metrics.max_drawdown = 15.5;
    rows.push(high_dd);
    let mut low_win = run_row("BTCUSDT", "1h", 10.0, 10, 10);
    low_win.metrics.win_rate = 49.0;
    rows.push(low_win);

    let expected: Vec<bool> = rows.iter().map(|r| thresholds.passes(&r.metrics)).collect();
    assert_eq!(expected, vec![true, false, false, false, false]);

    let outcome = Aggregator::filter(rows, &thresholds);
    assert_eq!(outcome.passed.len(), 1);
    assert_eq!(outcome.rejected, 4);
}

#[test]
fn test_objectives_pick_different_rows() {
    let mut steady = run_row("BTCUSDT", "1h", 150.0, 40, 20);
    steady.metrics.max_drawdown = 4.0;
    steady.metrics.win_rate = 70.0;
    let mut aggressive = run_row("BTCUSDT", "1h", 400.0, 40, 30);
    aggressive.metrics.max_drawdown = 35.0;
    aggressive.metrics.sharpe_ratio = 2.5;
    let rows = vec![steady, aggressive];
    let groups = Aggregator::group(&rows);
    let group = &groups["BTCUSDT_1h"];

    use strategy_optimizer::aggregate::select::select;
    assert_eq!(select(Objective::FinalPnl, group).unwrap().run.metrics.final_pnl, 400.0);
    assert_eq!(select(Objective::MaxDrawdown, group).unwrap().run.metrics.final_pnl, 150.0);
    assert_eq!(select(Objective::WinRate, group).unwrap().run.metrics.final_pnl, 150.0);
    assert_eq!(select(Objective::SharpeRatio, group).unwrap().run.metrics.final_pnl, 400.0);
    // PnL term 0.6 vs drawdown term 0.4
    assert_eq!(select(Objective::Balanced, group).unwrap().run.metrics.final_pnl, 400.0);
}

#[test]
fn test_unreadable_files_are_skipped() {
    let (_dir, transport) = temp_transport();
    write_results(&*transport, "results/runs/good.csv", &[run_row("BTCUSDT", "1h", 50.0, 12, 20)]);
    transport
        .put("results/runs/broken.csv", b"foo,bar\n1,2\n")
        .unwrap();
    transport
        .put(
            "results/runs/partial.csv",
            b"symbol,interval,final_pnl,total_trades,win_rate,max_drawdown\nBTCUSDT,1h,abc,12,50,5\nBTCUSDT,1h,70,12,50,5\n",
        )
        .unwrap();

    let report = aggregator(transport)
        .run("results/runs", "out", &[Objective::FinalPnl], &FilterThresholds::default())
        .unwrap();
    assert_eq!(report.files_read, 2);
    assert_eq!(report.unreadable_files.len(), 1);
    assert_eq!(report.unreadable_files[0].file, "results/runs/broken.csv");
    assert_eq!(report.malformed_rows, 1);
    assert_eq!(report.rows_passed, 2);
}

#[test]
fn test_empty_input_is_fatal() {
    let (_dir, transport) = temp_transport();
    let err = aggregator(transport)
        .run("results/runs", "out", &Objective::ALL, &FilterThresholds::default())
        .unwrap_err();
    assert!(matches!(err, OptimizerError::InputUnreadable { .. }));
    assert!(err.is_fatal());
}
