mod common;

use common::{ensure_test_env, short_window_settings, synthetic_candles, AlwaysLong};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tradesim::backtester::ProfileOracle;
use tradesim::config::{
    BacktestSettings, GeneticConfig, GridSpace, MonteCarloConfig, ResampleMode,
};
use tradesim::genetic::GeneticOptimizer;
use tradesim::monte_carlo::MonteCarloResampler;
use tradesim::optimizer::{
    GridSearchOptimizer, VIABLE_MAX_DRAWDOWN_PERCENT, VIABLE_MIN_TRADES, VIABLE_MIN_WIN_RATE,
};
use tradesim::optimizer_status::OptimizerStatus;
use tradesim::registry::find_profile;
use tradesim::walk_forward::WalkForwardAnalyzer;

const START_BALANCE: f64 = 10_000.0;

fn sample_profits() -> Vec<f64> {
    vec![
        250.0, -100.0, 180.0, -100.0, 320.0, -100.0, -100.0, 140.0, 90.0, -100.0, 260.0, -100.0,
        -40.0, 200.0, -100.0, 75.0, -100.0, 310.0, -100.0, 60.0,
    ]
}

fn actual_return(profits: &[f64]) -> f64 {
    profits.iter().sum::<f64>() / START_BALANCE * 100.0
}

#[test]
fn walk_forward_chains_balance_through_test_periods() {
    ensure_test_env();
    let candles = synthetic_candles(600, 11);
    let source = AlwaysLong {
        stop_distance: 1.5,
        target_distance: 2.0,
    };
    let analysis = WalkForwardAnalyzer::new(short_window_settings(), 200, 100, 100)
        .analyze(&candles, &source)
        .expect("enough candles for four periods");

    assert_eq!(analysis.periods.len(), 4);
    assert_eq!(analysis.starting_balance, START_BALANCE);
    assert_eq!(analysis.periods[0].starting_balance, START_BALANCE);
    for pair in analysis.periods.windows(2) {
        assert_eq!(pair[1].starting_balance, pair[0].ending_balance);
        assert_eq!(pair[1].train_start, pair[0].train_start + 100);
    }
    for period in &analysis.periods {
        assert_eq!(period.test_start, period.train_end);
        assert_eq!(period.test_end - period.test_start, 100);
    }
    let last = analysis.periods.last().expect("four periods");
    assert_eq!(analysis.final_balance, last.ending_balance);

    let trades: usize = analysis.periods.iter().map(|p| p.total_trades).sum();
    assert_eq!(analysis.combined.total_trades, trades);
    assert!((analysis.combined.final_balance - analysis.final_balance).abs() < 1e-6);
    for trade in &analysis.combined.trades {
        assert!(analysis
            .periods
            .iter()
            .any(|p| trade.entry_index >= p.test_start && trade.entry_index < p.test_end));
    }
}

#[test]
fn walk_forward_rejects_short_series() {
    ensure_test_env();
    let candles = synthetic_candles(250, 3);
    let source = AlwaysLong {
        stop_distance: 1.5,
        target_distance: 2.0,
    };
    let result = WalkForwardAnalyzer::new(short_window_settings(), 200, 100, 100)
        .analyze(&candles, &source);
    assert!(result.is_err());
}

#[test]
fn permutation_mean_matches_the_realized_return_at_any_iteration_count() {
    ensure_test_env();
    let profits = sample_profits();
    let expected = actual_return(&profits);

    for iterations in [10, 100, 10_000] {
        let config = MonteCarloConfig {
            iterations,
            mode: ResampleMode::Permutation,
            ..MonteCarloConfig::default()
        };
        let analysis = MonteCarloResampler::new(config, 42)
            .resample_profits(&profits, START_BALANCE)
            .expect("non-empty profits");
        assert_eq!(analysis.iterations, iterations);
        assert!((analysis.mean_return - expected).abs() < 1e-9);
        assert!((analysis.worst_case - analysis.best_case).abs() < 1e-9);
        assert!(analysis.std_deviation < 1e-9);
        assert_eq!(analysis.probability_profit, 100.0);
    }
}

#[test]
fn bootstrap_mean_converges_on_the_realized_return() {
    ensure_test_env();
    let profits = sample_profits();
    let expected = actual_return(&profits);
    let config = MonteCarloConfig {
        iterations: 10_000,
        mode: ResampleMode::Bootstrap,
        ..MonteCarloConfig::default()
    };

    let analysis = MonteCarloResampler::new(config, 42)
        .resample_profits(&profits, START_BALANCE)
        .expect("non-empty profits");
    assert!(
        (analysis.mean_return - expected).abs() < 0.5,
        "bootstrap mean {:.3}% vs realized {:.3}%",
        analysis.mean_return,
        expected
    );
    assert!(analysis.std_deviation > 0.0);
    assert!(analysis.worst_case <= analysis.percentile_5);
    assert!(analysis.percentile_5 <= analysis.percentile_25);
    assert!(analysis.percentile_25 <= analysis.median_return);
    assert!(analysis.median_return <= analysis.percentile_75);
    assert!(analysis.percentile_75 <= analysis.percentile_95);
    assert!(analysis.percentile_95 <= analysis.best_case);

    let again = MonteCarloResampler::new(config, 42)
        .resample_profits(&profits, START_BALANCE)
        .expect("non-empty profits");
    assert_eq!(analysis, again);
}

#[test]
fn grid_search_only_reports_viable_candidates_that_meet_every_threshold() {
    ensure_test_env();
    let candles = Arc::new(synthetic_candles(1_500, 5));
    let grid = GridSpace {
        stop_atr: vec![1.0, 1.5],
        tp1_atr: vec![2.0, 3.0],
        tp2_atr: vec![3.0, 4.0],
        tp3_atr: vec![5.0],
        risk_percent: vec![1.0],
        min_confluence: Vec::new(),
    };
    let profiles = [
        find_profile("session_trader").expect("registered"),
        find_profile("breakout_master").expect("registered"),
    ];

    let report = GridSearchOptimizer::new(
        candles,
        BacktestSettings::default(),
        grid.clone(),
        OptimizerStatus::new(),
    )
    .with_progress(false)
    .optimize(&profiles)
    .expect("grid search completes");

    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(
            result.total_tests + result.skipped_combinations,
            grid.raw_combination_count()
        );
        assert!(result.skipped_combinations >= 2);
        assert!(!result.cancelled);

        if let Some(viable) = &result.best_viable {
            assert!(viable.viable);
            assert!(viable.return_percent > 0.0);
            assert!(viable.profit_factor > 1.0);
            assert!(viable.win_rate >= VIABLE_MIN_WIN_RATE);
            assert!(viable.max_drawdown_percent <= VIABLE_MAX_DRAWDOWN_PERCENT);
            assert!(viable.total_trades >= VIABLE_MIN_TRADES);
            let overall = result.best_overall.as_ref().expect("overall leader exists");
            assert!(overall.score >= viable.score);
        }
        let best = result.best().expect("every combination was evaluated");
        let run = result.best_run.as_ref().expect("leader keeps its run");
        assert_eq!(run.total_trades, best.total_trades);
        assert!(best.params.has_increasing_targets());
    }
    assert!(report.best_strategy.is_some());
}

#[test]
fn genetic_search_never_loses_its_best_gene() {
    ensure_test_env();
    let candles = synthetic_candles(800, 21);
    let profile = find_profile("session_trader").expect("registered");
    let settings = BacktestSettings::default();
    let oracle = ProfileOracle::new(profile, &candles, &settings);
    let config = GeneticConfig {
        population_size: 8,
        generations: 5,
        min_trades: 1,
        ..GeneticConfig::default()
    };

    let optimizer = GeneticOptimizer::new(config, &oracle, OptimizerStatus::new());
    let report = optimizer.evolve(profile.name, profile.defaults, &mut StdRng::seed_from_u64(7));

    assert_eq!(report.generations.len(), 5);
    assert!(!report.cancelled);
    for pair in report.generations.windows(2) {
        assert!(pair[1].best_fitness >= pair[0].best_fitness);
    }
    let last = report.generations.last().expect("five generations");
    assert_eq!(report.best.fitness, last.best_fitness);
    assert!(report.best.fitness >= 0.0 && report.best.fitness <= 95.0);
    assert!(report.total_evaluations <= 8 * 5 + 1);
    for pair in report.top_genes.windows(2) {
        assert!(pair[0].fitness >= pair[1].fitness);
    }
    assert!(report.top_genes.len() <= 5);
}
