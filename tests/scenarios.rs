mod common;

use common::{
    bars, ensure_test_env, flat_candles, frictionless, long_signal, short_window_settings,
    AlwaysLong,
};
use tradesim::backtester::BacktestDriver;
use tradesim::config::{BacktestSettings, RiskConfig};
use tradesim::models::ExitReason;
use tradesim::registry::STRATEGY_PROFILES;
use tradesim::simulator::TradeSimulator;
use tradesim::strategy::create_signal_source;

#[test]
fn long_position_rides_to_target_on_third_bar() {
    ensure_test_env();
    let forward = bars(&[(101.0, 99.5), (101.5, 99.2), (106.5, 100.5)]);
    let signal = long_signal(100.0, 98.0, &[106.0]);

    let trade = TradeSimulator::new(frictionless())
        .simulate(&signal, &forward, 10_000.0, 0)
        .expect("target should be reached");
    assert_eq!(trade.exit_reason, ExitReason::Target(1));
    assert_eq!(trade.exit, 106.0);
    assert_eq!(trade.bars_held, 3);
    assert!((trade.risk_reward - 3.0).abs() < 1e-9);
    assert!((trade.profit - 600.0).abs() < 1e-6);

    let with_costs = TradeSimulator::new(RiskConfig::default())
        .simulate(&signal, &forward, 10_000.0, 0)
        .expect("target should be reached");
    assert_eq!(with_costs.exit_reason, ExitReason::Target(1));
    assert!((with_costs.risk_reward - 2.95).abs() < 1e-9);
    assert!(with_costs.profit < trade.profit);
}

#[test]
fn long_position_stops_out_on_first_bar() {
    ensure_test_env();
    let forward = bars(&[(100.5, 97.0), (107.0, 101.0)]);
    let signal = long_signal(100.0, 98.0, &[106.0]);

    let trade = TradeSimulator::new(frictionless())
        .simulate(&signal, &forward, 10_000.0, 0)
        .expect("stop should be hit");
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.exit, 98.0);
    assert_eq!(trade.bars_held, 1);
    assert!((trade.risk_reward + 1.0).abs() < 1e-9);
    assert!((trade.profit + trade.risk_amount).abs() < 1e-6);
    assert_eq!(trade.exit_reason.to_string(), "Stop Loss");
}

#[test]
fn flat_market_never_produces_a_positive_return() {
    ensure_test_env();
    let candles = flat_candles(400, 100.0);

    let bracket = AlwaysLong {
        stop_distance: 2.0,
        target_distance: 4.0,
    };
    let run = BacktestDriver::new(short_window_settings()).run(&candles, &bracket);
    assert_eq!(run.total_trades, 0);
    assert!(run.signals_generated > 0);
    assert_eq!(run.signals_generated, run.signals_discarded);
    assert_eq!(run.final_balance, run.start_balance);

    for profile in &STRATEGY_PROFILES {
        let source = create_signal_source(profile, &profile.defaults);
        let run = BacktestDriver::new(BacktestSettings::default()).run(&candles, &source);
        assert!(
            run.return_percent <= 1e-9,
            "{} returned {:.4}% on a flat series",
            profile.name,
            run.return_percent
        );
    }
}

#[test]
fn driver_skips_ahead_after_each_trade() {
    ensure_test_env();
    // Every bar spans 95..105, so a 2-point stop is hit on the first forward bar.
    let candles = bars(&vec![(105.0, 95.0); 60]);
    let source = AlwaysLong {
        stop_distance: 2.0,
        target_distance: 20.0,
    };
    let settings = short_window_settings();
    let run = BacktestDriver::new(settings.clone()).run(&candles, &source);

    assert!(run.total_trades > 1);
    for pair in run.trades.windows(2) {
        assert_eq!(
            pair[1].entry_index - pair[0].entry_index,
            settings.window.skip_ahead
        );
    }
    let last = run.trades.last().expect("at least one trade");
    assert!(last.entry_index < candles.len() - settings.window.lookahead);
    assert!(run.final_balance < run.start_balance);
    assert_eq!(run.losing_trades, run.total_trades);
}
