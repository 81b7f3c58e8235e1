mod common;

use common::{candle_at, short_window_settings, AlwaysLong};
use proptest::prelude::*;
use tradesim::backtester::BacktestDriver;
use tradesim::config::RiskConfig;
use tradesim::models::{Candle, Direction, ExitReason, Signal, TakeProfitTier};
use tradesim::simulator::{trailing_stop_level, TradeSimulator};

/// Random walk built from (close step, upper wick, lower wick) triples.
fn walk(start: f64, moves: &[(f64, f64, f64)]) -> Vec<Candle> {
    let mut previous = start;
    moves
        .iter()
        .enumerate()
        .map(|(i, &(step, up, down))| {
            let open = previous;
            let close = (open + step).max(1.0);
            previous = close;
            candle_at(i, open, open.max(close) + up, (open.min(close) - down).max(0.5), close)
        })
        .collect()
}

fn bracket(direction: Direction, entry: f64, distance: f64, multiples: [f64; 3]) -> Signal {
    let sign = direction.sign();
    let mut offset = 0.0;
    let targets = multiples
        .iter()
        .zip([50.0, 30.0, 20.0])
        .map(|(&m, allocation_percent)| {
            offset += m * distance;
            TakeProfitTier {
                price: entry + sign * offset,
                allocation_percent,
            }
        })
        .collect();
    Signal {
        direction,
        entry,
        stop_loss: entry - sign * distance,
        targets,
        confidence: 60.0,
        timeframe: "15m".to_string(),
    }
}

fn moves() -> impl Strategy<Value = Vec<(f64, f64, f64)>> {
    prop::collection::vec((-3.0..3.0f64, 0.0..2.0f64, 0.0..2.0f64), 1..40)
}

proptest! {
    #[test]
    fn exit_price_is_stop_trailing_level_or_tier(
        long in any::<bool>(),
        entry in 50.0..150.0f64,
        distance in 0.5..5.0f64,
        multiples in (0.5..3.0f64, 0.5..3.0f64, 0.5..3.0f64),
        balance in 1_000.0..50_000.0f64,
        moves in moves(),
    ) {
        let direction = if long { Direction::Long } else { Direction::Short };
        let signal = bracket(direction, entry, distance, [multiples.0, multiples.1, multiples.2]);
        let forward = walk(entry, &moves);
        let risk = RiskConfig::default();
        let simulator = TradeSimulator::new(risk);

        if let Some(trade) = simulator.simulate(&signal, &forward, balance, 7) {
            prop_assert!(trade.bars_held >= 1 && trade.bars_held <= forward.len());
            match trade.exit_reason {
                ExitReason::StopLoss => prop_assert_eq!(trade.exit, signal.stop_loss),
                ExitReason::Target(tier) => {
                    prop_assert_eq!(trade.exit, signal.targets[tier as usize - 1].price);
                    let exit_bar = &forward[trade.bars_held - 1];
                    for nearer in &signal.targets[..tier as usize - 1] {
                        let touched = match direction {
                            Direction::Long => exit_bar.high >= nearer.price,
                            Direction::Short => exit_bar.low <= nearer.price,
                        };
                        prop_assert!(!touched);
                    }
                }
                ExitReason::TrailingStop => {
                    let extreme = forward[..trade.bars_held - 1]
                        .iter()
                        .fold(trade.entry, |acc, c| match direction {
                            Direction::Long => acc.max(c.high),
                            Direction::Short => acc.min(c.low),
                        });
                    let level = trailing_stop_level(direction, trade.entry, extreme, distance);
                    prop_assert!(level.is_some());
                    prop_assert!((trade.exit - level.unwrap_or(f64::NAN)).abs() < 1e-9);
                }
            }

            let expected_risk = (balance * risk.risk_fraction).min(risk.max_position_cap);
            prop_assert!((trade.risk_amount - expected_risk).abs() < 1e-9);
            prop_assert!(
                (trade.position_size * (signal.entry - signal.stop_loss).abs() - trade.risk_amount)
                    .abs()
                    < 1e-6
            );
            prop_assert!((trade.balance_after - (balance + trade.profit)).abs() < 1e-9);
            prop_assert_eq!(trade.entry_index, 7);
        }
    }

    #[test]
    fn driver_balance_is_the_sum_of_trade_profits(
        moves in prop::collection::vec((-2.0..2.0f64, 0.0..1.5f64, 0.0..1.5f64), 30..120),
        stop_distance in 0.5..3.0f64,
        target_distance in 0.5..6.0f64,
    ) {
        let candles = walk(100.0, &moves);
        let settings = short_window_settings();
        let source = AlwaysLong { stop_distance, target_distance };
        let run = BacktestDriver::new(settings.clone()).run(&candles, &source);

        let total: f64 = run.trades.iter().map(|t| t.profit).sum();
        prop_assert!((run.final_balance - (run.start_balance + total)).abs() < 1e-6);
        prop_assert_eq!(run.total_trades, run.trades.len());
        prop_assert_eq!(run.winning_trades + run.losing_trades, run.total_trades);
        prop_assert!(run.max_drawdown >= 0.0 && run.max_drawdown <= 1.0);
        for pair in run.trades.windows(2) {
            prop_assert!(pair[1].entry_index >= pair[0].entry_index + settings.window.skip_ahead);
        }
        for trade in &run.trades {
            prop_assert!(trade.entry_index >= settings.window.min_window);
            prop_assert!(trade.entry_index + settings.window.lookahead < candles.len() + 1);
        }
    }
}
