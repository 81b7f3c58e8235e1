use crate::config::RiskConfig;
use crate::models::{Candle, Direction, ExitReason, Signal, SimulatedTrade, TakeProfitTier};
use thiserror::Error;

/// Favorable excursion, in multiples of the initial risk, that arms the trailing stop.
pub const TRAILING_ACTIVATION_R: f64 = 1.0;
/// Share of the peak favorable excursion locked in by the trailing stop.
pub const TRAILING_LOCK_FRACTION: f64 = 0.6;

/// Why a signal did not turn into a trade.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum NoTradeReason {
    #[error("signal or candle prices are not finite")]
    NonFinitePrice,
    #[error("entry and stop are equal")]
    ZeroRiskDistance,
    #[error("stop sits on the profitable side of entry")]
    StopOnWrongSide,
    #[error("take-profit tiers are missing or not increasing")]
    UnorderedTargets,
    #[error("no forward candles to simulate against")]
    EmptyWindow,
    #[error("no capital available to risk")]
    NoRiskCapital,
    #[error("no exit within the forward window")]
    NoExit,
}

pub fn apply_entry_slippage(price: f64, direction: Direction, slippage_rate: f64) -> f64 {
    match direction {
        Direction::Long => price * (1.0 + slippage_rate),
        Direction::Short => price * (1.0 - slippage_rate),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradeSimulator {
    risk: RiskConfig,
}

impl TradeSimulator {
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }

    pub fn risk(&self) -> &RiskConfig {
        &self.risk
    }

    /// Replays one signal against the forward candles. `None` means the signal
    /// produced no trade.
    pub fn simulate(
        &self,
        signal: &Signal,
        forward: &[Candle],
        balance: f64,
        entry_index: usize,
    ) -> Option<SimulatedTrade> {
        self.try_simulate(signal, forward, balance, entry_index).ok()
    }

    pub fn try_simulate(
        &self,
        signal: &Signal,
        forward: &[Candle],
        balance: f64,
        entry_index: usize,
    ) -> Result<SimulatedTrade, NoTradeReason> {
        if !signal.prices_are_finite() || !balance.is_finite() {
            return Err(NoTradeReason::NonFinitePrice);
        }
        let risk_distance = signal.risk_distance();
        if risk_distance <= 0.0 {
            return Err(NoTradeReason::ZeroRiskDistance);
        }
        if !signal.stop_on_losing_side() {
            return Err(NoTradeReason::StopOnWrongSide);
        }
        if !signal.has_ordered_targets() {
            return Err(NoTradeReason::UnorderedTargets);
        }
        if forward.is_empty() {
            return Err(NoTradeReason::EmptyWindow);
        }

        let risk_amount = self.risk.risk_amount(balance);
        if !(risk_amount > 0.0) {
            return Err(NoTradeReason::NoRiskCapital);
        }
        let position_size = risk_amount / risk_distance;

        let direction = signal.direction;
        let sign = direction.sign();
        let entry = apply_entry_slippage(signal.entry, direction, self.risk.slippage_rate);

        // Most favorable price over the bars already closed.
        let mut extreme = entry;

        for (offset, candle) in forward.iter().enumerate() {
            if !candle.is_finite() {
                return Err(NoTradeReason::NonFinitePrice);
            }

            let exit = stop_exit(signal, candle)
                .or_else(|| trailing_exit(direction, entry, extreme, risk_distance, candle))
                .or_else(|| target_exit(direction, &signal.targets, candle));

            if let Some((exit_price, exit_reason)) = exit {
                let raw_profit = (exit_price - entry) * position_size * sign;
                let fees = raw_profit.abs() * self.risk.fee_rate * 2.0;
                let profit = raw_profit - fees;
                return Ok(SimulatedTrade {
                    direction,
                    signal_entry: signal.entry,
                    entry,
                    exit: exit_price,
                    stop_loss: signal.stop_loss,
                    exit_reason,
                    bars_held: offset + 1,
                    position_size,
                    risk_amount,
                    profit,
                    profit_percent: profit / risk_amount * 100.0,
                    risk_reward: (exit_price - entry) * sign / risk_distance,
                    balance_after: balance + profit,
                    entry_index,
                    entry_time: forward.first().map(|c| c.timestamp),
                    exit_time: Some(candle.timestamp),
                });
            }

            extreme = match direction {
                Direction::Long => extreme.max(candle.high),
                Direction::Short => extreme.min(candle.low),
            };
        }

        Err(NoTradeReason::NoExit)
    }
}

fn stop_exit(signal: &Signal, candle: &Candle) -> Option<(f64, ExitReason)> {
    let breached = match signal.direction {
        Direction::Long => candle.low <= signal.stop_loss,
        Direction::Short => candle.high >= signal.stop_loss,
    };
    breached.then_some((signal.stop_loss, ExitReason::StopLoss))
}

pub fn trailing_stop_level(
    direction: Direction,
    entry: f64,
    extreme: f64,
    risk_distance: f64,
) -> Option<f64> {
    let excursion = (extreme - entry) * direction.sign();
    if excursion < risk_distance * TRAILING_ACTIVATION_R {
        return None;
    }
    Some(entry + direction.sign() * excursion * TRAILING_LOCK_FRACTION)
}

fn trailing_exit(
    direction: Direction,
    entry: f64,
    extreme: f64,
    risk_distance: f64,
    candle: &Candle,
) -> Option<(f64, ExitReason)> {
    let level = trailing_stop_level(direction, entry, extreme, risk_distance)?;
    let touched = match direction {
        Direction::Long => candle.low <= level,
        Direction::Short => candle.high >= level,
    };
    touched.then_some((level, ExitReason::TrailingStop))
}

/// Tiers are ordered nearest first, so the first touched tier closes the
/// whole position whatever its allocation.
fn target_exit(
    direction: Direction,
    tiers: &[TakeProfitTier],
    candle: &Candle,
) -> Option<(f64, ExitReason)> {
    tiers
        .iter()
        .enumerate()
        .find(|(_, tier)| match direction {
            Direction::Long => candle.high >= tier.price,
            Direction::Short => candle.low <= tier.price,
        })
        .map(|(i, tier)| (tier.price, ExitReason::Target(i as u8 + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(ranges: &[(f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        ranges
            .iter()
            .enumerate()
            .map(|(i, &(high, low))| Candle {
                timestamp: start + Duration::minutes(15 * i as i64),
                open: (high + low) / 2.0,
                high,
                low,
                close: (high + low) / 2.0,
                volume: 1_000.0,
            })
            .collect()
    }

    fn signal(direction: Direction, entry: f64, stop: f64, targets: &[f64]) -> Signal {
        Signal {
            direction,
            entry,
            stop_loss: stop,
            targets: targets
                .iter()
                .enumerate()
                .map(|(i, &price)| TakeProfitTier {
                    price,
                    allocation_percent: if i == 0 { 100.0 } else { 0.0 },
                })
                .collect(),
            confidence: 75.0,
            timeframe: "15m".to_string(),
        }
    }

    fn frictionless() -> TradeSimulator {
        TradeSimulator::new(RiskConfig {
            risk_fraction: 0.01,
            max_position_cap: 1_000_000.0,
            slippage_rate: 0.0,
            fee_rate: 0.0,
        })
    }

    #[test]
    fn long_trade_reaches_target() {
        let simulator = TradeSimulator::new(RiskConfig::default());
        let forward = bars(&[(101.0, 99.5), (101.5, 99.8), (106.0, 101.0)]);
        let trade = simulator
            .simulate(&signal(Direction::Long, 100.0, 98.0, &[106.0]), &forward, 10_000.0, 50)
            .unwrap();

        assert_eq!(trade.exit_reason, ExitReason::Target(1));
        assert!((trade.exit - 106.0).abs() < 1e-9);
        assert_eq!(trade.bars_held, 3);
        assert!((trade.entry - 100.1).abs() < 1e-9);
        assert!((trade.risk_reward - 2.95).abs() < 1e-9);
        assert!(trade.profit > 0.0);
        assert!((trade.balance_after - (10_000.0 + trade.profit)).abs() < 1e-9);
    }

    #[test]
    fn long_trade_stops_out_before_target() {
        let simulator = TradeSimulator::new(RiskConfig::default());
        let forward = bars(&[(100.5, 97.0), (106.0, 100.0)]);
        let trade = simulator
            .simulate(&signal(Direction::Long, 100.0, 98.0, &[106.0]), &forward, 10_000.0, 0)
            .unwrap();

        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert!((trade.exit - 98.0).abs() < 1e-9);
        assert_eq!(trade.bars_held, 1);
        assert!((trade.risk_reward + 1.05).abs() < 1e-9);
        assert!(trade.profit < -trade.risk_amount);
    }

    #[test]
    fn stop_takes_priority_when_bar_spans_stop_and_target() {
        let forward = bars(&[(110.0, 97.0)]);
        let trade = frictionless()
            .simulate(&signal(Direction::Long, 100.0, 98.0, &[104.0]), &forward, 10_000.0, 0)
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn trailing_stop_locks_sixty_percent_of_excursion() {
        let forward = bars(&[(103.0, 99.5), (104.0, 101.5)]);
        let trade = frictionless()
            .simulate(&signal(Direction::Long, 100.0, 98.0, &[110.0]), &forward, 10_000.0, 0)
            .unwrap();

        assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
        assert!((trade.exit - 101.8).abs() < 1e-9);
        assert_eq!(trade.bars_held, 2);
    }

    #[test]
    fn trailing_level_only_ratchets_favorably() {
        let first = trailing_stop_level(Direction::Long, 100.0, 103.0, 2.0).unwrap();
        let second = trailing_stop_level(Direction::Long, 100.0, 105.0, 2.0).unwrap();
        assert!(second > first);
        assert!(trailing_stop_level(Direction::Long, 100.0, 101.5, 2.0).is_none());

        let short = trailing_stop_level(Direction::Short, 50.0, 47.0, 1.0).unwrap();
        assert!((short - 48.2).abs() < 1e-9);
    }

    #[test]
    fn short_trade_mirrors_long_logic() {
        let simulator = TradeSimulator::new(RiskConfig::default());
        let forward = bars(&[(50.4, 49.6), (49.9, 46.0)]);
        let trade = simulator
            .simulate(&signal(Direction::Short, 50.0, 51.0, &[47.0]), &forward, 10_000.0, 0)
            .unwrap();

        assert_eq!(trade.exit_reason, ExitReason::Target(1));
        assert!((trade.entry - 49.95).abs() < 1e-9);
        assert!((trade.exit - 47.0).abs() < 1e-9);
        assert!(trade.profit > 0.0);
    }

    #[test]
    fn nearest_tier_exits_even_without_allocation() {
        let mut setup = signal(Direction::Long, 100.0, 98.0, &[104.0, 106.0]);
        setup.targets[0].allocation_percent = 0.0;
        setup.targets[1].allocation_percent = 100.0;
        let forward = bars(&[(105.0, 100.5)]);
        let trade = frictionless().simulate(&setup, &forward, 10_000.0, 0).unwrap();

        assert_eq!(trade.exit_reason, ExitReason::Target(1));
        assert!((trade.exit - 104.0).abs() < 1e-9);
        assert_eq!(trade.bars_held, 1);
    }

    #[test]
    fn bar_spanning_several_tiers_exits_at_nearest() {
        let mut setup = signal(Direction::Short, 50.0, 51.0, &[48.0, 47.0, 45.0]);
        setup.targets[0].allocation_percent = 0.0;
        setup.targets[2].allocation_percent = 100.0;
        let forward = bars(&[(50.2, 44.0)]);
        let trade = frictionless().simulate(&setup, &forward, 10_000.0, 0).unwrap();

        assert_eq!(trade.exit_reason, ExitReason::Target(1));
        assert!((trade.exit - 48.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let simulator = frictionless();
        let forward = bars(&[(101.0, 99.0)]);

        assert_eq!(
            simulator.try_simulate(&signal(Direction::Long, 100.0, 100.0, &[104.0]), &forward, 1_000.0, 0),
            Err(NoTradeReason::ZeroRiskDistance)
        );
        assert_eq!(
            simulator.try_simulate(&signal(Direction::Long, 100.0, 98.0, &[104.0]), &[], 1_000.0, 0),
            Err(NoTradeReason::EmptyWindow)
        );
        assert_eq!(
            simulator.try_simulate(&signal(Direction::Long, f64::NAN, 98.0, &[104.0]), &forward, 1_000.0, 0),
            Err(NoTradeReason::NonFinitePrice)
        );
        assert_eq!(
            simulator.try_simulate(&signal(Direction::Long, 100.0, 102.0, &[104.0]), &forward, 1_000.0, 0),
            Err(NoTradeReason::StopOnWrongSide)
        );
        assert_eq!(
            simulator.try_simulate(&signal(Direction::Long, 100.0, 98.0, &[104.0, 103.0]), &forward, 1_000.0, 0),
            Err(NoTradeReason::UnorderedTargets)
        );
        assert_eq!(
            simulator.try_simulate(&signal(Direction::Long, 100.0, 98.0, &[104.0]), &forward, 0.0, 0),
            Err(NoTradeReason::NoRiskCapital)
        );
    }

    #[test]
    fn unresolved_signal_is_discarded() {
        let forward = bars(&[(101.0, 99.0), (101.2, 99.1)]);
        assert_eq!(
            frictionless().try_simulate(&signal(Direction::Long, 100.0, 98.0, &[104.0]), &forward, 1_000.0, 0),
            Err(NoTradeReason::NoExit)
        );
    }

    #[test]
    fn position_size_matches_capped_risk() {
        let simulator = TradeSimulator::new(RiskConfig {
            risk_fraction: 0.05,
            max_position_cap: 200.0,
            slippage_rate: 0.0,
            fee_rate: 0.0,
        });
        let forward = bars(&[(100.5, 97.0)]);
        let trade = simulator
            .simulate(&signal(Direction::Long, 100.0, 98.0, &[104.0]), &forward, 10_000.0, 0)
            .unwrap();
        assert!((trade.risk_amount - 200.0).abs() < 1e-9);
        assert!((trade.position_size * 2.0 - 200.0).abs() < 1e-9);
        assert!((trade.profit + 200.0).abs() < 1e-9);
    }

    #[test]
    fn fees_charged_on_both_sides() {
        let simulator = TradeSimulator::new(RiskConfig {
            risk_fraction: 0.01,
            max_position_cap: 1_000_000.0,
            slippage_rate: 0.0,
            fee_rate: 0.001,
        });
        let forward = bars(&[(104.5, 99.5)]);
        let trade = simulator
            .simulate(&signal(Direction::Long, 100.0, 98.0, &[104.0]), &forward, 10_000.0, 0)
            .unwrap();
        // 100 risked over 2.0 distance = 50 units, 4.0 gain = 200 gross
        assert!((trade.profit - (200.0 - 200.0 * 0.002)).abs() < 1e-9);
        assert!((trade.profit_percent - trade.profit).abs() < 1e-9);
    }
}
