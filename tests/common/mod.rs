#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::Once;
use tradesim::config::{BacktestSettings, RiskConfig, WindowConfig, WindowPolicy};
use tradesim::models::{Candle, Direction, Signal, TakeProfitTier};
use tradesim::strategy::SignalSource;

pub fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn candle_at(index: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Candle {
        timestamp: start + Duration::minutes(15 * index as i64),
        open,
        high,
        low,
        close,
        volume: 1_000.0,
    }
}

/// Bars given as (high, low) pairs; open and close sit at the midpoint.
pub fn bars(ranges: &[(f64, f64)]) -> Vec<Candle> {
    ranges
        .iter()
        .enumerate()
        .map(|(i, &(high, low))| {
            let mid = (high + low) / 2.0;
            candle_at(i, mid, high, low, mid)
        })
        .collect()
}

pub fn flat_candles(len: usize, price: f64) -> Vec<Candle> {
    (0..len)
        .map(|i| candle_at(i, price, price, price, price))
        .collect()
}

/// Slow uptrend with a daily cycle and seeded noise. Enough structure for the
/// registered strategies to fire.
pub fn synthetic_candles(len: usize, seed: u64) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut previous_close: f64 = 100.0;
    (0..len)
        .map(|i| {
            let t = i as f64;
            let base = 100.0 + t * 0.02 + 6.0 * (2.0 * PI * t / 96.0).sin();
            let close = base + rng.gen_range(-0.6..0.6);
            let open = previous_close;
            let high = open.max(close) + rng.gen_range(0.05..0.8);
            let low = open.min(close) - rng.gen_range(0.05..0.8);
            previous_close = close;
            candle_at(i, open, high, low, close)
        })
        .collect()
}

pub fn frictionless() -> RiskConfig {
    RiskConfig {
        slippage_rate: 0.0,
        fee_rate: 0.0,
        ..RiskConfig::default()
    }
}

pub fn long_signal(entry: f64, stop: f64, targets: &[f64]) -> Signal {
    Signal {
        direction: Direction::Long,
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
        confidence: 70.0,
        timeframe: "15m".to_string(),
    }
}

pub fn short_window_settings() -> BacktestSettings {
    BacktestSettings {
        window: WindowConfig {
            policy: WindowPolicy::Expanding,
            min_window: 5,
            max_window: 20,
            skip_ahead: 3,
            lookahead: 10,
        },
        ..BacktestSettings::default()
    }
}

/// Goes long on every bar with a fixed bracket around the last close.
pub struct AlwaysLong {
    pub stop_distance: f64,
    pub target_distance: f64,
}

impl SignalSource for AlwaysLong {
    fn name(&self) -> &str {
        "always_long"
    }

    fn generate_signal(&self, window: &[Candle], _timeframe: &str) -> Option<Signal> {
        let close = window.last()?.close;
        Some(long_signal(
            close,
            close - self.stop_distance,
            &[close + self.target_distance],
        ))
    }

    fn min_history(&self) -> usize {
        1
    }
}
