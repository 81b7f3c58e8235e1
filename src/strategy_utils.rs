use crate::models::{Candle, Direction, ParameterSet, Signal, TakeProfitTier};

pub const MAX_CONFIDENCE: f64 = 95.0;

/// Build an ATR-scaled bracket around `entry`. Only `exit_tier` (one-based)
/// carries an allocation; the simulator still closes at the nearest tier hit.
pub fn atr_bracket(
    direction: Direction,
    entry: f64,
    atr: f64,
    params: &ParameterSet,
    exit_tier: u8,
    confidence: f64,
    timeframe: &str,
) -> Option<Signal> {
    if !(atr > 0.0) || !entry.is_finite() || !params.is_valid() {
        return None;
    }
    let sign = direction.sign();
    let stop_loss = entry - sign * atr * params.stop_atr;
    let exit_tier = exit_tier.clamp(1, 3);
    let targets = params
        .target_multiples()
        .iter()
        .enumerate()
        .map(|(i, multiple)| TakeProfitTier {
            price: entry + sign * atr * multiple,
            allocation_percent: if i as u8 + 1 == exit_tier { 100.0 } else { 0.0 },
        })
        .collect();

    Some(Signal {
        direction,
        entry,
        stop_loss,
        targets,
        confidence: confidence.min(MAX_CONFIDENCE),
        timeframe: timeframe.to_string(),
    })
}

/// Noisy intraday timeframes need one extra confirmation.
pub fn required_confirmations(timeframe: &str, min_confluence: u32) -> u32 {
    match timeframe {
        "1m" | "3m" | "5m" => min_confluence + 1,
        _ => min_confluence,
    }
}

pub fn confluence_confidence(confirmations: u32) -> f64 {
    (55.0 + confirmations as f64 * 5.0).min(MAX_CONFIDENCE)
}

pub fn body_ratio(candle: &Candle) -> f64 {
    let range = candle.high - candle.low;
    if range <= 0.0 {
        return 0.0;
    }
    (candle.close - candle.open).abs() / range
}

pub fn is_bullish(candle: &Candle) -> bool {
    candle.close > candle.open
}

pub fn is_bearish(candle: &Candle) -> bool {
    candle.close < candle.open
}

/// Position of the close inside the bar's range, 0 at the low and 1 at the high.
pub fn close_location(candle: &Candle) -> f64 {
    let range = candle.high - candle.low;
    if range <= 0.0 {
        return 0.5;
    }
    (candle.close - candle.low) / range
}
