use crate::models::Candle;

/// Neutral reading when there is not enough history for an RSI.
const NEUTRAL_RSI: f64 = 50.0;

pub fn close_prices(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Exponential moving average seeded with the first value.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period.max(1) as f64 + 1.0);
    values
        .iter()
        .scan(None, |state: &mut Option<f64>, &value| {
            let next = match *state {
                Some(previous) => previous + alpha * (value - previous),
                None => value,
            };
            *state = Some(next);
            Some(next)
        })
        .collect()
}

/// Mean of the last `period` values.
pub fn tail_mean(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let tail = &values[values.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}

/// Latest RSI with Wilder smoothing over the whole series.
pub fn wilder_rsi(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() <= period {
        return NEUTRAL_RSI;
    }
    let changes: Vec<f64> = values.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let (seed, rest) = changes.split_at(period);
    let n = period as f64;
    let mut gain = seed.iter().filter(|c| **c > 0.0).sum::<f64>() / n;
    let mut loss = -seed.iter().filter(|c| **c < 0.0).sum::<f64>() / n;
    for change in rest {
        gain = (gain * (n - 1.0) + change.max(0.0)) / n;
        loss = (loss * (n - 1.0) + (-change).max(0.0)) / n;
    }

    match (gain > 0.0, loss > 0.0) {
        (false, false) => NEUTRAL_RSI,
        (true, false) => 100.0,
        (false, true) => 0.0,
        (true, true) => 100.0 - 100.0 / (1.0 + gain / loss),
    }
}

fn true_range(previous_close: f64, candle: &Candle) -> f64 {
    (candle.high - candle.low)
        .max((candle.high - previous_close).abs())
        .max((candle.low - previous_close).abs())
}

/// Simple average of the last `period` true ranges. Needs `period + 1` bars.
pub fn average_true_range(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let tail = &candles[candles.len() - (period + 1)..];
    let atr = tail
        .windows(2)
        .map(|pair| true_range(pair[0].close, &pair[1]))
        .sum::<f64>()
        / period as f64;
    atr.is_finite().then_some(atr)
}

pub fn mean_volume(candles: &[Candle], lookback: usize) -> f64 {
    let start = candles.len().saturating_sub(lookback);
    let window = &candles[start..];
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64
}
