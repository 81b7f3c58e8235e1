use crate::indicators::{average_true_range, close_prices, ema_series, mean_volume, wilder_rsi};
use crate::models::*;
use crate::strategy_utils::{
    atr_bracket, body_ratio, close_location, confluence_confidence, required_confirmations,
};

const CHANNEL_LOOKBACK: usize = 20;

pub struct BreakoutSource {
    name: String,
    params: ParameterSet,
    exit_tier: u8,
}

impl BreakoutSource {
    pub fn new(name: String, params: ParameterSet, exit_tier: u8) -> Self {
        Self {
            name,
            params,
            exit_tier,
        }
    }
}

/// Highest high and lowest low of the bars before the current one.
fn prior_channel(window: &[Candle]) -> Option<(f64, f64)> {
    let n = window.len();
    if n < CHANNEL_LOOKBACK + 1 {
        return None;
    }
    let prior = &window[n - 1 - CHANNEL_LOOKBACK..n - 1];
    let high = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    Some((high, low))
}

impl super::SignalSource for BreakoutSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, window: &[Candle], timeframe: &str) -> Option<Signal> {
        if window.len() < self.min_history() {
            return None;
        }

        let n = window.len();
        let current = &window[n - 1];
        let (channel_high, channel_low) = prior_channel(window)?;

        let direction = if current.close > channel_high {
            Direction::Long
        } else if current.close < channel_low {
            Direction::Short
        } else {
            return None;
        };

        let prices = close_prices(window);
        let atr = average_true_range(window, 14)?;
        let prior_atr = average_true_range(&window[..n - 5], 14).unwrap_or(atr);
        let ema = ema_series(&prices, 20);
        let ema_now = *ema.last()?;
        let ema_before = ema[ema.len().saturating_sub(6)];
        let rsi = wilder_rsi(&prices, 14);
        let avg_volume = mean_volume(&window[..n - 1], CHANNEL_LOOKBACK);
        let location = close_location(current);

        let checks = [
            avg_volume > 0.0 && current.volume > avg_volume * 1.5,
            body_ratio(current) > 0.6,
            match direction {
                Direction::Long => location > 0.7,
                Direction::Short => location < 0.3,
            },
            atr > prior_atr,
            (ema_now - ema_before) * direction.sign() > 0.0,
            match direction {
                Direction::Long => rsi > 55.0,
                Direction::Short => rsi < 45.0,
            },
        ];
        let confirmations = checks.iter().filter(|passed| **passed).count() as u32;
        if confirmations < required_confirmations(timeframe, self.params.min_confluence) {
            return None;
        }

        atr_bracket(
            direction,
            current.close,
            atr,
            &self.params,
            self.exit_tier,
            confluence_confidence(confirmations),
            timeframe,
        )
    }

    fn min_history(&self) -> usize {
        40
    }
}
