use crate::indicators::{average_true_range, close_prices, ema_series, mean_volume, tail_mean, wilder_rsi};
use crate::models::*;
use crate::strategy_utils::{
    atr_bracket, body_ratio, confluence_confidence, is_bearish, is_bullish,
    required_confirmations,
};

const BAND_PERIOD: usize = 20;
const BAND_WIDTH: f64 = 1.5;

/// Fades RSI extremes when price shows rejection at a Bollinger band.
pub struct MeanReversionSource {
    name: String,
    params: ParameterSet,
    exit_tier: u8,
}

impl MeanReversionSource {
    pub fn new(name: String, params: ParameterSet, exit_tier: u8) -> Self {
        Self {
            name,
            params,
            exit_tier,
        }
    }
}

fn bollinger(prices: &[f64]) -> Option<(f64, f64)> {
    if prices.len() < BAND_PERIOD {
        return None;
    }
    let middle = tail_mean(prices, BAND_PERIOD)?;
    let tail = &prices[prices.len() - BAND_PERIOD..];
    let variance =
        tail.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / BAND_PERIOD as f64;
    let width = variance.sqrt() * BAND_WIDTH;
    Some((middle - width, middle + width))
}

impl super::SignalSource for MeanReversionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, window: &[Candle], timeframe: &str) -> Option<Signal> {
        if window.len() < self.min_history() {
            return None;
        }

        let prices = close_prices(window);
        let rsi = wilder_rsi(&prices, 14);
        let direction = if rsi < 30.0 {
            Direction::Long
        } else if rsi > 70.0 {
            Direction::Short
        } else {
            return None;
        };

        let n = window.len();
        let current = &window[n - 1];
        let previous = &window[n - 2];
        let range = current.high - current.low;
        let (lower_band, upper_band) = bollinger(&prices)?;
        let ema = ema_series(&prices, 50);
        let ema_now = *ema.last()?;
        let ema_before = ema[ema.len().saturating_sub(11)];
        let ema_flat = ema_now > 0.0 && ((ema_now - ema_before) / ema_now).abs() < 0.01;
        let avg_volume = mean_volume(&window[..n - 1], 20);
        let volume_spike = avg_volume > 0.0 && current.volume > avg_volume * 1.5;

        let checks = match direction {
            Direction::Long => [
                range > 0.0 && (current.open.min(current.close) - current.low) / range > 0.5,
                current.close > previous.close,
                current.low <= lower_band,
                volume_spike,
                ema_flat,
                is_bearish(previous) && body_ratio(previous) > 0.5,
            ],
            Direction::Short => [
                range > 0.0 && (current.high - current.open.max(current.close)) / range > 0.5,
                current.close < previous.close,
                current.high >= upper_band,
                volume_spike,
                ema_flat,
                is_bullish(previous) && body_ratio(previous) > 0.5,
            ],
        };
        let confirmations = checks.iter().filter(|passed| **passed).count() as u32;
        if confirmations < required_confirmations(timeframe, self.params.min_confluence) {
            return None;
        }

        let atr = average_true_range(window, 14)?;
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
        60
    }
}
