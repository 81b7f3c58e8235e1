use crate::indicators::{average_true_range, close_prices, ema_series, mean_volume, wilder_rsi};
use crate::models::*;
use crate::strategy_utils::{
    atr_bracket, body_ratio, confluence_confidence, is_bearish, is_bullish,
    required_confirmations,
};

const ATR_PERIOD: usize = 14;
const VOLUME_LOOKBACK: usize = 20;

/// EMA 9/20/50 trend follower that enters on pullbacks once enough
/// independent confirmations agree.
pub struct TrendFollowingSource {
    name: String,
    params: ParameterSet,
    exit_tier: u8,
}

impl TrendFollowingSource {
    pub fn new(name: String, params: ParameterSet, exit_tier: u8) -> Self {
        Self {
            name,
            params,
            exit_tier,
        }
    }

    fn confirmations(
        &self,
        direction: Direction,
        window: &[Candle],
        ema_fast: f64,
        ema_mid: f64,
        ema_slow: f64,
        atr: f64,
    ) -> u32 {
        let n = window.len();
        let current = &window[n - 1];
        let previous = &window[n - 2];
        let avg_volume = mean_volume(&window[..n - 1], VOLUME_LOOKBACK);
        let recent_atr = average_true_range(window, 5).unwrap_or(0.0);

        let checks = match direction {
            Direction::Long => [
                ema_fast > ema_mid && ema_mid > ema_slow,
                current.low <= ema_mid * 1.005 && current.close > ema_mid,
                is_bullish(current) && body_ratio(current) > 0.5,
                is_bearish(previous) || body_ratio(previous) < 0.3,
                avg_volume > 0.0 && current.volume > avg_volume * 1.3,
                recent_atr >= atr * 0.7,
            ],
            Direction::Short => [
                ema_fast < ema_mid && ema_mid < ema_slow,
                current.high >= ema_mid * 0.995 && current.close < ema_mid,
                is_bearish(current) && body_ratio(current) > 0.5,
                is_bullish(previous) || body_ratio(previous) < 0.3,
                avg_volume > 0.0 && current.volume > avg_volume * 1.3,
                recent_atr >= atr * 0.7,
            ],
        };
        checks.iter().filter(|passed| **passed).count() as u32
    }
}

impl super::SignalSource for TrendFollowingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, window: &[Candle], timeframe: &str) -> Option<Signal> {
        if window.len() < self.min_history() {
            return None;
        }

        let prices = close_prices(window);
        let ema_fast = *ema_series(&prices, 9).last()?;
        let ema_mid = *ema_series(&prices, 20).last()?;
        let ema_slow = *ema_series(&prices, 50).last()?;
        let rsi = wilder_rsi(&prices, 14);
        let atr = average_true_range(window, ATR_PERIOD)?;
        let price = *prices.last()?;

        let direction = if ema_fast > ema_mid && price > ema_slow && rsi > 40.0 && rsi < 75.0 {
            Direction::Long
        } else if ema_fast < ema_mid && price < ema_slow && rsi < 60.0 && rsi > 25.0 {
            Direction::Short
        } else {
            return None;
        };

        let confirmations =
            self.confirmations(direction, window, ema_fast, ema_mid, ema_slow, atr);
        if confirmations < required_confirmations(timeframe, self.params.min_confluence) {
            return None;
        }

        atr_bracket(
            direction,
            price,
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
