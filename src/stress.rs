use crate::backtester::BacktestDriver;
use crate::indicators::average_true_range;
use crate::models::{Candle, StressTestAnalysis};
use crate::strategy::SignalSource;
use log::{debug, info};

pub const CRASH_PERCENT: f64 = -30.0;
pub const RALLY_PERCENT: f64 = 50.0;
pub const HIGH_VOLATILITY_PERCENT: f64 = 2.0;
pub const LOW_VOLATILITY_PERCENT: f64 = 0.5;
/// Volatility subsets need strictly more bars than this to be backtested.
pub const MIN_SUBSET_BARS: usize = 100;
const VOLATILITY_LOOKBACK: usize = 20;
const ATR_PERIOD: usize = 14;

/// Every bar's prices scaled by `1 + percent / 100`.
pub fn shift_prices(candles: &[Candle], percent: f64) -> Vec<Candle> {
    let multiplier = 1.0 + percent / 100.0;
    candles.iter().map(|c| c.scaled(multiplier)).collect()
}

/// Bars whose trailing ATR, as a percent of the bar's mid price, is above the
/// high threshold or below the low one.
pub fn split_by_volatility(candles: &[Candle]) -> (Vec<Candle>, Vec<Candle>) {
    let mut high = Vec::new();
    let mut low = Vec::new();
    for i in VOLATILITY_LOOKBACK..candles.len() {
        let Some(atr) = average_true_range(&candles[i - VOLATILITY_LOOKBACK..i], ATR_PERIOD) else {
            continue;
        };
        let bar = &candles[i];
        let mid = (bar.high + bar.low) / 2.0;
        if mid <= 0.0 {
            continue;
        }
        let volatility = atr / mid * 100.0;
        if volatility > HIGH_VOLATILITY_PERCENT {
            high.push(bar.clone());
        } else if volatility < LOW_VOLATILITY_PERCENT {
            low.push(bar.clone());
        }
    }
    (high, low)
}

pub fn run_stress_test<S: SignalSource + ?Sized>(
    driver: &BacktestDriver,
    candles: &[Candle],
    source: &S,
) -> StressTestAnalysis {
    let crash = driver.run(&shift_prices(candles, CRASH_PERCENT), source);
    let rally = driver.run(&shift_prices(candles, RALLY_PERCENT), source);
    let (high, low) = split_by_volatility(candles);
    debug!(
        "Stress test volatility subsets: {} high bars, {} low bars",
        high.len(),
        low.len()
    );

    let subset_return = |subset: &[Candle]| {
        (subset.len() > MIN_SUBSET_BARS).then(|| driver.run(subset, source).return_percent)
    };

    let analysis = StressTestAnalysis {
        crash_scenario_return: crash.return_percent,
        rally_scenario_return: rally.return_percent,
        high_volatility_return: subset_return(&high),
        low_volatility_return: subset_return(&low),
        high_volatility_bars: high.len(),
        low_volatility_bars: low.len(),
    };
    info!(
        "Stress test: crash {:.2}%, rally {:.2}%",
        analysis.crash_scenario_return, analysis.rally_scenario_return
    );
    analysis
}
