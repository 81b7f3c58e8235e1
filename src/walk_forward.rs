use crate::backtester::BacktestDriver;
use crate::config::{candles_per_day, BacktestSettings, WalkForwardSettings};
use crate::models::{BacktestRun, Candle, WalkForwardAnalysis, WalkForwardPeriod};
use crate::performance::PerformanceCalculator;
use crate::strategy::SignalSource;
use anyhow::{anyhow, Result};
use log::{debug, info};
use statrs::statistics::Statistics;

/// Sequential train/test evaluation. Periods run strictly in order because
/// each test period starts from the previous period's ending balance.
pub struct WalkForwardAnalyzer {
    settings: BacktestSettings,
    train_len: usize,
    test_len: usize,
    step: usize,
}

impl WalkForwardAnalyzer {
    /// Lengths are in candles.
    pub fn new(settings: BacktestSettings, train_len: usize, test_len: usize, step: usize) -> Self {
        Self {
            settings,
            train_len,
            test_len,
            step: step.max(1),
        }
    }

    /// Converts day-based lengths with the timeframe's candles per day. The
    /// step defaults to half the testing length.
    pub fn from_days(settings: BacktestSettings, days: &WalkForwardSettings) -> Self {
        let per_day = candles_per_day(&settings.timeframe);
        let step_days = days.step_days.unwrap_or(days.testing_days / 2);
        Self::new(
            settings,
            days.training_days * per_day,
            days.testing_days * per_day,
            step_days * per_day,
        )
    }

    pub fn train_len(&self) -> usize {
        self.train_len
    }

    pub fn test_len(&self) -> usize {
        self.test_len
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn analyze<S: SignalSource + ?Sized>(
        &self,
        candles: &[Candle],
        source: &S,
    ) -> Result<WalkForwardAnalysis> {
        if self.train_len == 0 || self.test_len == 0 {
            return Err(anyhow!(
                "Walk-forward training and testing lengths must be > 0 (train: {}, test: {})",
                self.train_len,
                self.test_len
            ));
        }
        let needed = self.train_len + self.test_len;
        if candles.len() < needed {
            return Err(anyhow!(
                "Not enough candles for walk-forward analysis: need {}, have {}",
                needed,
                candles.len()
            ));
        }

        let in_sample_driver = BacktestDriver::new(self.settings.clone());
        let starting_balance = self.settings.start_balance;
        let mut balance = starting_balance;
        let mut periods = Vec::new();
        let mut in_sample_wins = 0usize;
        let mut in_sample_total = 0usize;
        let mut out_of_sample_wins = 0usize;
        let mut combined = CombinedRun::new(starting_balance);

        let mut start = 0usize;
        while start + needed <= candles.len() {
            let train_end = start + self.train_len;
            let test_end = train_end + self.test_len;

            let train_run = in_sample_driver.run(&candles[start..train_end], source);
            in_sample_wins += train_run.winning_trades;
            in_sample_total += train_run.total_trades;

            let test_driver = BacktestDriver::new(self.settings.with_start_balance(balance));
            let test_run = test_driver.run(&candles[train_end..test_end], source);

            let period = WalkForwardPeriod {
                period: periods.len() + 1,
                train_start: start,
                train_end,
                test_start: train_end,
                test_end,
                starting_balance: balance,
                ending_balance: test_run.final_balance,
                in_sample_win_rate: train_run.win_rate,
                win_rate: test_run.win_rate,
                return_percent: test_run.return_percent,
                profit_factor: test_run.profit_factor,
                total_trades: test_run.total_trades,
            };
            debug!(
                "Walk-forward period {}: test [{}, {}) {} trades, return {:.2}%",
                period.period, train_end, test_end, period.total_trades, period.return_percent
            );

            balance = test_run.final_balance;
            out_of_sample_wins += test_run.winning_trades;
            combined.absorb(test_run, train_end);
            periods.push(period);
            start += self.step;
        }

        let out_of_sample_total: usize = periods.iter().map(|p| p.total_trades).sum();
        let in_sample_win_rate = ratio_percent(in_sample_wins, in_sample_total);
        let out_of_sample_win_rate = ratio_percent(out_of_sample_wins, out_of_sample_total);
        let returns: Vec<f64> = periods.iter().map(|p| p.return_percent).collect();

        let combined = combined.finish(&self.settings, source.name());
        info!(
            "Walk-forward: {} periods, in-sample win rate {:.2}%, out-of-sample {:.2}%",
            periods.len(),
            in_sample_win_rate,
            out_of_sample_win_rate
        );

        Ok(WalkForwardAnalysis {
            in_sample_win_rate,
            out_of_sample_win_rate,
            overfitting_score: overfitting_score(in_sample_win_rate, out_of_sample_win_rate),
            consistency: consistency(&returns),
            starting_balance,
            final_balance: balance,
            combined,
            periods,
        })
    }
}

fn ratio_percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Relative gap between in-sample and out-of-sample win rate, in percent.
pub fn overfitting_score(in_sample_win_rate: f64, out_of_sample_win_rate: f64) -> f64 {
    if in_sample_win_rate <= 0.0 {
        return 0.0;
    }
    (in_sample_win_rate - out_of_sample_win_rate).abs() / in_sample_win_rate * 100.0
}

/// 100 for identical period returns, dropping 10 points per unit of spread.
pub fn consistency(period_returns: &[f64]) -> f64 {
    if period_returns.len() < 2 {
        return 0.0;
    }
    let spread = period_returns.population_std_dev();
    (100.0 - spread * 10.0).max(0.0)
}

/// Out-of-sample trades from every period, re-indexed against the full series.
struct CombinedRun {
    start_balance: f64,
    peak: f64,
    max_drawdown: f64,
    run: BacktestRun,
}

impl CombinedRun {
    fn new(start_balance: f64) -> Self {
        Self {
            start_balance,
            peak: start_balance,
            max_drawdown: 0.0,
            run: BacktestRun::default(),
        }
    }

    fn absorb(&mut self, period_run: BacktestRun, offset: usize) {
        for mut trade in period_run.trades {
            trade.entry_index += offset;
            self.peak = self.peak.max(trade.balance_after);
            if self.peak > 0.0 {
                self.max_drawdown = self
                    .max_drawdown
                    .max((self.peak - trade.balance_after) / self.peak);
            }
            self.run.trades.push(trade);
        }
        for (reason, count) in period_run.exit_reasons {
            *self.run.exit_reasons.entry(reason).or_insert(0) += count;
        }
        self.run.signals_generated += period_run.signals_generated;
        self.run.signals_discarded += period_run.signals_discarded;
        self.run.final_balance = period_run.final_balance;
    }

    fn finish(mut self, settings: &BacktestSettings, strategy: &str) -> BacktestRun {
        let run = &mut self.run;
        run.symbol = settings.symbol.clone();
        run.strategy = strategy.to_string();
        run.timeframe = settings.timeframe.clone();
        run.start_balance = self.start_balance;
        run.peak_balance = self.peak;
        run.max_drawdown = self.max_drawdown;
        PerformanceCalculator::finalize_run(run);
        self.run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RiskConfig, WindowConfig, WindowPolicy};
    use crate::models::{Direction, Signal, TakeProfitTier};
    use chrono::{Duration, TimeZone, Utc};

    /// Long every bar with a target one point above the close.
    struct AlwaysLong;

    impl SignalSource for AlwaysLong {
        fn name(&self) -> &str {
            "always_long"
        }

        fn generate_signal(&self, window: &[Candle], timeframe: &str) -> Option<Signal> {
            let close = window.last()?.close;
            Some(Signal {
                direction: Direction::Long,
                entry: close,
                stop_loss: close - 1.0,
                targets: vec![TakeProfitTier {
                    price: close + 1.0,
                    allocation_percent: 100.0,
                }],
                confidence: 60.0,
                timeframe: timeframe.to_string(),
            })
        }

        fn min_history(&self) -> usize {
            1
        }
    }

    fn zigzag(count: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = 100.0 + (i % 7) as f64 * 0.8;
                Candle {
                    timestamp: start + Duration::hours(i as i64),
                    open: close,
                    high: close + 1.2,
                    low: close - 1.2,
                    close,
                    volume: 500.0,
                }
            })
            .collect()
    }

    fn settings() -> BacktestSettings {
        BacktestSettings {
            timeframe: "1h".to_string(),
            risk: RiskConfig::default(),
            window: WindowConfig {
                policy: WindowPolicy::Fixed,
                min_window: 5,
                max_window: 10,
                skip_ahead: 2,
                lookahead: 3,
            },
            ..BacktestSettings::default()
        }
    }

    #[test]
    fn periods_chain_balances() {
        let analyzer = WalkForwardAnalyzer::new(settings(), 40, 20, 10);
        let analysis = analyzer.analyze(&zigzag(200), &AlwaysLong).unwrap();

        assert_eq!(analysis.periods.len(), (200 - 60) / 10 + 1);
        for pair in analysis.periods.windows(2) {
            assert!((pair[0].ending_balance - pair[1].starting_balance).abs() < 1e-9);
            assert_eq!(pair[1].train_start, pair[0].train_start + 10);
        }
        let first = &analysis.periods[0];
        assert_eq!((first.train_start, first.train_end), (0, 40));
        assert_eq!((first.test_start, first.test_end), (40, 60));
        let last = analysis.periods.last().unwrap();
        assert!((analysis.final_balance - last.ending_balance).abs() < 1e-9);
        assert!((analysis.combined.final_balance - analysis.final_balance).abs() < 1e-9);
        assert_eq!(
            analysis.combined.total_trades,
            analysis.periods.iter().map(|p| p.total_trades).sum::<usize>()
        );
        assert!(analysis
            .combined
            .trades
            .iter()
            .all(|t| t.entry_index >= 40));
    }

    #[test]
    fn day_lengths_use_candles_per_day() {
        let analyzer = WalkForwardAnalyzer::from_days(
            settings(),
            &WalkForwardSettings {
                training_days: 2,
                testing_days: 1,
                step_days: None,
            },
        );
        assert_eq!(analyzer.train_len(), 48);
        assert_eq!(analyzer.test_len(), 24);
        // half of one day rounds down to zero days, then guarded to one bar
        assert_eq!(analyzer.step(), 1);
    }

    #[test]
    fn short_series_is_rejected() {
        let analyzer = WalkForwardAnalyzer::new(settings(), 40, 20, 10);
        let err = analyzer.analyze(&zigzag(50), &AlwaysLong).unwrap_err();
        assert!(err.to_string().contains("Not enough candles"));
    }

    #[test]
    fn scores_are_defined() {
        assert_eq!(overfitting_score(0.0, 40.0), 0.0);
        assert!((overfitting_score(60.0, 45.0) - 25.0).abs() < 1e-9);
        assert!((consistency(&[2.0, 2.0, 2.0]) - 100.0).abs() < 1e-9);
        // population std dev of [0, 20] is 10
        assert_eq!(consistency(&[0.0, 20.0]), 0.0);
        assert_eq!(consistency(&[5.0]), 0.0);
    }
}
