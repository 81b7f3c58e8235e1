use crate::config::{BacktestSettings, WindowPolicy};
use crate::models::{BacktestRun, Candle, ParameterSet, SimulatedTrade};
use crate::performance::PerformanceCalculator;
use crate::registry::StrategyProfile;
use crate::signal_cache::SignalCache;
use crate::simulator::TradeSimulator;
use crate::strategy::{create_signal_source, SignalSource};
use log::debug;
use std::collections::BTreeMap;
use std::ops::Range;

/// Slice of history handed to the signal source at bar `index`. The bar at
/// `index` itself is never part of the window.
pub fn history_window(
    policy: WindowPolicy,
    min_window: usize,
    max_window: usize,
    index: usize,
) -> Range<usize> {
    match policy {
        WindowPolicy::Expanding | WindowPolicy::Rolling => index.saturating_sub(max_window)..index,
        WindowPolicy::Fixed => index.saturating_sub(min_window)..index,
    }
}

/// Running balance state owned by exactly one run.
struct RunAccumulator {
    balance: f64,
    peak: f64,
    max_drawdown: f64,
    trades: Vec<SimulatedTrade>,
    exit_reasons: BTreeMap<String, usize>,
}

impl RunAccumulator {
    fn new(start_balance: f64) -> Self {
        Self {
            balance: start_balance,
            peak: start_balance,
            max_drawdown: 0.0,
            trades: Vec::new(),
            exit_reasons: BTreeMap::new(),
        }
    }

    fn record(&mut self, trade: SimulatedTrade) {
        self.balance = trade.balance_after;
        if self.balance > self.peak {
            self.peak = self.balance;
        }
        if self.peak > 0.0 {
            let drawdown = (self.peak - self.balance) / self.peak;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
        *self
            .exit_reasons
            .entry(trade.exit_reason.to_string())
            .or_insert(0) += 1;
        self.trades.push(trade);
    }
}

/// Walks a candle series bar by bar, asking the signal source for a trade and
/// replaying each one through the simulator.
pub struct BacktestDriver {
    settings: BacktestSettings,
    simulator: TradeSimulator,
}

impl BacktestDriver {
    pub fn new(settings: BacktestSettings) -> Self {
        let simulator = TradeSimulator::new(settings.risk);
        Self {
            settings,
            simulator,
        }
    }

    pub fn settings(&self) -> &BacktestSettings {
        &self.settings
    }

    pub fn run<S: SignalSource + ?Sized>(&self, candles: &[Candle], source: &S) -> BacktestRun {
        self.run_with_cache(candles, source, None)
    }

    /// Same as [`run`](Self::run); signals the cache has already seen for this
    /// symbol and strategy are discarded.
    pub fn run_with_cache<S: SignalSource + ?Sized>(
        &self,
        candles: &[Candle],
        source: &S,
        cache: Option<&SignalCache>,
    ) -> BacktestRun {
        let settings = &self.settings;
        let window = settings.window;
        let mut acc = RunAccumulator::new(settings.start_balance);
        let mut signals_generated = 0usize;
        let mut signals_discarded = 0usize;

        let end = candles.len().saturating_sub(window.lookahead);
        let mut i = window.min_window.max(1);
        while i < end {
            if acc.balance <= 0.0 {
                debug!(
                    "{}: balance exhausted at bar {}, stopping run",
                    source.name(),
                    i
                );
                break;
            }

            let range = history_window(window.policy, window.min_window, window.max_window, i);

            if let Some(filter) = &settings.time_filter {
                if !filter.allows(candles[i].timestamp) {
                    i += 1;
                    continue;
                }
            }

            let Some(signal) = source.generate_signal(&candles[range], &settings.timeframe) else {
                i += 1;
                continue;
            };
            signals_generated += 1;

            if let Some(cache) = cache {
                if cache.is_duplicate(&settings.symbol, source.name(), &signal) {
                    signals_discarded += 1;
                    i += 1;
                    continue;
                }
                cache.record(&settings.symbol, source.name(), &signal);
            }

            let forward = &candles[i..(i + window.lookahead).min(candles.len())];
            match self
                .simulator
                .try_simulate(&signal, forward, acc.balance, i)
            {
                Ok(trade) => {
                    acc.record(trade);
                    i += window.skip_ahead.max(1);
                }
                Err(reason) => {
                    debug!("{}: signal at bar {} discarded: {}", source.name(), i, reason);
                    signals_discarded += 1;
                    i += 1;
                }
            }
        }

        let mut run = BacktestRun {
            symbol: settings.symbol.clone(),
            strategy: source.name().to_string(),
            timeframe: settings.timeframe.clone(),
            start_balance: settings.start_balance,
            final_balance: acc.balance,
            peak_balance: acc.peak,
            max_drawdown: acc.max_drawdown,
            signals_generated,
            signals_discarded,
            trades: acc.trades,
            exit_reasons: acc.exit_reasons,
            ..BacktestRun::default()
        };
        PerformanceCalculator::finalize_run(&mut run);

        debug!(
            "{}: {} trades, win rate {:.2}%, return {:.2}%, max DD {:.2}%",
            run.strategy,
            run.total_trades,
            run.win_rate,
            run.return_percent,
            run.max_drawdown_percent()
        );
        run
    }
}

/// Scores a parameter set with a full backtest. `None` means the set could not
/// be evaluated and should be skipped.
pub trait BacktestOracle: Sync {
    fn evaluate(&self, params: &ParameterSet) -> Option<BacktestRun>;
}

impl<F> BacktestOracle for F
where
    F: Fn(&ParameterSet) -> Option<BacktestRun> + Sync,
{
    fn evaluate(&self, params: &ParameterSet) -> Option<BacktestRun> {
        self(params)
    }
}

/// Oracle backed by a registered strategy profile and a shared candle series.
/// The settings' timeframe labels the candles, not the profile's.
pub struct ProfileOracle<'a> {
    profile: &'a StrategyProfile,
    candles: &'a [Candle],
    settings: BacktestSettings,
}

impl<'a> ProfileOracle<'a> {
    pub fn new(
        profile: &'a StrategyProfile,
        candles: &'a [Candle],
        settings: &BacktestSettings,
    ) -> Self {
        Self {
            profile,
            candles,
            settings: settings.clone(),
        }
    }

    pub fn profile(&self) -> &StrategyProfile {
        self.profile
    }
}

impl BacktestOracle for ProfileOracle<'_> {
    fn evaluate(&self, params: &ParameterSet) -> Option<BacktestRun> {
        if !params.is_valid() {
            return None;
        }
        let mut settings = self.settings.clone();
        settings.risk = settings.risk.with_risk_percent(params.risk_percent);
        let source = create_signal_source(self.profile, params);
        Some(BacktestDriver::new(settings).run(self.candles, &source))
    }
}
