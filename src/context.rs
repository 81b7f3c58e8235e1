use crate::config::{BacktestSettings, EngineSettings, DEFAULT_TIMEFRAME};
use crate::data_context::{
    carries_timeframe, env_setting, load_settings_file, merge_settings, MarketData,
};
use crate::models::ParameterSet;
use crate::param_utils::{apply_overrides, parse_parameter_overrides};
use crate::registry::{find_profile, profile_names, StrategyProfile};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What the CLI knows before any data is loaded.
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    settings_path: Option<PathBuf>,
    symbol_override: Option<String>,
}

impl AppContext {
    pub fn initialize(settings_path: Option<PathBuf>, symbol_override: Option<String>) -> Self {
        Self {
            settings_path,
            symbol_override,
        }
    }

    /// Loads candles and resolves settings in priority order: environment,
    /// settings file, snapshot settings, built-in defaults.
    pub fn run_context<P: AsRef<Path>>(&self, data_file: P) -> Result<RunContext> {
        let data_file = data_file.as_ref();
        let file_settings = self
            .settings_path
            .as_deref()
            .map(load_settings_file)
            .transpose()?;
        let early = merge_settings(&HashMap::new(), file_settings.as_ref(), env_setting);
        let symbol = self
            .symbol_override
            .clone()
            .or_else(|| early.get("SYMBOL").cloned())
            .unwrap_or_else(|| "BTCUSDT".to_string());
        let timeframe = early
            .get("TIMEFRAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string());

        let mut data = MarketData::load_from_file(data_file, &symbol, &timeframe)?;
        let raw_settings = merge_settings(data.settings(), file_settings.as_ref(), env_setting);
        let mut settings = EngineSettings::from_settings_map(&raw_settings)?;

        settings.backtest.symbol = self
            .symbol_override
            .clone()
            .or_else(|| raw_settings.get("SYMBOL").cloned())
            .unwrap_or_else(|| data.symbol().to_string());
        settings.backtest.timeframe = raw_settings
            .get("TIMEFRAME")
            .cloned()
            .unwrap_or_else(|| data.timeframe().to_string());

        let timeframe_known =
            raw_settings.contains_key("TIMEFRAME") || carries_timeframe(data_file);
        if let Some(days) = settings.lookback_days {
            data = data.restrict_to_lookback_days(days);
        }

        Ok(RunContext {
            settings,
            raw_settings,
            data,
            timeframe_known,
        })
    }
}

/// Settings and candles for one CLI invocation.
pub struct RunContext {
    pub settings: EngineSettings,
    pub raw_settings: HashMap<String, String>,
    pub data: MarketData,
    /// False when neither the settings nor the data file named a timeframe.
    pub timeframe_known: bool,
}

impl RunContext {
    pub fn profile(&self, name: &str) -> Result<&'static StrategyProfile> {
        find_profile(name).ok_or_else(|| {
            anyhow!(
                "Unknown strategy: {} (available: {})",
                name,
                profile_names().join(", ")
            )
        })
    }

    /// Profile defaults, then an explicit RISK_PERCENT setting, then
    /// `key=value` overrides from the command line.
    pub fn parameters_for(
        &self,
        profile: &StrategyProfile,
        overrides: &[String],
    ) -> Result<ParameterSet> {
        let mut params = profile.defaults;
        if self.raw_settings.contains_key("RISK_PERCENT") {
            params.risk_percent = self.settings.backtest.risk.risk_fraction * 100.0;
        }
        let overrides = parse_parameter_overrides(overrides)?;
        let params = apply_overrides(params, &overrides);
        if !params.is_valid() {
            return Err(anyhow!(
                "Invalid parameters for {}: {}",
                profile.name,
                params.describe()
            ));
        }
        Ok(params)
    }

    /// Candles a profile runs on. Without an explicit LOOKBACK_DAYS the
    /// profile's own history length trims the series.
    pub fn data_for(&self, profile: &StrategyProfile) -> MarketData {
        match self.settings.lookback_days {
            Some(_) => self.data.clone(),
            None => self.data.clone().restrict_to_lookback_days(profile.lookback_days),
        }
    }

    /// Backtest settings for a profile. Without a known timeframe the
    /// profile's default labels the run.
    pub fn profile_settings(&self, profile: &StrategyProfile) -> BacktestSettings {
        let mut settings = self.settings.backtest.clone();
        if !self.timeframe_known {
            settings.timeframe = profile.timeframe.to_string();
        } else if settings.timeframe != profile.timeframe {
            warn!(
                "{} is designed for {} candles but the data is {}",
                profile.name, profile.timeframe, settings.timeframe
            );
        }
        settings
    }

    /// Backtest settings with the risk taken from `params`.
    pub fn backtest_settings(&self, profile: &StrategyProfile, params: &ParameterSet) -> BacktestSettings {
        let mut settings = self.profile_settings(profile);
        settings.risk = settings.risk.with_risk_percent(params.risk_percent);
        settings
    }

    /// The driver needs at least one full window plus the forward bars.
    pub fn ensure_history(&self, data: &MarketData, source_min_history: usize) -> Result<()> {
        let window = self.settings.backtest.window;
        let needed = window.min_window.max(source_min_history) + window.lookahead + 1;
        let available = data.len();
        if available < needed {
            return Err(anyhow!(
                "Not enough candles: need at least {}, have {}",
                needed,
                available
            ));
        }
        info!(
            "{} {} candles for {}",
            available, self.settings.backtest.timeframe, self.settings.backtest.symbol
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{evolve, optimize};
    use crate::models::Candle;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(count: i64, step: Duration) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.3).sin() * 2.0;
                Candle {
                    timestamp: start + step * i as i32,
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn context(data: MarketData, raw: &[(&str, &str)]) -> RunContext {
        let raw_settings: HashMap<String, String> = raw
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let settings = EngineSettings::from_settings_map(&raw_settings).unwrap();
        let timeframe_known = raw_settings.contains_key("TIMEFRAME");
        RunContext {
            settings,
            raw_settings,
            data,
            timeframe_known,
        }
    }

    #[test]
    fn profile_lookback_trims_history_by_default() {
        let data = MarketData::new("BTCUSDT", "1d", candles(60, Duration::days(1))).unwrap();
        let ctx = context(data, &[]);

        let scalper = ctx.profile("scalper_pro").unwrap();
        let trimmed = ctx.data_for(scalper);
        assert_eq!(trimmed.len(), 31);
        assert_eq!(trimmed.candles().last(), ctx.data.candles().last());

        let session = ctx.profile("session_trader").unwrap();
        assert_eq!(ctx.data_for(session).len(), 60);
    }

    #[test]
    fn explicit_lookback_overrides_profile_default() {
        let data = MarketData::new("BTCUSDT", "1d", candles(60, Duration::days(1))).unwrap();
        let ctx = context(data, &[("LOOKBACK_DAYS", "45")]);
        let scalper = ctx.profile("scalper_pro").unwrap();
        assert_eq!(ctx.data_for(scalper).len(), 60);
    }

    #[test]
    fn profile_timeframe_applies_when_data_has_none() {
        let data = MarketData::new("BTCUSDT", "1h", candles(10, Duration::hours(1))).unwrap();
        let scalper = find_profile("scalper_pro").unwrap();

        let unlabeled = context(data.clone(), &[]);
        assert_eq!(unlabeled.profile_settings(scalper).timeframe, "5m");

        let labeled = context(data, &[("TIMEFRAME", "1h")]);
        assert_eq!(labeled.profile_settings(scalper).timeframe, "1h");
    }

    #[test]
    fn searches_reject_short_history() {
        let data = MarketData::new("BTCUSDT", "1h", candles(30, Duration::hours(1))).unwrap();
        let ctx = context(data, &[("TIMEFRAME", "1h")]);

        let err = optimize::run(&ctx, &["breakout_master".to_string()], None).unwrap_err();
        assert!(err.to_string().contains("Not enough candles"));

        let err = evolve::run(&ctx, "trend_rider", 7, None).unwrap_err();
        assert!(err.to_string().contains("Not enough candles"));
    }
}
