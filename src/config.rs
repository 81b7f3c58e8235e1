use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::HashMap;

pub const DEFAULT_START_BALANCE: f64 = 10_000.0;
pub const DEFAULT_TIMEFRAME: &str = "15m";
pub const MAX_POSITION_CAP_MULTIPLIER: f64 = 10.0;

/// Every key `EngineSettings::from_settings_map` understands.
pub const SETTING_KEYS: [&str; 28] = [
    "SYMBOL",
    "TIMEFRAME",
    "LOOKBACK_DAYS",
    "START_BALANCE",
    "RISK_PERCENT",
    "SLIPPAGE_PERCENT",
    "FEE_PERCENT",
    "MAX_POSITION_CAP",
    "WINDOW_TYPE",
    "MIN_WINDOW",
    "MAX_WINDOW",
    "SKIP_AHEAD",
    "LOOKAHEAD",
    "USE_TIME_FILTER",
    "TRAINING_DAYS",
    "TESTING_DAYS",
    "STEP_DAYS",
    "MC_ITERATIONS",
    "MC_MODE",
    "GA_POPULATION_SIZE",
    "GA_GENERATIONS",
    "GA_MUTATION_RATE",
    "GRID_STOP_ATR",
    "GRID_TP1_ATR",
    "GRID_TP2_ATR",
    "GRID_TP3_ATR",
    "GRID_RISK_PERCENT",
    "GRID_MIN_CONFLUENCE",
];

/// Per-trade risk and execution cost model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskConfig {
    pub risk_fraction: f64,
    pub max_position_cap: f64,
    pub slippage_rate: f64,
    pub fee_rate: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: 0.02,
            max_position_cap: DEFAULT_START_BALANCE * MAX_POSITION_CAP_MULTIPLIER,
            slippage_rate: 0.001,
            fee_rate: 0.001,
        }
    }
}

impl RiskConfig {
    /// Same costs, risk taken from a parameter set expressed in percent.
    pub fn with_risk_percent(self, risk_percent: f64) -> Self {
        Self {
            risk_fraction: risk_percent / 100.0,
            ..self
        }
    }

    pub fn risk_amount(&self, balance: f64) -> f64 {
        (balance * self.risk_fraction).min(self.max_position_cap)
    }
}

/// How much history the signal source sees at each bar.
///
/// `Expanding` and `Rolling` both hand over the trailing `max_window` bars;
/// before that many bars exist they use all the history there is, so a
/// rolling run evaluates the bars between `min_window` and `max_window` on a
/// truncated window. `Fixed` always hands over the trailing `min_window` bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    Expanding,
    Rolling,
    Fixed,
}

impl WindowPolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "expanding" => Ok(Self::Expanding),
            "rolling" => Ok(Self::Rolling),
            "fixed" => Ok(Self::Fixed),
            other => Err(anyhow!(
                "WINDOW_TYPE must be expanding, rolling or fixed (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Expanding => "expanding",
            Self::Rolling => "rolling",
            Self::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub policy: WindowPolicy,
    pub min_window: usize,
    pub max_window: usize,
    /// Bars skipped after a realized trade.
    pub skip_ahead: usize,
    /// Forward bars handed to the simulator.
    pub lookahead: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            policy: WindowPolicy::Expanding,
            min_window: 50,
            max_window: 200,
            skip_ahead: 10,
            lookahead: 20,
        }
    }
}

/// Session filter applied to the entry bar's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFilter {
    pub first_hour: u32,
    pub last_hour: u32,
    pub skip_weekends: bool,
}

impl Default for TimeFilter {
    fn default() -> Self {
        Self {
            first_hour: 9,
            last_hour: 19,
            skip_weekends: true,
        }
    }
}

impl TimeFilter {
    pub fn allows(&self, timestamp: DateTime<Utc>) -> bool {
        if self.skip_weekends && matches!(timestamp.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let hour = timestamp.hour();
        hour >= self.first_hour && hour <= self.last_hour
    }
}

pub fn candles_per_day(timeframe: &str) -> usize {
    match timeframe.trim() {
        "1m" => 1440,
        "3m" => 480,
        "5m" => 288,
        "15m" => 96,
        "30m" => 48,
        "1h" => 24,
        "2h" => 12,
        "4h" => 6,
        "1d" => 1,
        _ => 24,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkForwardSettings {
    pub training_days: usize,
    pub testing_days: usize,
    pub step_days: Option<usize>,
}

impl Default for WalkForwardSettings {
    fn default() -> Self {
        Self {
            training_days: 60,
            testing_days: 30,
            step_days: None,
        }
    }
}

/// How a Monte Carlo iteration reorders the trade list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMode {
    /// Every trade exactly once in a shuffled order.
    Permutation,
    /// Draw trades with replacement.
    Bootstrap,
}

impl ResampleMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "permutation" | "shuffle" => Ok(Self::Permutation),
            "bootstrap" => Ok(Self::Bootstrap),
            other => Err(anyhow!(
                "MC_MODE must be permutation or bootstrap (value: {})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonteCarloConfig {
    pub iterations: usize,
    pub mode: ResampleMode,
    /// Fraction of the starting balance below which a replay counts as ruined.
    pub ruin_threshold: f64,
    /// Runs with fewer trades are not resampled.
    pub min_trades: usize,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            mode: ResampleMode::Permutation,
            ruin_threshold: 0.5,
            min_trades: 10,
        }
    }
}

/// Candidate values for the grid search. An empty confluence list means
/// "use the strategy profile default".
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpace {
    pub stop_atr: Vec<f64>,
    pub tp1_atr: Vec<f64>,
    pub tp2_atr: Vec<f64>,
    pub tp3_atr: Vec<f64>,
    pub risk_percent: Vec<f64>,
    pub min_confluence: Vec<u32>,
}

impl Default for GridSpace {
    fn default() -> Self {
        Self {
            stop_atr: vec![0.5, 0.75, 1.0, 1.25, 1.5, 2.0],
            tp1_atr: vec![2.0, 2.5, 3.0, 3.5, 4.0, 5.0],
            tp2_atr: vec![3.0, 4.0, 4.5, 5.0, 6.0, 7.5],
            tp3_atr: vec![5.0, 6.0, 7.5, 10.0, 12.5, 15.0],
            risk_percent: vec![0.5, 1.0, 1.5, 2.0, 2.5],
            min_confluence: Vec::new(),
        }
    }
}

impl GridSpace {
    pub fn raw_combination_count(&self) -> usize {
        self.stop_atr.len()
            * self.tp1_atr.len()
            * self.tp2_atr.len()
            * self.tp3_atr.len()
            * self.risk_percent.len()
            * self.min_confluence.len().max(1)
    }
}

/// Valid range of one gene field; `step` bounds a single mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    pub const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        crate::param_utils::clamp_f64(value, self.min, self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterBounds {
    pub stop_atr: ParameterRange,
    pub tp1_atr: ParameterRange,
    pub tp2_atr: ParameterRange,
    pub tp3_atr: ParameterRange,
    pub risk_percent: ParameterRange,
    pub min_confluence: ParameterRange,
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            stop_atr: ParameterRange::new(0.5, 2.0, 0.2),
            tp1_atr: ParameterRange::new(2.0, 5.0, 1.0),
            tp2_atr: ParameterRange::new(3.0, 8.0, 1.0),
            tp3_atr: ParameterRange::new(5.0, 15.0, 1.5),
            risk_percent: ParameterRange::new(0.5, 2.5, 0.25),
            min_confluence: ParameterRange::new(2.0, 6.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub elite_fraction: f64,
    pub tournament_size: usize,
    /// Runs with fewer trades score zero fitness.
    pub min_trades: usize,
    pub bounds: ParameterBounds,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 20,
            mutation_rate: 0.2,
            elite_fraction: 0.1,
            tournament_size: 5,
            min_trades: 10,
            bounds: ParameterBounds::default(),
        }
    }
}

/// Everything a backtest needs besides candles and a signal source
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSettings {
    pub symbol: String,
    pub timeframe: String,
    pub start_balance: f64,
    pub risk: RiskConfig,
    pub window: WindowConfig,
    pub time_filter: Option<TimeFilter>,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            timeframe: DEFAULT_TIMEFRAME.to_string(),
            start_balance: DEFAULT_START_BALANCE,
            risk: RiskConfig::default(),
            window: WindowConfig::default(),
            time_filter: None,
        }
    }
}

impl BacktestSettings {
    pub fn with_start_balance(&self, start_balance: f64) -> Self {
        Self {
            start_balance,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub backtest: BacktestSettings,
    pub lookback_days: Option<usize>,
    pub walk_forward: WalkForwardSettings,
    pub monte_carlo: MonteCarloConfig,
    pub genetic: GeneticConfig,
    pub grid: GridSpace,
}

impl EngineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let symbol = optional_setting(settings, "SYMBOL")
            .unwrap_or("BTCUSDT")
            .to_string();
        let timeframe = optional_setting(settings, "TIMEFRAME")
            .unwrap_or(DEFAULT_TIMEFRAME)
            .to_string();
        let lookback_days = match optional_setting(settings, "LOOKBACK_DAYS") {
            Some(_) => Some(setting_usize(settings, "LOOKBACK_DAYS", 0, 1)?),
            None => None,
        };
        let start_balance = setting_f64(
            settings,
            "START_BALANCE",
            DEFAULT_START_BALANCE,
            Some(0.0),
            None,
        )?;
        if start_balance <= 0.0 {
            return Err(anyhow!(
                "Setting START_BALANCE must be > 0 (value: {})",
                start_balance
            ));
        }

        let risk_percent = setting_f64(settings, "RISK_PERCENT", 2.0, Some(0.0), Some(100.0))?;
        let slippage_percent =
            setting_f64(settings, "SLIPPAGE_PERCENT", 0.1, Some(0.0), Some(100.0))?;
        let fee_percent = setting_f64(settings, "FEE_PERCENT", 0.1, Some(0.0), Some(100.0))?;
        let max_position_cap = setting_f64(
            settings,
            "MAX_POSITION_CAP",
            start_balance * MAX_POSITION_CAP_MULTIPLIER,
            Some(0.0),
            None,
        )?;

        let policy = WindowPolicy::parse(optional_setting(settings, "WINDOW_TYPE").unwrap_or("expanding"))?;
        let min_window = setting_usize(settings, "MIN_WINDOW", 50, 2)?;
        let max_window = setting_usize(settings, "MAX_WINDOW", 200, 2)?;
        if max_window < min_window {
            return Err(anyhow!(
                "MAX_WINDOW ({}) must be >= MIN_WINDOW ({})",
                max_window,
                min_window
            ));
        }
        let skip_ahead = setting_usize(settings, "SKIP_AHEAD", 10, 1)?;
        let lookahead = setting_usize(settings, "LOOKAHEAD", 20, 1)?;
        let time_filter = if setting_bool(settings, "USE_TIME_FILTER", false)? {
            Some(TimeFilter::default())
        } else {
            None
        };

        let training_days = setting_usize(settings, "TRAINING_DAYS", 60, 1)?;
        let testing_days = setting_usize(settings, "TESTING_DAYS", 30, 1)?;
        let step_days = match optional_setting(settings, "STEP_DAYS") {
            Some(_) => Some(setting_usize(settings, "STEP_DAYS", 0, 1)?),
            None => None,
        };

        let monte_carlo = MonteCarloConfig {
            iterations: setting_usize(settings, "MC_ITERATIONS", 1000, 1)?,
            mode: ResampleMode::parse(optional_setting(settings, "MC_MODE").unwrap_or("permutation"))?,
            ..MonteCarloConfig::default()
        };

        let genetic = GeneticConfig {
            population_size: setting_usize(settings, "GA_POPULATION_SIZE", 50, 2)?,
            generations: setting_usize(settings, "GA_GENERATIONS", 20, 1)?,
            mutation_rate: setting_f64(settings, "GA_MUTATION_RATE", 0.2, Some(0.0), Some(1.0))?,
            ..GeneticConfig::default()
        };

        let defaults = GridSpace::default();
        let grid = GridSpace {
            stop_atr: setting_f64_list(settings, "GRID_STOP_ATR", defaults.stop_atr)?,
            tp1_atr: setting_f64_list(settings, "GRID_TP1_ATR", defaults.tp1_atr)?,
            tp2_atr: setting_f64_list(settings, "GRID_TP2_ATR", defaults.tp2_atr)?,
            tp3_atr: setting_f64_list(settings, "GRID_TP3_ATR", defaults.tp3_atr)?,
            risk_percent: setting_f64_list(settings, "GRID_RISK_PERCENT", defaults.risk_percent)?,
            min_confluence: setting_f64_list(settings, "GRID_MIN_CONFLUENCE", Vec::new())?
                .into_iter()
                .map(|value| value.round().max(0.0) as u32)
                .collect(),
        };

        Ok(Self {
            backtest: BacktestSettings {
                symbol,
                timeframe,
                start_balance,
                risk: RiskConfig {
                    risk_fraction: risk_percent / 100.0,
                    max_position_cap,
                    slippage_rate: slippage_percent / 100.0,
                    fee_rate: fee_percent / 100.0,
                },
                window: WindowConfig {
                    policy,
                    min_window,
                    max_window,
                    skip_ahead,
                    lookahead,
                },
                time_filter,
            },
            lookback_days,
            walk_forward: WalkForwardSettings {
                training_days,
                testing_days,
                step_days,
            },
            monte_carlo,
            genetic,
            grid,
        })
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn setting_bool(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}

fn setting_f64_list(
    settings: &HashMap<String, String>,
    key: &str,
    default: Vec<f64>,
) -> Result<Vec<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let trimmed = raw.trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = entry
            .parse::<f64>()
            .map_err(|_| anyhow!("Setting {} must be a list of numbers (value: {})", key, raw))?;
        if !value.is_finite() {
            return Err(anyhow!(
                "Setting {} must contain only finite numbers (value: {})",
                key,
                raw
            ));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(anyhow!(
            "Setting {} must contain at least one number (value: {})",
            key,
            raw
        ));
    }

    Ok(values)
}
