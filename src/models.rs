use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
    }

    pub fn scaled(&self, multiplier: f64) -> Candle {
        Candle {
            timestamp: self.timestamp,
            open: self.open * multiplier,
            high: self.high * multiplier,
            low: self.low * multiplier,
            close: self.close * multiplier,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Label used in per-trade exports.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeProfitTier {
    pub price: f64,
    pub allocation_percent: f64,
}

/// A proposed trade emitted by a signal source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub targets: Vec<TakeProfitTier>,
    pub confidence: f64,
    pub timeframe: String,
}

impl Signal {
    pub fn risk_distance(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    /// Tiers must sit on the profitable side of entry, each farther than the last.
    pub fn has_ordered_targets(&self) -> bool {
        if self.targets.is_empty() {
            return false;
        }
        let sign = self.direction.sign();
        let mut previous_distance = 0.0;
        for tier in &self.targets {
            let distance = (tier.price - self.entry) * sign;
            if !distance.is_finite() || distance <= previous_distance {
                return false;
            }
            previous_distance = distance;
        }
        true
    }

    pub fn stop_on_losing_side(&self) -> bool {
        (self.entry - self.stop_loss) * self.direction.sign() > 0.0
    }

    pub fn prices_are_finite(&self) -> bool {
        self.entry.is_finite()
            && self.stop_loss.is_finite()
            && self.targets.iter().all(|tier| tier.price.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    /// One-based take-profit tier number.
    Target(u8),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "Stop Loss"),
            ExitReason::TrailingStop => write!(f, "Trailing Stop"),
            ExitReason::Target(tier) => write!(f, "Target {} Hit", tier),
        }
    }
}

impl From<ExitReason> for String {
    fn from(reason: ExitReason) -> Self {
        reason.to_string()
    }
}

impl TryFrom<String> for ExitReason {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "Stop Loss" => Ok(ExitReason::StopLoss),
            "Trailing Stop" => Ok(ExitReason::TrailingStop),
            other => other
                .strip_prefix("Target ")
                .and_then(|rest| rest.strip_suffix(" Hit"))
                .and_then(|tier| tier.parse::<u8>().ok())
                .filter(|tier| *tier > 0)
                .map(ExitReason::Target)
                .ok_or_else(|| format!("Unknown exit reason: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedTrade {
    pub direction: Direction,
    pub signal_entry: f64,
    /// Fill price after slippage.
    pub entry: f64,
    pub exit: f64,
    pub stop_loss: f64,
    pub exit_reason: ExitReason,
    pub bars_held: usize,
    pub position_size: f64,
    pub risk_amount: f64,
    pub profit: f64,
    /// Profit relative to the amount put at risk.
    pub profit_percent: f64,
    pub risk_reward: f64,
    pub balance_after: f64,
    pub entry_index: usize,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl SimulatedTrade {
    pub fn is_win(&self) -> bool {
        self.profit > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRun {
    pub symbol: String,
    pub strategy: String,
    pub timeframe: String,
    pub start_balance: f64,
    pub final_balance: f64,
    pub peak_balance: f64,
    /// Largest peak-to-trough decline as a fraction of the peak.
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub total_loss: f64,
    pub net_profit: f64,
    pub return_percent: f64,
    pub profit_factor: f64,
    pub average_rr: f64,
    pub signals_generated: usize,
    pub signals_discarded: usize,
    pub trades: Vec<SimulatedTrade>,
    pub exit_reasons: BTreeMap<String, usize>,
}

impl BacktestRun {
    pub fn max_drawdown_percent(&self) -> f64 {
        self.max_drawdown * 100.0
    }
}

/// The tunable surface shared by both optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    pub stop_atr: f64,
    pub tp1_atr: f64,
    pub tp2_atr: f64,
    pub tp3_atr: f64,
    /// Percent of balance risked per trade (1.0 = 1%).
    pub risk_percent: f64,
    pub min_confluence: u32,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            stop_atr: 1.0,
            tp1_atr: 2.0,
            tp2_atr: 3.0,
            tp3_atr: 5.0,
            risk_percent: 2.0,
            min_confluence: 3,
        }
    }
}

impl ParameterSet {
    pub fn has_increasing_targets(&self) -> bool {
        self.tp1_atr < self.tp2_atr && self.tp2_atr < self.tp3_atr
    }

    pub fn is_valid(&self) -> bool {
        self.stop_atr.is_finite()
            && self.stop_atr > 0.0
            && self.tp1_atr > 0.0
            && self.has_increasing_targets()
            && self.risk_percent.is_finite()
            && self.risk_percent > 0.0
    }

    pub fn target_multiples(&self) -> [f64; 3] {
        [self.tp1_atr, self.tp2_atr, self.tp3_atr]
    }

    pub fn as_vector(&self) -> [f64; 6] {
        [
            self.stop_atr,
            self.tp1_atr,
            self.tp2_atr,
            self.tp3_atr,
            self.risk_percent,
            self.min_confluence as f64,
        ]
    }

    pub fn describe(&self) -> String {
        format!(
            "stop {:.2} ATR | TP {:.2}/{:.2}/{:.2} ATR | risk {:.2}% | confluence {}",
            self.stop_atr,
            self.tp1_atr,
            self.tp2_atr,
            self.tp3_atr,
            self.risk_percent,
            self.min_confluence
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyGene {
    pub params: ParameterSet,
    pub fitness: f64,
    pub total_trades: usize,
}

impl StrategyGene {
    pub fn new(params: ParameterSet) -> Self {
        Self {
            params,
            fitness: 0.0,
            total_trades: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub generation: usize,
    pub best_fitness: f64,
    pub average_fitness: f64,
    pub diversity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneticReport {
    pub strategy: String,
    pub best: StrategyGene,
    pub top_genes: Vec<StrategyGene>,
    pub baseline_fitness: f64,
    pub improvement_percent: f64,
    pub generations: Vec<GenerationStats>,
    pub total_evaluations: usize,
    pub cancelled: bool,
    pub recommendation: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardPeriod {
    pub period: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
    pub starting_balance: f64,
    pub ending_balance: f64,
    pub in_sample_win_rate: f64,
    pub win_rate: f64,
    pub return_percent: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardAnalysis {
    pub periods: Vec<WalkForwardPeriod>,
    pub in_sample_win_rate: f64,
    pub out_of_sample_win_rate: f64,
    pub overfitting_score: f64,
    pub consistency: f64,
    pub starting_balance: f64,
    pub final_balance: f64,
    /// Out-of-sample trades from every period, indices relative to the full series.
    pub combined: BacktestRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloAnalysis {
    pub iterations: usize,
    pub mean_return: f64,
    pub median_return: f64,
    pub std_deviation: f64,
    pub best_case: f64,
    pub worst_case: f64,
    pub percentile_5: f64,
    pub percentile_25: f64,
    pub percentile_75: f64,
    pub percentile_95: f64,
    pub probability_profit: f64,
    pub probability_ruin: f64,
    pub mean_final_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedMetrics {
    pub largest_win: f64,
    pub largest_loss: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub max_win_streak: usize,
    pub max_loss_streak: usize,
    pub expectancy_per_trade: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub recovery_factor: f64,
    pub average_bars_held: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestAnalysis {
    pub crash_scenario_return: f64,
    pub rally_scenario_return: f64,
    pub high_volatility_return: Option<f64>,
    pub low_volatility_return: Option<f64>,
    pub high_volatility_bars: usize,
    pub low_volatility_bars: usize,
}

/// Outcome of one grid-search evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCandidate {
    pub params: ParameterSet,
    pub score: f64,
    pub viable: bool,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub return_percent: f64,
    pub max_drawdown_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOptimization {
    pub strategy: String,
    pub timeframe: String,
    pub total_tests: usize,
    pub skipped_combinations: usize,
    pub best_viable: Option<GridCandidate>,
    pub best_overall: Option<GridCandidate>,
    pub best_run: Option<BacktestRun>,
    pub cancelled: bool,
    pub duration_seconds: f64,
}

impl StrategyOptimization {
    /// Best viable candidate, falling back to the unconstrained best.
    pub fn best(&self) -> Option<&GridCandidate> {
        self.best_viable.as_ref().or(self.best_overall.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub run_id: uuid::Uuid,
    pub generated_at: DateTime<Utc>,
    pub symbol: String,
    pub start_balance: f64,
    pub results: Vec<StrategyOptimization>,
    pub best_strategy: Option<String>,
    pub duration_seconds: f64,
}
