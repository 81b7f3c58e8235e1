use crate::models::ParameterSet;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Trend,
    Breakout,
    Reversion,
}

impl SignalKind {
    pub fn label(self) -> &'static str {
        match self {
            SignalKind::Trend => "trend",
            SignalKind::Breakout => "breakout",
            SignalKind::Reversion => "reversion",
        }
    }
}

/// A named strategy: which signal logic it uses, where it trades and the
/// parameter set it starts from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub timeframe: &'static str,
    pub lookback_days: usize,
    pub kind: SignalKind,
    /// One-based take-profit tier that carries the position's allocation.
    pub exit_tier: u8,
    pub defaults: ParameterSet,
}

const fn params(
    stop_atr: f64,
    tp1_atr: f64,
    tp2_atr: f64,
    tp3_atr: f64,
    risk_percent: f64,
    min_confluence: u32,
) -> ParameterSet {
    ParameterSet {
        stop_atr,
        tp1_atr,
        tp2_atr,
        tp3_atr,
        risk_percent,
        min_confluence,
    }
}

pub static STRATEGY_PROFILES: [StrategyProfile; 10] = [
    StrategyProfile {
        name: "session_trader",
        description: "Trend pullbacks during the active session",
        timeframe: "15m",
        lookback_days: 180,
        kind: SignalKind::Trend,
        exit_tier: 1,
        defaults: params(1.0, 2.0, 3.0, 5.0, 1.0, 3),
    },
    StrategyProfile {
        name: "breakout_master",
        description: "Range breakouts with volume expansion",
        timeframe: "1h",
        lookback_days: 180,
        kind: SignalKind::Breakout,
        exit_tier: 2,
        defaults: params(1.25, 2.5, 4.0, 6.0, 1.0, 3),
    },
    StrategyProfile {
        name: "liquidity_hunter",
        description: "Fades stop runs below recent lows and above recent highs",
        timeframe: "15m",
        lookback_days: 180,
        kind: SignalKind::Reversion,
        exit_tier: 1,
        defaults: params(0.75, 2.0, 3.0, 5.0, 1.0, 3),
    },
    StrategyProfile {
        name: "trend_rider",
        description: "Holds aligned EMA trends for the far target",
        timeframe: "4h",
        lookback_days: 365,
        kind: SignalKind::Trend,
        exit_tier: 3,
        defaults: params(1.5, 3.0, 5.0, 10.0, 1.0, 3),
    },
    StrategyProfile {
        name: "range_master",
        description: "Mean reversion inside established ranges",
        timeframe: "1h",
        lookback_days: 180,
        kind: SignalKind::Reversion,
        exit_tier: 1,
        defaults: params(1.0, 2.0, 3.0, 5.0, 1.0, 3),
    },
    StrategyProfile {
        name: "smart_money_tracker",
        description: "Trend continuation after discounted pullbacks",
        timeframe: "1h",
        lookback_days: 180,
        kind: SignalKind::Trend,
        exit_tier: 2,
        defaults: params(1.0, 2.5, 4.0, 7.5, 1.0, 4),
    },
    StrategyProfile {
        name: "institutional_follower",
        description: "Higher-timeframe trend with volume confirmation",
        timeframe: "4h",
        lookback_days: 365,
        kind: SignalKind::Trend,
        exit_tier: 2,
        defaults: params(1.25, 2.5, 4.5, 7.5, 1.0, 4),
    },
    StrategyProfile {
        name: "reversal_sniper",
        description: "Exhaustion reversals at RSI extremes",
        timeframe: "15m",
        lookback_days: 180,
        kind: SignalKind::Reversion,
        exit_tier: 2,
        defaults: params(1.0, 2.5, 4.0, 6.0, 1.0, 4),
    },
    StrategyProfile {
        name: "momentum_beast",
        description: "Momentum breakouts taken at the first target",
        timeframe: "1h",
        lookback_days: 180,
        kind: SignalKind::Breakout,
        exit_tier: 1,
        defaults: params(1.0, 2.0, 3.0, 5.0, 1.5, 3),
    },
    StrategyProfile {
        name: "scalper_pro",
        description: "Fast intraday breakouts",
        timeframe: "5m",
        lookback_days: 30,
        kind: SignalKind::Breakout,
        exit_tier: 1,
        defaults: params(0.5, 2.0, 3.0, 5.0, 0.5, 3),
    },
];

pub fn find_profile(name: &str) -> Option<&'static StrategyProfile> {
    let needle = name.trim();
    STRATEGY_PROFILES
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(needle))
}

pub fn profile_names() -> Vec<&'static str> {
    STRATEGY_PROFILES.iter().map(|profile| profile.name).collect()
}

pub fn default_parameters(name: &str) -> Option<ParameterSet> {
    find_profile(name).map(|profile| profile.defaults)
}
