use crate::config::ParameterBounds;
use crate::models::ParameterSet;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParameterOverrideError {
    #[error("parameter override '{0}' must look like key=value")]
    MissingSeparator(String),
    #[error("unknown parameter '{0}' (expected stopAtr, tp1Atr, tp2Atr, tp3Atr, riskPercent or minConfluence)")]
    UnknownKey(String),
    #[error("parameter '{key}' must be a finite number (value: {value})")]
    InvalidValue { key: String, value: String },
}

/// Clamp a raw parameter value to bounds with a finite check
pub fn clamp_f64(value: f64, default: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return default;
    }
    value.clamp(min, max)
}

/// Get a parameter value with a default fallback
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

fn canonical_key(raw: &str) -> Option<&'static str> {
    let normalized: String = raw
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "stopatr" | "stop" => Some("stopAtr"),
        "tp1atr" | "tp1" => Some("tp1Atr"),
        "tp2atr" | "tp2" => Some("tp2Atr"),
        "tp3atr" | "tp3" => Some("tp3Atr"),
        "riskpercent" | "risk" => Some("riskPercent"),
        "minconfluence" | "confluence" => Some("minConfluence"),
        _ => None,
    }
}

/// Parse `key=value` pairs into canonical parameter names.
pub fn parse_parameter_overrides<S: AsRef<str>>(
    pairs: &[S],
) -> Result<HashMap<String, f64>, ParameterOverrideError> {
    let mut overrides = HashMap::new();
    for pair in pairs {
        let pair = pair.as_ref().trim();
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = pair
            .split_once('=')
            .ok_or_else(|| ParameterOverrideError::MissingSeparator(pair.to_string()))?;
        let key = canonical_key(raw_key.trim())
            .ok_or_else(|| ParameterOverrideError::UnknownKey(raw_key.trim().to_string()))?;
        let value = raw_value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParameterOverrideError::InvalidValue {
                key: key.to_string(),
                value: raw_value.trim().to_string(),
            })?;
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}

pub fn apply_overrides(base: ParameterSet, overrides: &HashMap<String, f64>) -> ParameterSet {
    ParameterSet {
        stop_atr: get_param(overrides, "stopAtr", base.stop_atr),
        tp1_atr: get_param(overrides, "tp1Atr", base.tp1_atr),
        tp2_atr: get_param(overrides, "tp2Atr", base.tp2_atr),
        tp3_atr: get_param(overrides, "tp3Atr", base.tp3_atr),
        risk_percent: get_param(overrides, "riskPercent", base.risk_percent),
        min_confluence: overrides
            .get("minConfluence")
            .map(|v| v.round().max(0.0) as u32)
            .unwrap_or(base.min_confluence),
    }
}

/// Clamp parameter values to their defined bounds
pub fn clamp_to_bounds(params: &mut ParameterSet, bounds: &ParameterBounds) {
    params.stop_atr = bounds.stop_atr.clamp(params.stop_atr);
    params.tp1_atr = bounds.tp1_atr.clamp(params.tp1_atr);
    params.tp2_atr = bounds.tp2_atr.clamp(params.tp2_atr);
    params.tp3_atr = bounds.tp3_atr.clamp(params.tp3_atr);
    params.risk_percent = bounds.risk_percent.clamp(params.risk_percent);
    params.min_confluence = bounds
        .min_confluence
        .clamp(params.min_confluence as f64)
        .round() as u32;
}

/// Sort the take-profit multiples so tier order survives crossover and
/// mutation, then re-apply bounds. The result may still have equal tiers.
pub fn repair_target_order(params: &mut ParameterSet, bounds: &ParameterBounds) {
    if params.has_increasing_targets() {
        return;
    }
    let mut targets = params.target_multiples();
    targets.sort_by(|a, b| a.total_cmp(b));
    params.tp1_atr = targets[0];
    params.tp2_atr = targets[1];
    params.tp3_atr = targets[2];
    clamp_to_bounds(params, bounds);
}

pub fn parameter_signature(params: &ParameterSet) -> String {
    format!(
        "{:.6}|{:.6}|{:.6}|{:.6}|{:.6}|{}",
        params.stop_atr,
        params.tp1_atr,
        params.tp2_atr,
        params.tp3_atr,
        params.risk_percent,
        params.min_confluence
    )
}
