use crate::models::*;
use crate::registry::{find_profile, SignalKind, StrategyProfile};
use anyhow::Result;

/// Pluggable signal logic. Implementations see only the historical window
/// (the last candle is the most recent closed bar) and never the future.
pub trait SignalSource {
    fn name(&self) -> &str;
    fn generate_signal(&self, window: &[Candle], timeframe: &str) -> Option<Signal>;
    /// Smallest window the source can evaluate.
    fn min_history(&self) -> usize;
}

impl<T: SignalSource + ?Sized> SignalSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate_signal(&self, window: &[Candle], timeframe: &str) -> Option<Signal> {
        (**self).generate_signal(window, timeframe)
    }

    fn min_history(&self) -> usize {
        (**self).min_history()
    }
}

#[path = "strategies/trend.rs"]
pub mod trend;

pub use trend::TrendFollowingSource;

#[path = "strategies/breakout.rs"]
pub mod breakout;

pub use breakout::BreakoutSource;

#[path = "strategies/reversion.rs"]
pub mod reversion;

pub use reversion::MeanReversionSource;

pub fn create_signal_source(
    profile: &StrategyProfile,
    params: &ParameterSet,
) -> Box<dyn SignalSource + Send + Sync> {
    let name = profile.name.to_string();
    match profile.kind {
        SignalKind::Trend => Box::new(TrendFollowingSource::new(name, *params, profile.exit_tier)),
        SignalKind::Breakout => Box::new(BreakoutSource::new(name, *params, profile.exit_tier)),
        SignalKind::Reversion => {
            Box::new(MeanReversionSource::new(name, *params, profile.exit_tier))
        }
    }
}

/// Look up a registered strategy and build its signal source, falling back
/// to the profile defaults when no parameters are supplied.
pub fn create_strategy(
    name: &str,
    params: Option<&ParameterSet>,
) -> Result<Box<dyn SignalSource + Send + Sync>> {
    let profile =
        find_profile(name).ok_or_else(|| anyhow::anyhow!("Unknown strategy: {}", name))?;
    Ok(create_signal_source(profile, params.unwrap_or(&profile.defaults)))
}
