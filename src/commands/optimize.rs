use crate::context::RunContext;
use crate::optimizer::{print_results, save_report, GridSearchOptimizer};
use crate::optimizer_status::OptimizerStatus;
use crate::registry::{StrategyProfile, STRATEGY_PROFILES};
use crate::strategy::{create_signal_source, SignalSource};
use anyhow::Result;
use log::info;
use std::path::Path;

/// Grid search over one or more strategies; no names means every profile.
pub fn run(ctx: &RunContext, strategies: &[String], output: Option<&Path>) -> Result<()> {
    let profiles: Vec<&'static StrategyProfile> = if strategies.is_empty() {
        STRATEGY_PROFILES.iter().collect()
    } else {
        strategies
            .iter()
            .map(|name| ctx.profile(name))
            .collect::<Result<_>>()?
    };
    info!(
        "Received optimize command for {} strateg{} on {} candles",
        profiles.len(),
        if profiles.len() == 1 { "y" } else { "ies" },
        ctx.data.len()
    );

    let mut optimizer = GridSearchOptimizer::new(
        ctx.data.candles_arc(),
        ctx.settings.backtest.clone(),
        ctx.settings.grid.clone(),
        OptimizerStatus::new(),
    );
    for &profile in &profiles {
        let data = ctx.data_for(profile);
        ctx.ensure_history(&data, create_signal_source(profile, &profile.defaults).min_history())?;
        optimizer =
            optimizer.with_profile_input(profile.name, data.candles_arc(), ctx.profile_settings(profile));
    }
    let report = optimizer.optimize(&profiles)?;
    print_results(&report);

    if let Some(path) = output {
        save_report(&report, path)?;
    }
    Ok(())
}
