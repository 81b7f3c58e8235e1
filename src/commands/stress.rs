use crate::backtester::BacktestDriver;
use crate::context::RunContext;
use crate::export::save_json;
use crate::strategy::{create_signal_source, SignalSource};
use crate::stress::{run_stress_test, MIN_SUBSET_BARS};
use anyhow::Result;
use std::path::Path;

pub fn run(
    ctx: &RunContext,
    strategy: &str,
    overrides: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let profile = ctx.profile(strategy)?;
    let params = ctx.parameters_for(profile, overrides)?;
    let source = create_signal_source(profile, &params);
    let data = ctx.data_for(profile);
    ctx.ensure_history(&data, source.min_history())?;

    let driver = BacktestDriver::new(ctx.backtest_settings(profile, &params));
    let analysis = run_stress_test(&driver, data.candles(), &source);

    let subset = |value: Option<f64>, bars: usize| match value {
        Some(ret) => format!("{:.2}% ({} bars)", ret, bars),
        None => format!("skipped ({} bars, need more than {})", bars, MIN_SUBSET_BARS),
    };
    println!("\n=== STRESS TEST: {} ===\n", profile.name);
    println!("  Crash (-30%): {:.2}%", analysis.crash_scenario_return);
    println!("  Rally (+50%): {:.2}%", analysis.rally_scenario_return);
    println!(
        "  High volatility: {}",
        subset(analysis.high_volatility_return, analysis.high_volatility_bars)
    );
    println!(
        "  Low volatility: {}",
        subset(analysis.low_volatility_return, analysis.low_volatility_bars)
    );

    if let Some(path) = output {
        save_json(path, &analysis)?;
    }
    Ok(())
}
