use crate::backtester::BacktestDriver;
use crate::context::RunContext;
use crate::export::save_json;
use crate::monte_carlo::MonteCarloResampler;
use crate::strategy::{create_signal_source, SignalSource};
use anyhow::Result;
use log::{info, warn};
use std::path::Path;

pub fn run(
    ctx: &RunContext,
    strategy: &str,
    overrides: &[String],
    seed: u64,
    output: Option<&Path>,
) -> Result<()> {
    let profile = ctx.profile(strategy)?;
    let params = ctx.parameters_for(profile, overrides)?;
    let source = create_signal_source(profile, &params);
    let data = ctx.data_for(profile);
    ctx.ensure_history(&data, source.min_history())?;

    let driver = BacktestDriver::new(ctx.backtest_settings(profile, &params));
    let backtest = driver.run(data.candles(), &source);
    let config = ctx.settings.monte_carlo;
    if backtest.total_trades < config.min_trades {
        warn!(
            "{} produced {} trades; Monte Carlo needs at least {}",
            profile.name, backtest.total_trades, config.min_trades
        );
        return Ok(());
    }

    info!(
        "Resampling {} trades {} times ({:?}, seed {})",
        backtest.total_trades, config.iterations, config.mode, seed
    );
    let Some(analysis) =
        MonteCarloResampler::new(config, seed).resample(&backtest.trades, backtest.start_balance)
    else {
        warn!("Nothing to resample for {}", profile.name);
        return Ok(());
    };

    println!("\n=== MONTE CARLO: {} ({} iterations) ===\n", profile.name, analysis.iterations);
    println!("  Backtest return: {:.2}%", backtest.return_percent);
    println!("  Mean return: {:.2}%", analysis.mean_return);
    println!("  Median return: {:.2}%", analysis.median_return);
    println!("  Std deviation: {:.2}", analysis.std_deviation);
    println!(
        "  Worst / best: {:.2}% / {:.2}%",
        analysis.worst_case, analysis.best_case
    );
    println!(
        "  Percentiles 5/25/75/95: {:.2}% / {:.2}% / {:.2}% / {:.2}%",
        analysis.percentile_5, analysis.percentile_25, analysis.percentile_75, analysis.percentile_95
    );
    println!("  Probability of profit: {:.2}%", analysis.probability_profit);
    println!("  Probability of ruin: {:.2}%", analysis.probability_ruin);
    println!("  Mean final balance: {:.2}", analysis.mean_final_balance);

    if let Some(path) = output {
        save_json(path, &analysis)?;
        info!("Monte Carlo results saved to {}", path.display());
    }
    Ok(())
}
