use crate::context::RunContext;
use crate::export::save_json;
use crate::strategy::create_signal_source;
use crate::walk_forward::WalkForwardAnalyzer;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(
    ctx: &RunContext,
    strategy: &str,
    overrides: &[String],
    output: Option<&Path>,
    trades_csv: Option<&Path>,
) -> Result<()> {
    let profile = ctx.profile(strategy)?;
    let params = ctx.parameters_for(profile, overrides)?;
    let source = create_signal_source(profile, &params);
    let data = ctx.data_for(profile);
    let analyzer =
        WalkForwardAnalyzer::from_days(ctx.backtest_settings(profile, &params), &ctx.settings.walk_forward);
    info!(
        "Walk-forward for {}: train {} bars, test {} bars, step {} bars",
        profile.name,
        analyzer.train_len(),
        analyzer.test_len(),
        analyzer.step()
    );

    let analysis = analyzer.analyze(data.candles(), &source)?;

    println!("\n=== WALK-FORWARD: {} ===\n", profile.name);
    for period in &analysis.periods {
        println!(
            "  Period {:>3}: test [{}, {}) {:>4} trades | win {:>6.2}% (in-sample {:>6.2}%) | return {:>7.2}% | balance {:.2}",
            period.period,
            period.test_start,
            period.test_end,
            period.total_trades,
            period.win_rate,
            period.in_sample_win_rate,
            period.return_percent,
            period.ending_balance
        );
    }
    println!();
    println!("  In-sample win rate: {:.2}%", analysis.in_sample_win_rate);
    println!("  Out-of-sample win rate: {:.2}%", analysis.out_of_sample_win_rate);
    println!("  Overfitting score: {:.2}", analysis.overfitting_score);
    println!("  Consistency: {:.2}", analysis.consistency);
    println!(
        "  Balance: {:.2} -> {:.2}",
        analysis.starting_balance, analysis.final_balance
    );

    if let Some(path) = trades_csv {
        crate::export::save_trades_csv(path, &analysis.combined.trades)?;
    }
    if let Some(path) = output {
        save_json(path, &analysis)?;
        info!("Walk-forward results saved to {}", path.display());
    }
    Ok(())
}
