use crate::backtester::BacktestDriver;
use crate::context::RunContext;
use crate::export::{save_json, save_trades_csv};
use crate::models::{AdvancedMetrics, BacktestRun};
use crate::performance::PerformanceCalculator;
use crate::signal_cache::SignalCache;
use crate::strategy::{create_signal_source, SignalSource};
use anyhow::Result;
use log::info;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BacktestOutput<'a> {
    run: &'a BacktestRun,
    metrics: &'a AdvancedMetrics,
}

pub fn run(
    ctx: &RunContext,
    strategy: &str,
    overrides: &[String],
    dedupe: bool,
    output: Option<&Path>,
    trades_csv: Option<&Path>,
) -> Result<()> {
    let profile = ctx.profile(strategy)?;
    let params = ctx.parameters_for(profile, overrides)?;
    let source = create_signal_source(profile, &params);
    let data = ctx.data_for(profile);
    ctx.ensure_history(&data, source.min_history())?;
    info!("Backtesting {} with {}", profile.name, params.describe());

    let driver = BacktestDriver::new(ctx.backtest_settings(profile, &params));
    let cache = dedupe.then(SignalCache::new);
    let run = driver.run_with_cache(data.candles(), &source, cache.as_ref());
    let metrics = PerformanceCalculator::advanced_metrics(&run);

    print_run_summary(&run);
    print_advanced_metrics(&metrics);

    if let Some(path) = trades_csv {
        save_trades_csv(path, &run.trades)?;
        info!("Wrote {} trades to {}", run.trades.len(), path.display());
    }
    if let Some(path) = output {
        save_json(
            path,
            &BacktestOutput {
                run: &run,
                metrics: &metrics,
            },
        )?;
        info!("Backtest results saved to {}", path.display());
    }
    Ok(())
}

pub fn print_run_summary(run: &BacktestRun) {
    println!(
        "\n=== BACKTEST: {} on {} ({}) ===\n",
        run.strategy, run.symbol, run.timeframe
    );
    println!("  Start balance: {:.2}", run.start_balance);
    println!("  Final balance: {:.2}", run.final_balance);
    println!("  Return: {:.2}%", run.return_percent);
    println!(
        "  Trades: {} ({} won, {} lost)",
        run.total_trades, run.winning_trades, run.losing_trades
    );
    println!("  Win rate: {:.2}%", run.win_rate);
    println!("  Profit factor: {:.2}", run.profit_factor);
    println!("  Average RR: {:.2}", run.average_rr);
    println!("  Max drawdown: {:.2}%", run.max_drawdown_percent());
    println!(
        "  Signals: {} generated, {} discarded",
        run.signals_generated, run.signals_discarded
    );
    for (reason, count) in &run.exit_reasons {
        println!("    {}: {}", reason, count);
    }
}

fn print_advanced_metrics(metrics: &AdvancedMetrics) {
    println!();
    println!(
        "  Largest win / loss: {:.2} / {:.2}",
        metrics.largest_win, metrics.largest_loss
    );
    println!(
        "  Average win / loss: {:.2} / {:.2}",
        metrics.average_win, metrics.average_loss
    );
    println!(
        "  Streaks: {} wins, {} losses",
        metrics.max_win_streak, metrics.max_loss_streak
    );
    println!("  Expectancy: {:.2}", metrics.expectancy_per_trade);
    println!(
        "  Sharpe {:.2} | Sortino {:.2} | Calmar {:.2} | Recovery {:.2}",
        metrics.sharpe_ratio, metrics.sortino_ratio, metrics.calmar_ratio, metrics.recovery_factor
    );
    println!("  Average bars held: {:.1}", metrics.average_bars_held);
}
