use crate::backtester::{BacktestOracle, ProfileOracle};
use crate::config::{BacktestSettings, GridSpace};
use crate::models::{
    BacktestRun, Candle, GridCandidate, OptimizationReport, ParameterSet, StrategyOptimization,
};
use crate::optimizer_status::OptimizerStatus;
use crate::registry::StrategyProfile;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub const VIABLE_MIN_WIN_RATE: f64 = 40.0;
pub const VIABLE_MAX_DRAWDOWN_PERCENT: f64 = 40.0;
pub const VIABLE_MIN_TRADES: usize = 5;

/// Grid objective. Losing runs score zero outright.
pub fn score(run: &BacktestRun) -> f64 {
    if run.return_percent < 0.0 {
        return 0.0;
    }
    let value = 2.0 * run.return_percent + 20.0 * run.profit_factor + run.win_rate
        - 3.0 * run.max_drawdown_percent()
        + 2.0 * run.winning_trades as f64
        + 0.2 * run.total_trades as f64;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn is_viable(run: &BacktestRun) -> bool {
    run.return_percent > 0.0
        && run.profit_factor > 1.0
        && run.win_rate >= VIABLE_MIN_WIN_RATE
        && run.max_drawdown_percent() <= VIABLE_MAX_DRAWDOWN_PERCENT
        && run.total_trades >= VIABLE_MIN_TRADES
}

/// Cartesian product of the grid in stop, tp1, tp2, tp3, risk, confluence
/// order. Combinations whose targets are not strictly increasing are counted
/// and dropped.
pub fn enumerate_combinations(grid: &GridSpace, default_confluence: u32) -> (Vec<ParameterSet>, usize) {
    let confluence: Vec<u32> = if grid.min_confluence.is_empty() {
        vec![default_confluence]
    } else {
        grid.min_confluence.clone()
    };
    let mut combinations = Vec::new();
    let mut skipped = 0usize;

    for &stop_atr in &grid.stop_atr {
        for &tp1_atr in &grid.tp1_atr {
            for &tp2_atr in &grid.tp2_atr {
                for &tp3_atr in &grid.tp3_atr {
                    for &risk_percent in &grid.risk_percent {
                        for &min_confluence in &confluence {
                            let params = ParameterSet {
                                stop_atr,
                                tp1_atr,
                                tp2_atr,
                                tp3_atr,
                                risk_percent,
                                min_confluence,
                            };
                            if params.has_increasing_targets() {
                                combinations.push(params);
                            } else {
                                skipped += 1;
                            }
                        }
                    }
                }
            }
        }
    }
    (combinations, skipped)
}

fn candidate(params: ParameterSet, run: &BacktestRun) -> GridCandidate {
    GridCandidate {
        params,
        score: score(run),
        viable: is_viable(run),
        total_trades: run.total_trades,
        winning_trades: run.winning_trades,
        win_rate: run.win_rate,
        profit_factor: run.profit_factor,
        return_percent: run.return_percent,
        max_drawdown_percent: run.max_drawdown_percent(),
    }
}

struct Leader {
    index: usize,
    candidate: GridCandidate,
    run: BacktestRun,
}

impl Leader {
    /// Higher score wins; equal scores go to the earlier combination so the
    /// outcome does not depend on worker completion order.
    fn beaten_by(&self, index: usize, score: f64) -> bool {
        score > self.candidate.score || (score == self.candidate.score && index < self.index)
    }
}

/// Running best-of for one strategy's grid.
struct GridAccumulator {
    strategy: String,
    timeframe: String,
    total_tests: usize,
    skipped: usize,
    cancelled: bool,
    best_viable: Option<Leader>,
    best_overall: Option<Leader>,
}

impl GridAccumulator {
    fn new(strategy: &str, timeframe: &str, skipped: usize) -> Self {
        Self {
            strategy: strategy.to_string(),
            timeframe: timeframe.to_string(),
            total_tests: 0,
            skipped,
            cancelled: false,
            best_viable: None,
            best_overall: None,
        }
    }

    fn offer(&mut self, index: usize, params: ParameterSet, run: BacktestRun) {
        self.total_tests += 1;
        let candidate = candidate(params, &run);
        if candidate.viable
            && self
                .best_viable
                .as_ref()
                .map_or(true, |leader| leader.beaten_by(index, candidate.score))
        {
            self.best_viable = Some(Leader {
                index,
                candidate: candidate.clone(),
                run: run.clone(),
            });
        }
        if self
            .best_overall
            .as_ref()
            .map_or(true, |leader| leader.beaten_by(index, candidate.score))
        {
            self.best_overall = Some(Leader {
                index,
                candidate,
                run,
            });
        }
    }

    fn finish(self, duration_seconds: f64) -> StrategyOptimization {
        let best_run = self
            .best_viable
            .as_ref()
            .or(self.best_overall.as_ref())
            .map(|leader| leader.run.clone());
        StrategyOptimization {
            strategy: self.strategy,
            timeframe: self.timeframe,
            total_tests: self.total_tests,
            skipped_combinations: self.skipped,
            best_viable: self.best_viable.map(|leader| leader.candidate),
            best_overall: self.best_overall.map(|leader| leader.candidate),
            best_run,
            cancelled: self.cancelled,
            duration_seconds,
        }
    }
}

/// Exhaustive search for one strategy on the calling thread. The status is
/// checked before every combination.
pub fn grid_search<O: BacktestOracle + ?Sized>(
    strategy: &str,
    timeframe: &str,
    combinations: &[ParameterSet],
    skipped: usize,
    oracle: &O,
    status: &OptimizerStatus,
) -> StrategyOptimization {
    let started = Instant::now();
    let mut acc = GridAccumulator::new(strategy, timeframe, skipped);
    for (index, params) in combinations.iter().enumerate() {
        if status.is_cancelled() {
            acc.cancelled = true;
            break;
        }
        match oracle.evaluate(params) {
            Some(run) => acc.offer(index, *params, run),
            None => acc.skipped += 1,
        }
    }
    acc.finish(started.elapsed().as_secs_f64())
}

struct GridTask {
    strategy_index: usize,
    combination_index: usize,
    params: ParameterSet,
}

struct GridTaskResult {
    strategy_index: usize,
    combination_index: usize,
    params: ParameterSet,
    run: Option<BacktestRun>,
    cancelled: bool,
}

/// Candles and settings one strategy is searched on.
#[derive(Clone)]
struct SearchInput {
    candles: Arc<Vec<Candle>>,
    settings: BacktestSettings,
}

/// Runs the grid for several strategies on a shared worker pool. Each worker
/// owns its accumulators per task; results are merged on the calling thread.
pub struct GridSearchOptimizer {
    candles: Arc<Vec<Candle>>,
    settings: BacktestSettings,
    per_profile: HashMap<&'static str, SearchInput>,
    grid: GridSpace,
    status: OptimizerStatus,
    show_progress: bool,
}

impl GridSearchOptimizer {
    pub fn new(
        candles: Arc<Vec<Candle>>,
        settings: BacktestSettings,
        grid: GridSpace,
        status: OptimizerStatus,
    ) -> Self {
        Self {
            candles,
            settings,
            per_profile: HashMap::new(),
            grid,
            status,
            show_progress: true,
        }
    }

    /// Searches `profile` on its own candles and settings instead of the
    /// shared ones.
    pub fn with_profile_input(
        mut self,
        profile: &'static str,
        candles: Arc<Vec<Candle>>,
        settings: BacktestSettings,
    ) -> Self {
        self.per_profile
            .insert(profile, SearchInput { candles, settings });
        self
    }

    fn input_for(&self, profile: &StrategyProfile) -> SearchInput {
        self.per_profile
            .get(profile.name)
            .cloned()
            .unwrap_or_else(|| SearchInput {
                candles: Arc::clone(&self.candles),
                settings: self.settings.clone(),
            })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    pub fn optimize(&self, profiles: &[&'static StrategyProfile]) -> Result<OptimizationReport> {
        if profiles.is_empty() {
            return Err(anyhow!("No strategies selected for optimization"));
        }
        let started = Instant::now();

        let inputs: Vec<SearchInput> = profiles.iter().map(|p| self.input_for(p)).collect();
        let mut accumulators = Vec::with_capacity(profiles.len());
        let mut tasks = Vec::new();
        for (strategy_index, profile) in profiles.iter().enumerate() {
            let (combinations, skipped) =
                enumerate_combinations(&self.grid, profile.defaults.min_confluence);
            info!(
                "{}: {} combinations ({} skipped for unordered targets)",
                profile.name,
                combinations.len(),
                skipped
            );
            accumulators.push(GridAccumulator::new(
                profile.name,
                &inputs[strategy_index].settings.timeframe,
                skipped,
            ));
            tasks.extend(combinations.into_iter().enumerate().map(
                |(combination_index, params)| GridTask {
                    strategy_index,
                    combination_index,
                    params,
                },
            ));
        }

        let task_count = tasks.len();
        info!("Running {} backtests...", task_count);
        self.status.set_phase("Grid search");
        self.status.set_progress(task_count, 0, 0);

        let results = self.run_parallel(profiles, &inputs, tasks)?;

        let mut completed = 0usize;
        let mut skipped = 0usize;
        for result in results {
            let acc = &mut accumulators[result.strategy_index];
            if result.cancelled {
                acc.cancelled = true;
                continue;
            }
            completed += 1;
            match result.run {
                Some(run) => {
                    self.status.offer_score(score(&run));
                    acc.offer(result.combination_index, result.params, run);
                }
                None => {
                    skipped += 1;
                    acc.skipped += 1;
                }
            }
        }
        self.status.set_progress(task_count, completed, skipped);

        let duration_seconds = started.elapsed().as_secs_f64();
        let results: Vec<StrategyOptimization> = accumulators
            .into_iter()
            .map(|acc| acc.finish(duration_seconds))
            .collect();
        let best_strategy = results
            .iter()
            .filter_map(|r| r.best().map(|c| (r.strategy.clone(), c.score)))
            .fold(None::<(String, f64)>, |best, (name, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((name, score)),
            })
            .map(|(name, _)| name);

        Ok(OptimizationReport {
            run_id: uuid::Uuid::new_v4(),
            generated_at: Utc::now(),
            symbol: self.settings.symbol.clone(),
            start_balance: self.settings.start_balance,
            results,
            best_strategy,
            duration_seconds,
        })
    }

    fn run_parallel(
        &self,
        profiles: &[&'static StrategyProfile],
        inputs: &[SearchInput],
        tasks: Vec<GridTask>,
    ) -> Result<Vec<GridTaskResult>> {
        let task_count = tasks.len();
        if task_count == 0 {
            return Ok(Vec::new());
        }

        let num_workers = std::cmp::min(task_count, std::cmp::max(1, num_cpus::get()));
        info!("Using {} worker threads", num_workers);

        let (tx, rx): (Sender<GridTask>, Receiver<GridTask>) = bounded(task_count);
        let (result_tx, result_rx): (Sender<GridTaskResult>, Receiver<GridTaskResult>) =
            bounded(task_count);

        let mut handles = Vec::new();
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let inputs = inputs.to_vec();
            let status = self.status.clone();
            let profiles: Vec<&'static StrategyProfile> = profiles.to_vec();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let cancelled = status.is_cancelled();
                    let run = if cancelled {
                        None
                    } else {
                        let profile = profiles[task.strategy_index];
                        let input = &inputs[task.strategy_index];
                        ProfileOracle::new(profile, input.candles.as_slice(), &input.settings)
                            .evaluate(&task.params)
                    };
                    let result = GridTaskResult {
                        strategy_index: task.strategy_index,
                        combination_index: task.combination_index,
                        params: task.params,
                        run,
                        cancelled,
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);

        for task in tasks {
            tx.send(task)?;
        }
        drop(tx);

        let pb = if self.show_progress {
            ProgressBar::new(task_count as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut results = Vec::with_capacity(task_count);
        while results.len() < task_count {
            match result_rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(result) => {
                    results.push(result);
                    pb.set_position(results.len() as u64);
                    if results.len() % 250 == 0 {
                        self.status.set_progress(task_count, results.len(), 0);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if self.status.is_cancelled() {
            pb.finish_with_message("Grid search cancelled");
        } else {
            pb.finish_with_message("Grid search completed");
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("A grid search worker panicked");
            }
        }
        Ok(results)
    }
}

pub fn save_report(report: &OptimizationReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write optimization report to {}", path.display()))?;
    info!("Optimization report saved to {}", path.display());
    Ok(())
}

pub fn print_results(report: &OptimizationReport) {
    println!("\n=== GRID SEARCH RESULTS ({}) ===\n", report.symbol);
    for result in &report.results {
        println!("Strategy: {} ({})", result.strategy, result.timeframe);
        println!(
            "  Tests: {} | Skipped: {}{}",
            result.total_tests,
            result.skipped_combinations,
            if result.cancelled { " | cancelled" } else { "" }
        );
        match result.best() {
            Some(best) => {
                println!("  Score: {:.2}{}", best.score, if best.viable { "" } else { " (not viable)" });
                println!("  Return: {:.2}%", best.return_percent);
                println!("  Win Rate: {:.2}%", best.win_rate);
                println!("  Profit Factor: {:.2}", best.profit_factor);
                println!("  Max Drawdown: {:.2}%", best.max_drawdown_percent);
                println!("  Trades: {} ({} winners)", best.total_trades, best.winning_trades);
                println!("  Parameters: {}", best.params.describe());
            }
            None => println!("  No results"),
        }
        println!();
    }
    if let Some(best) = &report.best_strategy {
        println!("Best strategy: {}", best);
    }
    println!("Duration: {:.1}s", report.duration_seconds);
}
