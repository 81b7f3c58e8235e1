use crate::config::{MonteCarloConfig, ResampleMode};
use crate::models::{MonteCarloAnalysis, SimulatedTrade};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use statrs::statistics::Statistics;

/// Decorrelates per-iteration seeds derived from one base seed.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ReplayOutcome {
    return_percent: f64,
    final_balance: f64,
    ruined: bool,
}

/// Replays a run's trade profits in random orders. Iterations run in parallel,
/// each with its own generator seeded from `seed` and the iteration number, so
/// the result does not depend on scheduling.
pub struct MonteCarloResampler {
    config: MonteCarloConfig,
    seed: u64,
}

impl MonteCarloResampler {
    pub fn new(config: MonteCarloConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    pub fn resample(
        &self,
        trades: &[SimulatedTrade],
        start_balance: f64,
    ) -> Option<MonteCarloAnalysis> {
        let profits: Vec<f64> = trades.iter().map(|t| t.profit).collect();
        self.resample_profits(&profits, start_balance)
    }

    /// `None` when there is nothing to resample.
    pub fn resample_profits(&self, profits: &[f64], start_balance: f64) -> Option<MonteCarloAnalysis> {
        let iterations = self.config.iterations;
        if profits.is_empty() || iterations == 0 || !(start_balance > 0.0) {
            return None;
        }
        let ruin_level = start_balance * self.config.ruin_threshold;

        let outcomes: Vec<ReplayOutcome> = (0..iterations)
            .into_par_iter()
            .map(|iteration| {
                let mut rng =
                    StdRng::seed_from_u64(self.seed ^ (iteration as u64).wrapping_mul(SEED_STRIDE));
                let sequence = match self.config.mode {
                    ResampleMode::Permutation => {
                        let mut order = profits.to_vec();
                        order.shuffle(&mut rng);
                        order
                    }
                    ResampleMode::Bootstrap => (0..profits.len())
                        .map(|_| profits[rng.gen_range(0..profits.len())])
                        .collect(),
                };
                replay(&sequence, start_balance, ruin_level)
            })
            .collect();

        let mut returns: Vec<f64> = outcomes.iter().map(|o| o.return_percent).collect();
        returns.sort_by(|a, b| a.total_cmp(b));
        let profitable = outcomes.iter().filter(|o| o.return_percent > 0.0).count();
        let ruined = outcomes.iter().filter(|o| o.ruined).count();
        let mean_final_balance =
            outcomes.iter().map(|o| o.final_balance).sum::<f64>() / iterations as f64;

        let analysis = MonteCarloAnalysis {
            iterations,
            mean_return: returns.as_slice().mean(),
            median_return: returns[iterations / 2],
            std_deviation: returns.as_slice().population_std_dev(),
            best_case: returns[iterations - 1],
            worst_case: returns[0],
            percentile_5: percentile(&returns, 0.05),
            percentile_25: percentile(&returns, 0.25),
            percentile_75: percentile(&returns, 0.75),
            percentile_95: percentile(&returns, 0.95),
            probability_profit: profitable as f64 / iterations as f64 * 100.0,
            probability_ruin: ruined as f64 / iterations as f64 * 100.0,
            mean_final_balance,
        };
        debug!(
            "Monte Carlo: {} iterations, mean {:.2}%, ruin {:.2}%",
            iterations, analysis.mean_return, analysis.probability_ruin
        );
        Some(analysis)
    }
}

fn replay(profits: &[f64], start_balance: f64, ruin_level: f64) -> ReplayOutcome {
    let mut balance = start_balance;
    let mut ruined = false;
    for profit in profits {
        balance += profit;
        if balance < ruin_level {
            ruined = true;
        }
    }
    ReplayOutcome {
        return_percent: (balance - start_balance) / start_balance * 100.0,
        final_balance: balance,
        ruined,
    }
}

/// Value at floor(n * p) of an ascending slice, clamped to the last element.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}
