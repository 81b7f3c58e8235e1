use crate::backtester::BacktestOracle;
use crate::config::{GeneticConfig, ParameterBounds, ParameterRange};
use crate::models::{BacktestRun, GenerationStats, GeneticReport, ParameterSet, StrategyGene};
use crate::optimizer_status::OptimizerStatus;
use crate::param_utils::{clamp_to_bounds, parameter_signature, repair_target_order};
use dashmap::DashMap;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

const TOP_GENES: usize = 5;

/// Weighted blend of profit factor, win rate, drawdown and activity. Runs
/// with fewer than `min_trades` trades score zero.
pub fn fitness(run: &BacktestRun, min_trades: usize) -> f64 {
    if run.total_trades < min_trades {
        return 0.0;
    }
    let profit_score = (run.profit_factor * 20.0).min(100.0);
    let drawdown_score = (100.0 - run.max_drawdown_percent() * 5.0).max(0.0);
    let trade_score = (run.total_trades as f64 / 2.0).min(50.0);
    let value = 0.4 * profit_score + 0.3 * run.win_rate + 0.2 * drawdown_score + 0.1 * trade_score;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Mean pairwise distance, each pair measured as the mean absolute
/// difference across the six gene fields.
pub fn diversity(population: &[StrategyGene]) -> f64 {
    if population.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in population.iter().enumerate() {
        let va = a.params.as_vector();
        for b in &population[i + 1..] {
            let vb = b.params.as_vector();
            let distance: f64 =
                va.iter().zip(vb.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>() / va.len() as f64;
            total += distance;
            pairs += 1;
        }
    }
    total / pairs as f64
}

pub fn recommendation(best_fitness: f64) -> &'static str {
    if best_fitness > 80.0 {
        "Excellent - optimal parameters found"
    } else if best_fitness > 70.0 {
        "Good - strong parameters found"
    } else if best_fitness > 60.0 {
        "Moderate - decent parameters, room for improvement"
    } else {
        "Weak - consider a different strategy or more data"
    }
}

fn sample(rng: &mut StdRng, range: &ParameterRange) -> f64 {
    if range.max > range.min {
        rng.gen_range(range.min..=range.max)
    } else {
        range.min
    }
}

pub fn random_parameters(rng: &mut StdRng, bounds: &ParameterBounds) -> ParameterSet {
    let mut params = ParameterSet {
        stop_atr: sample(rng, &bounds.stop_atr),
        tp1_atr: sample(rng, &bounds.tp1_atr),
        tp2_atr: sample(rng, &bounds.tp2_atr),
        tp3_atr: sample(rng, &bounds.tp3_atr),
        risk_percent: sample(rng, &bounds.risk_percent),
        min_confluence: sample(rng, &bounds.min_confluence).round() as u32,
    };
    repair_target_order(&mut params, bounds);
    params
}

pub fn crossover(a: &ParameterSet, b: &ParameterSet) -> ParameterSet {
    ParameterSet {
        stop_atr: (a.stop_atr + b.stop_atr) / 2.0,
        tp1_atr: (a.tp1_atr + b.tp1_atr) / 2.0,
        tp2_atr: (a.tp2_atr + b.tp2_atr) / 2.0,
        tp3_atr: (a.tp3_atr + b.tp3_atr) / 2.0,
        risk_percent: (a.risk_percent + b.risk_percent) / 2.0,
        min_confluence: ((a.min_confluence + b.min_confluence) as f64 / 2.0).round() as u32,
    }
}

fn perturb(rng: &mut StdRng, value: f64, range: &ParameterRange) -> f64 {
    if range.step <= 0.0 {
        return value;
    }
    range.clamp(value + rng.gen_range(-range.step..=range.step))
}

/// Each field moves by at most its step with probability `rate`. The result
/// is clamped and its targets re-sorted.
pub fn mutate(rng: &mut StdRng, params: &mut ParameterSet, bounds: &ParameterBounds, rate: f64) {
    if rng.gen::<f64>() < rate {
        params.stop_atr = perturb(rng, params.stop_atr, &bounds.stop_atr);
    }
    if rng.gen::<f64>() < rate {
        params.tp1_atr = perturb(rng, params.tp1_atr, &bounds.tp1_atr);
    }
    if rng.gen::<f64>() < rate {
        params.tp2_atr = perturb(rng, params.tp2_atr, &bounds.tp2_atr);
    }
    if rng.gen::<f64>() < rate {
        params.tp3_atr = perturb(rng, params.tp3_atr, &bounds.tp3_atr);
    }
    if rng.gen::<f64>() < rate {
        params.risk_percent = perturb(rng, params.risk_percent, &bounds.risk_percent);
    }
    if rng.gen::<f64>() < rate {
        let moved = perturb(rng, params.min_confluence as f64, &bounds.min_confluence);
        params.min_confluence = moved.round() as u32;
    }
    clamp_to_bounds(params, bounds);
    repair_target_order(params, bounds);
}

#[derive(Debug, Clone, Copy)]
struct Evaluation {
    fitness: f64,
    total_trades: usize,
}

/// Evolves parameter sets for one strategy. Fitness lookups are memoized by
/// parameter signature, so elites carried into the next generation keep
/// their score without another backtest.
pub struct GeneticOptimizer<'a, O: BacktestOracle + ?Sized> {
    config: GeneticConfig,
    oracle: &'a O,
    status: OptimizerStatus,
    cache: DashMap<String, Evaluation>,
    evaluations: AtomicUsize,
}

impl<'a, O: BacktestOracle + ?Sized> GeneticOptimizer<'a, O> {
    pub fn new(config: GeneticConfig, oracle: &'a O, status: OptimizerStatus) -> Self {
        Self {
            config,
            oracle,
            status,
            cache: DashMap::new(),
            evaluations: AtomicUsize::new(0),
        }
    }

    fn evaluate(&self, params: &ParameterSet) -> Evaluation {
        let key = parameter_signature(params);
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }
        let evaluation = if params.is_valid() {
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            match self.oracle.evaluate(params) {
                Some(run) => Evaluation {
                    fitness: fitness(&run, self.config.min_trades),
                    total_trades: run.total_trades,
                },
                None => Evaluation {
                    fitness: 0.0,
                    total_trades: 0,
                },
            }
        } else {
            Evaluation {
                fitness: 0.0,
                total_trades: 0,
            }
        };
        self.cache.insert(key, evaluation);
        evaluation
    }

    fn evaluate_population(&self, population: &mut [StrategyGene]) {
        population.par_iter_mut().for_each(|gene| {
            let evaluation = self.evaluate(&gene.params);
            gene.fitness = evaluation.fitness;
            gene.total_trades = evaluation.total_trades;
        });
        // stable sort keeps earlier genes first on ties
        population.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
    }

    fn tournament<'p>(&self, rng: &mut StdRng, population: &'p [StrategyGene]) -> &'p StrategyGene {
        let mut best = &population[rng.gen_range(0..population.len())];
        for _ in 1..self.config.tournament_size.max(1) {
            let candidate = &population[rng.gen_range(0..population.len())];
            if candidate.fitness > best.fitness {
                best = candidate;
            }
        }
        best
    }

    fn elite_count(&self) -> usize {
        let size = self.config.population_size;
        ((size as f64 * self.config.elite_fraction) as usize).clamp(1, size.max(1))
    }

    /// Next generation from a population sorted by descending fitness.
    fn breed(&self, rng: &mut StdRng, population: &[StrategyGene]) -> Vec<StrategyGene> {
        let size = self.config.population_size;
        let mut next: Vec<StrategyGene> = population[..self.elite_count().min(population.len())].to_vec();
        while next.len() < size {
            let first = self.tournament(rng, population).params;
            let second = self.tournament(rng, population).params;
            let mut child = crossover(&first, &second);
            mutate(rng, &mut child, &self.config.bounds, self.config.mutation_rate);
            next.push(StrategyGene::new(child));
        }
        next
    }

    pub fn evolve(&self, strategy: &str, baseline: ParameterSet, rng: &mut StdRng) -> GeneticReport {
        let started = Instant::now();
        let size = self.config.population_size.max(1);
        let bounds = self.config.bounds;
        info!(
            "{}: evolving {} genes over {} generations",
            strategy, size, self.config.generations
        );

        let mut population: Vec<StrategyGene> = (0..size)
            .map(|_| StrategyGene::new(random_parameters(rng, &bounds)))
            .collect();
        let mut generations = Vec::with_capacity(self.config.generations);
        let mut cancelled = false;

        for generation in 0..self.config.generations.max(1) {
            self.status
                .set_phase(format!("{}: generation {}", strategy, generation + 1));
            self.evaluate_population(&mut population);

            let stats = GenerationStats {
                generation: generation + 1,
                best_fitness: population[0].fitness,
                average_fitness: population.iter().map(|g| g.fitness).sum::<f64>()
                    / population.len() as f64,
                diversity: diversity(&population),
            };
            debug!(
                "{} gen {}: best {:.2}, avg {:.2}, diversity {:.3}",
                strategy, stats.generation, stats.best_fitness, stats.average_fitness, stats.diversity
            );
            self.status.offer_score(stats.best_fitness);
            self.status
                .set_progress(self.config.generations, generation + 1, 0);
            generations.push(stats);

            if generation + 1 >= self.config.generations {
                break;
            }
            if self.status.is_cancelled() {
                info!("{}: evolution cancelled after generation {}", strategy, generation + 1);
                cancelled = true;
                break;
            }
            population = self.breed(rng, &population);
        }

        let mut top_genes: Vec<StrategyGene> = Vec::with_capacity(TOP_GENES);
        let mut seen = std::collections::HashSet::new();
        for gene in &population {
            if seen.insert(parameter_signature(&gene.params)) {
                top_genes.push(*gene);
            }
            if top_genes.len() == TOP_GENES {
                break;
            }
        }

        let best = population[0];
        let baseline_fitness = self.evaluate(&baseline).fitness;
        let improvement_percent = if baseline_fitness > 0.0 {
            (best.fitness - baseline_fitness) / baseline_fitness * 100.0
        } else {
            0.0
        };
        info!(
            "{}: best fitness {:.2} (baseline {:.2}, improvement {:.2}%)",
            strategy, best.fitness, baseline_fitness, improvement_percent
        );

        GeneticReport {
            strategy: strategy.to_string(),
            best,
            top_genes,
            baseline_fitness,
            improvement_percent,
            generations,
            total_evaluations: self.evaluations.load(Ordering::Relaxed),
            cancelled,
            recommendation: recommendation(best.fitness).to_string(),
            duration_seconds: started.elapsed().as_secs_f64(),
        }
    }
}

pub fn print_report(report: &GeneticReport) {
    println!("\n=== GENETIC OPTIMIZATION: {} ===\n", report.strategy);
    for stats in &report.generations {
        println!(
            "  Gen {:>3}: best {:>6.2} | avg {:>6.2} | diversity {:.3}",
            stats.generation, stats.best_fitness, stats.average_fitness, stats.diversity
        );
    }
    println!();
    println!("Top parameter sets:");
    for (rank, gene) in report.top_genes.iter().enumerate() {
        println!(
            "  {}. fitness {:.2} ({} trades) {}",
            rank + 1,
            gene.fitness,
            gene.total_trades,
            gene.params.describe()
        );
    }
    println!();
    println!("Baseline fitness: {:.2}", report.baseline_fitness);
    println!("Improvement: {:.2}%", report.improvement_percent);
    println!("Evaluations: {}", report.total_evaluations);
    if report.cancelled {
        println!("Stopped early: cancelled");
    }
    println!("Recommendation: {}", report.recommendation);
}
