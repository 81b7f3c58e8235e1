use crate::backtester::ProfileOracle;
use crate::context::RunContext;
use crate::export::save_json;
use crate::genetic::{print_report, GeneticOptimizer};
use crate::optimizer_status::OptimizerStatus;
use crate::strategy::{create_signal_source, SignalSource};
use anyhow::Result;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

pub fn run(ctx: &RunContext, strategy: &str, seed: u64, output: Option<&Path>) -> Result<()> {
    let profile = ctx.profile(strategy)?;
    let data = ctx.data_for(profile);
    ctx.ensure_history(&data, create_signal_source(profile, &profile.defaults).min_history())?;
    let config = ctx.settings.genetic;
    info!(
        "Evolving {}: population {}, generations {}, mutation rate {:.2}, seed {}",
        profile.name, config.population_size, config.generations, config.mutation_rate, seed
    );

    let oracle = ProfileOracle::new(profile, data.candles(), &ctx.profile_settings(profile));
    let optimizer = GeneticOptimizer::new(config, &oracle, OptimizerStatus::new());
    let mut rng = StdRng::seed_from_u64(seed);
    let report = optimizer.evolve(profile.name, profile.defaults, &mut rng);
    print_report(&report);

    if let Some(path) = output {
        save_json(path, &report)?;
        info!("Genetic optimization report saved to {}", path.display());
    }
    Ok(())
}
