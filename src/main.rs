use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use tradesim::commands::{
    backtest, evolve, monte_carlo, optimize, snapshot, strategies, stress, walk_forward,
};
use tradesim::context::AppContext;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";
const DEFAULT_SEED: u64 = 42;

#[derive(Parser)]
#[command(name = "tradesim")]
#[command(about = "Backtesting, walk-forward, Monte Carlo and parameter search for ATR bracket strategies")]
struct Cli {
    /// KEY=VALUE settings file (environment variables take precedence)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,
    /// Symbol label for candle files that do not carry one
    #[arg(long, global = true)]
    symbol: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one strategy over the candle series
    Backtest {
        /// Strategy name from the registry
        #[arg(long)]
        strategy: String,
        /// Candle file (.json, .csv or bincode snapshot)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Parameter override such as stopAtr=1.25 (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Discard repeated signals for the same symbol and strategy
        #[arg(long)]
        dedupe: bool,
        /// Write the run and its metrics as JSON
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Write one CSV row per trade
        #[arg(long = "trades-csv", value_name = "PATH")]
        trades_csv: Option<PathBuf>,
    },
    /// Chained train/test evaluation over sliding periods
    WalkForward {
        #[arg(long)]
        strategy: String,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Write the combined out-of-sample trades as CSV
        #[arg(long = "trades-csv", value_name = "PATH")]
        trades_csv: Option<PathBuf>,
    },
    /// Resample a backtest's trades in random order
    MonteCarlo {
        #[arg(long)]
        strategy: String,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Grid search over the configured parameter lists
    Optimize {
        /// Strategies to optimize (all when omitted)
        #[arg(long = "strategy", value_delimiter = ',')]
        strategies: Vec<String>,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Genetic search over parameter ranges
    Evolve {
        #[arg(long)]
        strategy: String,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Crash, rally and volatility regime scenarios
    Stress {
        #[arg(long)]
        strategy: String,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Convert a candle file into a bincode snapshot with the resolved settings
    Snapshot {
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
    /// List registered strategies and their default parameters
    Strategies,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli {
        settings,
        symbol,
        command,
    } = cli;
    let app = AppContext::initialize(settings, symbol);
    info!("Starting tradesim. Backtest results do not predict future returns.");

    match command {
        Commands::Backtest {
            strategy,
            data_file,
            params,
            dedupe,
            output,
            trades_csv,
        } => {
            let ctx = app.run_context(resolve_market_data_path(data_file))?;
            backtest::run(
                &ctx,
                &strategy,
                &params,
                dedupe,
                output.as_deref(),
                trades_csv.as_deref(),
            )?;
        }
        Commands::WalkForward {
            strategy,
            data_file,
            params,
            output,
            trades_csv,
        } => {
            let ctx = app.run_context(resolve_market_data_path(data_file))?;
            walk_forward::run(
                &ctx,
                &strategy,
                &params,
                output.as_deref(),
                trades_csv.as_deref(),
            )?;
        }
        Commands::MonteCarlo {
            strategy,
            data_file,
            params,
            seed,
            output,
        } => {
            let ctx = app.run_context(resolve_market_data_path(data_file))?;
            monte_carlo::run(&ctx, &strategy, &params, seed, output.as_deref())?;
        }
        Commands::Optimize {
            strategies,
            data_file,
            output,
        } => {
            let ctx = app.run_context(resolve_market_data_path(data_file))?;
            optimize::run(&ctx, &strategies, output.as_deref())?;
        }
        Commands::Evolve {
            strategy,
            data_file,
            seed,
            output,
        } => {
            let ctx = app.run_context(resolve_market_data_path(data_file))?;
            evolve::run(&ctx, &strategy, seed, output.as_deref())?;
        }
        Commands::Stress {
            strategy,
            data_file,
            params,
            output,
        } => {
            let ctx = app.run_context(resolve_market_data_path(data_file))?;
            stress::run(&ctx, &strategy, &params, output.as_deref())?;
        }
        Commands::Snapshot { data_file, output } => {
            let ctx = app.run_context(resolve_market_data_path(data_file))?;
            snapshot::run(&ctx, &output)?;
        }
        Commands::Strategies => strategies::run(),
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
