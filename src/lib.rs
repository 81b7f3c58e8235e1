pub mod backtester;
pub mod config;
pub mod context;
pub mod data_context;
pub mod export;
pub mod genetic;
pub mod indicators;
pub mod models;
pub mod monte_carlo;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod performance;
pub mod registry;
pub mod signal_cache;
pub mod simulator;
pub mod strategy;
pub mod strategy_utils;
pub mod stress;
pub mod walk_forward;

pub mod commands {
    pub mod backtest;
    pub mod evolve;
    pub mod monte_carlo;
    pub mod optimize;
    pub mod snapshot;
    pub mod strategies;
    pub mod stress;
    pub mod walk_forward;
}
