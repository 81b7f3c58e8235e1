use crate::models::*;
use statrs::statistics::Statistics;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Calmar scaling assumes the sample spans roughly one month.
const CALMAR_ANNUALIZATION: f64 = 365.0 / 30.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Fill the aggregate fields of a run from its trade list and balances.
    pub fn finalize_run(run: &mut BacktestRun) {
        let mut winning_trades = 0usize;
        let mut total_profit = 0.0;
        let mut total_loss = 0.0;
        let mut rr_sum = 0.0;

        for trade in &run.trades {
            if trade.is_win() {
                winning_trades += 1;
                total_profit += trade.profit;
            } else {
                total_loss += trade.profit.abs();
            }
            rr_sum += trade.risk_reward;
        }

        let total_trades = run.trades.len();
        run.total_trades = total_trades;
        run.winning_trades = winning_trades;
        run.losing_trades = total_trades - winning_trades;
        run.total_profit = total_profit;
        run.total_loss = total_loss;
        run.net_profit = total_profit - total_loss;
        run.win_rate = Self::percent(winning_trades as f64, total_trades as f64);
        run.return_percent = Self::percent(run.net_profit, run.start_balance);
        run.profit_factor = Self::profit_factor(total_profit, total_loss);
        run.average_rr = if total_trades > 0 {
            rr_sum / total_trades as f64
        } else {
            0.0
        };
    }

    /// Gross profit over gross loss; 0 when there were no losses.
    pub fn profit_factor(total_profit: f64, total_loss: f64) -> f64 {
        if total_loss > 0.0 {
            total_profit / total_loss
        } else {
            0.0
        }
    }

    fn percent(numerator: f64, denominator: f64) -> f64 {
        if denominator > 0.0 {
            numerator / denominator * 100.0
        } else {
            0.0
        }
    }

    pub fn advanced_metrics(run: &BacktestRun) -> AdvancedMetrics {
        if run.trades.is_empty() {
            return AdvancedMetrics::default();
        }

        let wins: Vec<f64> = run
            .trades
            .iter()
            .filter(|t| t.is_win())
            .map(|t| t.profit)
            .collect();
        let losses: Vec<f64> = run
            .trades
            .iter()
            .filter(|t| !t.is_win())
            .map(|t| t.profit)
            .collect();
        let (max_win_streak, max_loss_streak) = Self::streaks(&run.trades);
        let profit_percents: Vec<f64> = run.trades.iter().map(|t| t.profit_percent).collect();
        let drawdown_percent = run.max_drawdown_percent();

        AdvancedMetrics {
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            average_win: Self::average(&wins),
            average_loss: Self::average(&losses),
            max_win_streak,
            max_loss_streak,
            expectancy_per_trade: run.net_profit / run.trades.len() as f64,
            sharpe_ratio: Self::sharpe_ratio(&profit_percents),
            sortino_ratio: Self::sortino_ratio(&profit_percents),
            calmar_ratio: if drawdown_percent > 0.0 {
                run.return_percent * CALMAR_ANNUALIZATION / drawdown_percent
            } else {
                0.0
            },
            recovery_factor: if run.max_drawdown > 0.0 && run.start_balance > 0.0 {
                run.net_profit / (run.start_balance * run.max_drawdown)
            } else {
                0.0
            },
            average_bars_held: Self::average(
                &run
                    .trades
                    .iter()
                    .map(|t| t.bars_held as f64)
                    .collect::<Vec<_>>(),
            ),
        }
    }

    fn streaks(trades: &[SimulatedTrade]) -> (usize, usize) {
        let mut max_wins = 0;
        let mut max_losses = 0;
        let mut wins = 0;
        let mut losses = 0;
        for trade in trades {
            if trade.is_win() {
                wins += 1;
                losses = 0;
                max_wins = max_wins.max(wins);
            } else {
                losses += 1;
                wins = 0;
                max_losses = max_losses.max(losses);
            }
        }
        (max_wins, max_losses)
    }

    fn average(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Per-trade Sharpe scaled by sqrt(252); 0 when the spread is undefined.
    pub fn sharpe_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.mean();
        let std_dev = returns.std_dev();
        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }
        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    pub fn sortino_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.mean();
        let downside = (returns
            .iter()
            .map(|r| r.min(0.0).powi(2))
            .sum::<f64>()
            / returns.len() as f64)
            .sqrt();
        if downside == 0.0 {
            return 0.0;
        }
        mean / downside * TRADING_DAYS_PER_YEAR.sqrt()
    }
}
