use crate::models::SimulatedTrade;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub const TRADE_CSV_HEADER: [&str; 10] = [
    "Type",
    "Entry",
    "Exit",
    "StopLoss",
    "ExitReason",
    "CandlesHeld",
    "Profit",
    "ProfitPercent",
    "RR",
    "BalanceAfter",
];

fn money(value: f64) -> String {
    format!("{:.2}", value)
}

/// One row per trade, prices and amounts at two decimals.
pub fn write_trades_csv<W: Write>(writer: W, trades: &[SimulatedTrade]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(TRADE_CSV_HEADER)?;
    for trade in trades {
        csv_writer.write_record([
            trade.direction.label().to_string(),
            money(trade.entry),
            money(trade.exit),
            money(trade.stop_loss),
            trade.exit_reason.to_string(),
            trade.bars_held.to_string(),
            money(trade.profit),
            money(trade.profit_percent),
            money(trade.risk_reward),
            money(trade.balance_after),
        ])?;
    }
    csv_writer.flush().context("Failed to flush trade CSV")?;
    Ok(())
}

pub fn save_trades_csv<P: AsRef<Path>>(path: P, trades: &[SimulatedTrade]) -> Result<()> {
    let path = path.as_ref();
    let file = create_file(path)?;
    write_trades_csv(BufWriter::new(file), trades)
        .with_context(|| format!("Failed to write trades to {}", path.display()))
}

pub fn save_json<T: Serialize + ?Sized, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let file = create_file(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to serialize results to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    File::create(path).with_context(|| format!("Unable to create {}", path.display()))
}
