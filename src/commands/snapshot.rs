use crate::context::RunContext;
use anyhow::Result;
use log::info;
use std::path::Path;

/// Writes the loaded candles and resolved settings as a bincode snapshot.
pub fn run(ctx: &RunContext, output: &Path) -> Result<()> {
    ctx.data.save_snapshot(output, &ctx.raw_settings)?;
    info!(
        "Market data snapshot with {} candles saved to {}",
        ctx.data.len(),
        output.display()
    );
    Ok(())
}
