use std::io::{self, BufWriter};

use anyhow::Context;
use lograph::runtime::{boot, run};
use tracing::info;

fn main() -> anyhow::Result<()> {
    boot::init_logging();
    let config = boot::boot().context("failed to load configuration")?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let summary = run::run(&config, &mut out).context("failed to write report")?;

    info!(
        "Done: {} sources, {} files, {} series lines",
        summary.sources, summary.files_loaded, summary.lines_written
    );
    Ok(())
}
