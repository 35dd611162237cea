//! `nxfind`: blob detection + merge over `[first, last)` (spec §4.6 `find`).

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, parse_shape, progress_bar, raw_path, CommonArgs};
use nxrefine_core::raw::MmapRaw;
use nxrefine_core::Reducer;

#[derive(Parser)]
#[command(name = "nxfind", about = "Find Bragg peaks via blob detection and merging")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    shape: String,

    /// First frame (inclusive); defaults to 0.
    #[arg(long, default_value = "0")]
    first: usize,

    /// Last frame (exclusive); defaults to the whole scan.
    #[arg(long)]
    last: Option<usize>,

    /// Override the blob threshold; defaults to `maximum / 10`.
    #[arg(long)]
    threshold: Option<f64>,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let mut ctx = open_scan(&cli.common)?;
    let shape = parse_shape(&cli.shape)?;
    let entries = entries_to_run(&cli.common, &ctx);
    let pb = progress_bar(entries.len() as u64);

    for entry in entries {
        let raw = MmapRaw::open(raw_path(&ctx, &entry), shape)?;
        let last = cli.last.unwrap_or(shape.0);
        let logger = logger_for(&ctx, &entry)?;
        let mut reducer = Reducer::new(
            ctx.wrapper.clone(),
            &entry,
            &ctx.sample,
            &ctx.scan,
            ctx.directory.clone(),
            ctx.config.clone(),
            ctx.db.clone(),
            ctx.file_id,
            logger,
        );
        let peaks = reducer.find(&raw, None, cli.first, last, cli.threshold, cli.common.overwrite)?;
        pb.set_message(format!("{entry}: {} peaks", peaks.len()));
        ctx.wrapper = reducer.wrapper;
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    exit_with(run(cli));
}
