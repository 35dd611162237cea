//! `nxmax`: detector-pixel maximum, frame-sum vector, always-firing pixel
//! detection, radial profile (spec §4.6 `max`).

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, parse_shape, progress_bar, raw_path, CommonArgs};
use nxrefine_core::raw::MmapRaw;
use nxrefine_core::Reducer;

#[derive(Parser)]
#[command(name = "nxmax", about = "Compute the detector-pixel maximum and radial profile")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Raw volume shape as "frames,y,x".
    #[arg(long)]
    shape: String,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let mut ctx = open_scan(&cli.common)?;
    let shape = parse_shape(&cli.shape)?;
    let entries = entries_to_run(&cli.common, &ctx);
    let pb = progress_bar(entries.len() as u64);

    for entry in entries {
        let raw = MmapRaw::open(raw_path(&ctx, &entry), shape)?;
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
        let maximum = reducer.max(&raw, cli.common.overwrite)?;
        pb.set_message(format!("{entry}: max={maximum}"));
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
