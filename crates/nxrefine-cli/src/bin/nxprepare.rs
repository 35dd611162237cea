//! `nxprepare`: optimise predicted peaks' `z`, expand into per-frame mask
//! peaks (spec §4.6 `prepare`).

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, parse_shape, progress_bar, raw_path, CommonArgs};
use nxrefine_core::raw::MmapRaw;
use nxrefine_core::Reducer;
use nxrefine_store::MaskFile;

#[derive(Parser)]
#[command(name = "nxprepare", about = "Build the 3D Bragg-peak mask prediction")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

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
        // TODO: source predicted reflections from the refiner's output store.
        let predicted = Vec::new();
        let peaks = reducer.prepare(&raw, &predicted, cli.common.overwrite)?;

        let mask_path = ctx.directory.join(format!("{entry}_mask.nxs"));
        let mut mask_file = if mask_path.exists() {
            MaskFile::load(&mask_path)?
        } else {
            MaskFile::new(&mask_path)
        };
        mask_file.peaks_inferred = peaks;
        mask_file.save()?;

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
