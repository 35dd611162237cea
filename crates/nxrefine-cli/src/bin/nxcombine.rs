//! `nxcombine`/`nxmasked_combine`: merge every entry's transform output
//! via the external `cctw merge` subprocess (spec §4.7 `combine`).

use clap::Parser;
use nxrefine_cli::common::{exit_with, init_tracing, logger_for, open_scan, CommonArgs};
use nxrefine_core::{CctwMerger, LaueGroup, MultiReducer};

#[derive(Parser)]
#[command(name = "nxcombine", about = "Combine per-entry HKL transforms into one volume")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, default_value = "cctw")]
    cctw: std::path::PathBuf,

    #[arg(short = 'M', long)]
    masked: bool,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let ctx = open_scan(&cli.common)?;
    let merger = CctwMerger::new(&cli.cctw);

    let entries = if cli.common.entries.is_empty() {
        ctx.wrapper.entries()
    } else {
        cli.common.entries.clone()
    };
    let entries_ready = entries.iter().all(|e| {
        let stage = if cli.masked { "nxmasked_transform" } else { "nxtransform" };
        ctx.wrapper.has_process(e, stage)
    });
    let suffix = if cli.masked { "masked_transform" } else { "transform" };
    let inputs: Vec<_> = entries
        .iter()
        .map(|e| ctx.directory.join(format!("{e}_{suffix}.nxs")))
        .collect();
    let output_name = if cli.masked { "masked_combine.nxs" } else { "combine.nxs" };
    let output = ctx.directory.join(output_name);

    let logger = logger_for(&ctx, "entry")?;
    let mut multi = MultiReducer::new(
        ctx.wrapper,
        &ctx.sample,
        &ctx.scan,
        ctx.directory.clone(),
        ctx.config,
        LaueGroup::TriclinicBar1,
        ctx.db,
        ctx.file_id,
        logger,
    );

    if cli.masked {
        multi.masked_combine(&merger, &inputs, &output, entries_ready, cli.common.overwrite)?;
    } else {
        multi.combine(&merger, &inputs, &output, entries_ready, cli.common.overwrite)?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    exit_with(run(cli));
}
