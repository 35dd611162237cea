//! `nxcopy`: copy sample/instrument parameters from the resolved parent
//! wrapper file into the current entry (spec §4.6 `copy`).

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, progress_bar, CommonArgs};
use nxrefine_core::Reducer;
use nxrefine_store::WrapperFile;

#[derive(Parser)]
#[command(name = "nxcopy", about = "Copy sample and instrument parameters from the parent scan")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to the resolved `<sample>_parent.nxs` wrapper file.
    #[arg(long)]
    parent: std::path::PathBuf,

    /// Entry name within the parent wrapper file to copy from.
    #[arg(long)]
    parent_entry: String,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let mut ctx = open_scan(&cli.common)?;
    let parent = WrapperFile::load(&cli.parent)?;
    let entries = entries_to_run(&cli.common, &ctx);
    let pb = progress_bar(entries.len() as u64);

    for entry in entries {
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
        reducer.copy(&parent, &cli.parent_entry, cli.common.overwrite)?;
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
