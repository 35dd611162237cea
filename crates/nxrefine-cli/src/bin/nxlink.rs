//! `nxlink`: construct/patch the `data` group, transfer metadata logs,
//! derive monitor channels (spec §4.6 `link`).

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, parse_shape, progress_bar, CommonArgs};
use nxrefine_core::Reducer;

#[derive(Parser)]
#[command(name = "nxlink", about = "Link raw detector frames into the wrapper file")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Raw volume shape as "frames,y,x" (container shape discovery is out of scope).
    #[arg(long)]
    shape: String,

    /// Raw acquisition timestamp attribute (seconds, 1990 epoch).
    #[arg(long, default_value = "0")]
    timestamp: f64,

    /// Path to the `<entry>_head.txt` metadata file.
    #[arg(long)]
    head_log: Option<std::path::PathBuf>,

    /// Path to the `<entry>_meta.txt` metadata CSV.
    #[arg(long)]
    meta_csv: Option<std::path::PathBuf>,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let mut ctx = open_scan(&cli.common)?;
    let shape = parse_shape(&cli.shape)?;
    let entries = entries_to_run(&cli.common, &ctx);
    let pb = progress_bar(entries.len() as u64);

    let head_text = cli.head_log.as_ref().map(std::fs::read_to_string).transpose()?;
    let meta_text = cli.meta_csv.as_ref().map(std::fs::read_to_string).transpose()?;

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
        reducer.link(shape, cli.timestamp, head_text.as_deref(), meta_text.as_deref(), cli.common.overwrite)?;
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
