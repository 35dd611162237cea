//! `nxreduce`: run a selected subset of per-entry stages in pipeline order
//! (spec §6, "`nxreduce` additionally: `-l` link, `-m` max, `-f` find,
//! `-c` copy, `-r` refine, `-p` prepare, `-t` transform, `-M` mask").

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, parse_shape, progress_bar, raw_path, CommonArgs};
use nxrefine_core::raw::MmapRaw;
use nxrefine_core::{ExternalRefiner, OrientationMatrix, Reducer};

#[derive(Parser)]
#[command(name = "nxreduce", about = "Run selected per-entry reduction stages")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    shape: Option<String>,

    #[arg(short = 'l', long)]
    link: bool,
    #[arg(short = 'm', long)]
    max: bool,
    #[arg(short = 'f', long)]
    find: bool,
    #[arg(short = 'c', long)]
    copy: bool,
    #[arg(short = 'r', long)]
    refine: bool,
    #[arg(short = 'p', long)]
    prepare: bool,
    #[arg(short = 't', long)]
    transform: bool,
    #[arg(short = 'M', long)]
    mask: bool,

    #[arg(long, default_value = "nxoptimize")]
    optimizer: std::path::PathBuf,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let mut ctx = open_scan(&cli.common)?;
    let shape = cli.shape.as_deref().map(parse_shape).transpose()?;
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

        if cli.link {
            let shape = shape.ok_or_else(|| anyhow::anyhow!("--shape is required with -l"))?;
            reducer.link(shape, 0.0, None, None, cli.common.overwrite)?;
        }
        let raw = match shape {
            Some(shape) if cli.max || cli.find || cli.prepare => {
                Some(MmapRaw::open(raw_path(&ctx, &entry), shape)?)
            }
            _ => None,
        };
        if cli.max {
            let raw = raw.as_ref().ok_or_else(|| anyhow::anyhow!("--shape is required with -m"))?;
            reducer.max(raw, cli.common.overwrite)?;
        }
        if cli.find {
            let raw = raw.as_ref().ok_or_else(|| anyhow::anyhow!("--shape is required with -f"))?;
            let last = raw.shape().0;
            reducer.find(raw, None, 0, last, None, cli.common.overwrite)?;
        }
        if cli.copy {
            tracing::warn!(entry = %entry, "copy requested but no --parent given; skipping");
        }
        if cli.refine {
            let refiner = ExternalRefiner::new(&cli.optimizer);
            let seed = OrientationMatrix {
                matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                a: 5.43,
                b: 5.43,
                c: 5.43,
                alpha: 90.0,
                beta: 90.0,
                gamma: 90.0,
            };
            reducer.refine(&refiner, &[], &seed, cli.common.overwrite)?;
        }
        if cli.prepare {
            let raw = raw.as_ref().ok_or_else(|| anyhow::anyhow!("--shape is required with -p"))?;
            reducer.prepare(raw, &[], cli.common.overwrite)?;
        }
        if cli.transform || cli.mask {
            tracing::warn!(entry = %entry, "transform/mask requires settings; run nxtransform directly");
        }

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
