//! `nxrefine`: three-stage orientation-matrix refinement (spec §4.6
//! `refine`), via the external least-squares optimizer subprocess.

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, progress_bar, CommonArgs};
use nxrefine_core::{ExternalRefiner, OrientationMatrix, Reducer};

#[derive(Parser)]
#[command(name = "nxrefine", about = "Refine the crystal orientation matrix")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to the external refinement optimizer executable.
    #[arg(long, default_value = "nxoptimize")]
    optimizer: std::path::PathBuf,

    /// Seed unit-cell lattice constants `a,b,c` in angstroms.
    #[arg(long, default_value = "5.43,5.43,5.43")]
    lattice: String,
}

fn parse_lattice(s: &str) -> anyhow::Result<(f64, f64, f64)> {
    let parts: Vec<&str> = s.split(',').collect();
    anyhow::ensure!(parts.len() == 3, "--lattice must be \"a,b,c\"");
    Ok((parts[0].parse()?, parts[1].parse()?, parts[2].parse()?))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let mut ctx = open_scan(&cli.common)?;
    let (a, b, c) = parse_lattice(&cli.lattice)?;
    let seed = OrientationMatrix {
        matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        a,
        b,
        c,
        alpha: 90.0,
        beta: 90.0,
        gamma: 90.0,
    };
    let refiner = ExternalRefiner::new(&cli.optimizer);
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
        // TODO: load the peak list nxfind recorded instead of refining against none.
        reducer.refine(&refiner, &[], &seed, cli.common.overwrite)?;
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
