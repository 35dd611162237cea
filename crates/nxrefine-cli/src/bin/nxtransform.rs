//! `nxtransform`/`nxmasked_transform`: invoke the external `cctw
//! transform` subprocess (spec §4.6 `transform`, `masked_transform`).

use clap::Parser;
use nxrefine_cli::common::{entries_to_run, exit_with, init_tracing, logger_for, open_scan, parse_shape, progress_bar, CommonArgs};
use nxrefine_core::mask::MaskInputs;
use nxrefine_core::{CctwTransformer, Reducer};
use nxrefine_store::{AxisSpec, MaskFile, TransformSettings};

#[derive(Parser)]
#[command(name = "nxtransform", about = "Transform frame-indexed intensities into an HKL volume")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to the `cctw` executable.
    #[arg(long, default_value = "cctw")]
    cctw: std::path::PathBuf,

    /// Apply the entry's mask before transforming (`masked_transform`).
    #[arg(short = 'M', long)]
    masked: bool,

    /// Detector volume shape (`frames,y,x`), required with `--masked` to
    /// materialise the 3D mask volume.
    #[arg(long)]
    shape: Option<String>,

    #[arg(long, default_value = "-10,0.01,10")]
    h_axis: String,
    #[arg(long, default_value = "-10,0.01,10")]
    k_axis: String,
    #[arg(long, default_value = "-10,0.01,10")]
    l_axis: String,
}

fn parse_axis(name: &str, s: &str) -> anyhow::Result<AxisSpec> {
    let parts: Vec<&str> = s.split(',').collect();
    anyhow::ensure!(parts.len() == 3, "--{name}-axis must be \"start,step,stop\"");
    Ok(AxisSpec {
        name: name.to_string(),
        start: parts[0].parse()?,
        step: parts[1].parse()?,
        stop: parts[2].parse()?,
    })
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let mut ctx = open_scan(&cli.common)?;
    let transformer = CctwTransformer::new(&cli.cctw);
    let axes = [
        parse_axis("H", &cli.h_axis)?,
        parse_axis("K", &cli.k_axis)?,
        parse_axis("L", &cli.l_axis)?,
    ];
    let entries = entries_to_run(&cli.common, &ctx);
    let pb = progress_bar(entries.len() as u64);

    for entry in entries {
        let output = ctx.directory.join(format!("{entry}_transform.nxs"));
        let mask_path = ctx.directory.join(format!("{entry}_mask.nxs"));
        let settings = TransformSettings {
            hkl_axes: axes.clone(),
            input_files: vec![ctx.directory.join(format!("{entry}.raw"))],
            output_file: output,
            mask_file: if cli.masked { Some(mask_path) } else { None },
        };

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
        if cli.masked {
            let shape_str = cli.shape.as_deref().ok_or_else(|| anyhow::anyhow!("--shape is required with --masked"))?;
            let shape = parse_shape(shape_str)?;

            let own_mask_path = ctx.directory.join(format!("{entry}_mask.nxs"));
            let own_mask = if own_mask_path.exists() {
                MaskFile::load(&own_mask_path)?
            } else {
                MaskFile::new(&own_mask_path)
            };

            let sibling_entries: Vec<String> = ctx.wrapper.entries().into_iter().filter(|e| e != &entry).collect();
            let sibling_masks: Vec<Vec<_>> = sibling_entries
                .iter()
                .map(|sibling| {
                    let path = ctx.directory.join(format!("{sibling}_mask.nxs"));
                    if path.exists() {
                        Ok(MaskFile::load(&path)?.peaks_inferred)
                    } else {
                        Ok(Vec::new())
                    }
                })
                .collect::<anyhow::Result<_>>()?;
            let sibling_peaks: Vec<&[_]> = sibling_masks.iter().map(Vec::as_slice).collect();

            // TODO: source reflections needing a cross-entry extra
            // (`pixel_count < 0`) from the refiner's output store, the
            // same gap `nxprepare`'s predicted-reflection list has today.
            let mask_inputs = MaskInputs {
                shape,
                own_peaks: &own_mask.peaks_inferred,
                needing_cross_entry: &[],
                sibling_peaks: &sibling_peaks,
                chunk_size: ctx.config.chunk_size_floor,
            };
            // All sibling entries' `prepare` must be DONE; callers orchestrating
            // the whole scan (nxreduce) verify this across entries.
            reducer.masked_transform(&transformer, &settings, true, &mask_inputs, cli.common.overwrite)?;
        } else {
            reducer.transform(&transformer, &settings, cli.common.overwrite)?;
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
