//! `nxsum`: sum a single entry's raw data and monitor channels across a
//! list of scan directories (spec §4.8).

use clap::Parser;
use nxrefine_cli::common::{init_tracing, parse_shape};
use nxrefine_core::logs::{derive_monitor, parse_meta_csv};
use nxrefine_core::raw::MmapRaw;
use nxrefine_core::{nxsum, Config, SumInput};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nxsum", about = "Sum one entry's raw data across scan directories")]
struct Cli {
    /// Scan directories to sum, in order; the first is the base scan.
    #[arg(short = 'd', long = "directory", num_args = 1.., required = true)]
    directories: Vec<PathBuf>,

    #[arg(short = 'e', long)]
    entry: String,

    #[arg(long)]
    shape: String,

    #[arg(short = 'o', long)]
    output: PathBuf,
}

fn read_monitor(directory: &PathBuf, entry: &str, channel: &str, frames: usize) -> Vec<f64> {
    let path = directory.join(format!("{entry}_meta.txt"));
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    let fields = parse_meta_csv(&contents);
    match fields.get(channel) {
        Some(values) => derive_monitor(values, frames),
        None => Vec::new(),
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let shape = parse_shape(&cli.shape)?;
    let config = Config::default();

    let raws: Vec<MmapRaw> = cli
        .directories
        .iter()
        .map(|dir| MmapRaw::open(dir.join(format!("{}.raw", cli.entry)), shape))
        .collect::<Result<_, _>>()?;

    let inputs: Vec<SumInput> = cli
        .directories
        .iter()
        .zip(&raws)
        .map(|(dir, raw)| SumInput {
            raw: raw as &dyn nxrefine_core::raw::RawDataSource,
            monitor1: read_monitor(dir, &cli.entry, "monitor1", shape.0),
            monitor2: read_monitor(dir, &cli.entry, "monitor2", shape.0),
            mask: None,
        })
        .collect();

    let summed = nxsum(&inputs, config.chunk_size_floor)?;

    let mut f = std::fs::File::create(&cli.output)?;
    for value in summed.raw.iter() {
        f.write_all(&value.to_le_bytes())?;
    }
    println!(
        "summed {} scans into {}: monitor1 total = {:.3}",
        cli.directories.len(),
        cli.output.display(),
        summed.monitor1.iter().sum::<f64>()
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
