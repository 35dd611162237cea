//! Shared argument parsing and scan-context setup for every `nxrefine-cli`
//! binary (spec §6, "Common flags").

use clap::Args;
use nxrefine_core::Config;
use nxrefine_server::{Logger, TaskDatabase};
use nxrefine_store::WrapperFile;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Flags shared by every entry point (spec §6: `-d <directory>`,
/// `-e <entry>…`, `-o` overwrite, `-q` queue rather than execute).
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Scan directory containing the wrapper file and raw data.
    #[arg(short = 'd', long, default_value = ".")]
    pub directory: PathBuf,

    /// Entry name(s) to operate on; defaults to every entry in the wrapper.
    #[arg(short = 'e', long = "entry")]
    pub entries: Vec<String>,

    /// Re-run the stage even if already recorded as DONE.
    #[arg(short = 'o', long)]
    pub overwrite: bool,

    /// Queue the command on the task server instead of running it now.
    #[arg(short = 'q', long)]
    pub queue: bool,
}

pub fn task_directory(directory: &Path) -> PathBuf {
    directory.join("tasks")
}

/// A scan's wrapper file, task database handle, and identifying names,
/// resolved from a directory the way every binary needs them.
pub struct ScanContext {
    pub wrapper: WrapperFile,
    pub sample: String,
    pub scan: String,
    pub directory: PathBuf,
    pub db: Arc<TaskDatabase>,
    pub file_id: i64,
    pub config: Config,
}

/// Split a scan directory's label (`<sample>_<scan>`) the way the wrapper
/// file itself is named on disk.
fn sample_and_scan(directory: &Path) -> (String, String) {
    let label = directory
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("sample_1")
        .to_string();
    match label.rsplit_once('_') {
        Some((sample, scan)) => (sample.to_string(), scan.to_string()),
        None => (label, "1".to_string()),
    }
}

pub fn open_scan(common: &CommonArgs) -> anyhow::Result<ScanContext> {
    std::fs::create_dir_all(task_directory(&common.directory))?;
    let (sample, scan) = sample_and_scan(&common.directory);
    let label = format!("{sample}_{scan}");
    let wrapper_path = common.directory.join(format!("{label}.nxs"));

    let wrapper = if wrapper_path.exists() {
        WrapperFile::load(&wrapper_path)?
    } else {
        WrapperFile::new(&wrapper_path)
    };

    let db = Arc::new(TaskDatabase::open(
        task_directory(&common.directory).join("nxdatabase.db"),
    )?);
    let file_id = db.register_file(&wrapper_path.display().to_string())?;

    let config_path = common.directory.join("nxrefine.toml");
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    Ok(ScanContext {
        wrapper,
        sample,
        scan,
        directory: common.directory.clone(),
        db,
        file_id,
        config,
    })
}

/// Entries to operate on: explicit `-e` flags, or every entry already in
/// the wrapper file.
pub fn entries_to_run(common: &CommonArgs, ctx: &ScanContext) -> Vec<String> {
    if common.entries.is_empty() {
        ctx.wrapper.entries()
    } else {
        common.entries.clone()
    }
}

pub fn logger_for(ctx: &ScanContext, entry: &str) -> std::io::Result<Logger> {
    Logger::for_entry(task_directory(&ctx.directory), &ctx.sample, &ctx.scan, entry, false)
}

pub fn progress_bar(len: u64) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(len);
    if let Ok(style) = indicatif::ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
        pb.set_style(style);
    }
    pb
}

/// Exit 0 on success, non-zero on any stage failure (spec §6, "Exit
/// codes").
pub fn exit_with(result: anyhow::Result<()>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Parse a `"<frames>,<y>,<x>"` shape flag. Raw-volume shape discovery is
/// itself the external container library's job (spec §1); binaries that
/// need it take it as an explicit flag instead.
pub fn parse_shape(s: &str) -> anyhow::Result<(usize, usize, usize)> {
    let parts: Vec<&str> = s.split(',').collect();
    anyhow::ensure!(parts.len() == 3, "--shape must be \"frames,y,x\"");
    Ok((parts[0].trim().parse()?, parts[1].trim().parse()?, parts[2].trim().parse()?))
}

pub fn raw_path(ctx: &ScanContext, entry: &str) -> PathBuf {
    ctx.directory.join(format!("{entry}.raw"))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
