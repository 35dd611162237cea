//! `nxparent`: resolve or set the `<sample>_parent.nxs` relative symlink
//! that `nxcopy` follows to find the reference scan (spec §4.6 `copy`,
//! GLOSSARY "Parent").

use clap::Parser;
use nxrefine_cli::common::{init_tracing, CommonArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nxparent", about = "Resolve or set the parent wrapper symlink")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Relative path (within the label directory) to the wrapper file that
    /// should become the parent. Omit to just print the current target.
    #[arg(long)]
    set: Option<PathBuf>,
}

fn parent_link_path(directory: &std::path::Path) -> anyhow::Result<PathBuf> {
    let label = directory
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("cannot determine sample label from {directory:?}"))?;
    let sample = label.rsplit_once('_').map(|(s, _)| s).unwrap_or(label);
    Ok(directory.join(format!("{sample}_parent.nxs")))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let link_path = parent_link_path(&cli.common.directory)?;

    if let Some(target) = cli.set {
        anyhow::ensure!(
            cli.common.directory.join(&target).exists(),
            "parent target {target:?} does not exist under {:?}",
            cli.common.directory
        );
        if link_path.symlink_metadata().is_ok() {
            std::fs::remove_file(&link_path)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &link_path)?;
        #[cfg(not(unix))]
        std::fs::copy(cli.common.directory.join(&target), &link_path).map(|_| ())?;
        println!("{} -> {}", link_path.display(), target.display());
        return Ok(());
    }

    anyhow::ensure!(link_path.symlink_metadata().is_ok(), "no parent link at {link_path:?}");
    let target = std::fs::read_link(&link_path)?;
    println!("{} -> {}", link_path.display(), target.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
