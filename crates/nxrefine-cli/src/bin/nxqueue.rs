//! `nxqueue`: enqueue a command onto the persistent task-server FIFO
//! rather than running it directly (spec §6, `-q`).

use clap::Parser;
use nxrefine_cli::common::{init_tracing, task_directory};
use nxrefine_server::TaskServer;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nxqueue", about = "Queue a reduction command for the task server")]
struct Cli {
    #[arg(short = 'd', long, default_value = ".")]
    directory: PathBuf,

    /// The command line to queue, e.g. "nxmax -d . -e f1".
    command: Vec<String>,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    anyhow::ensure!(!cli.command.is_empty(), "no command given to queue");
    let server = TaskServer::open(task_directory(&cli.directory))?;
    server.add_task(cli.command.join(" "))?;
    println!("queued: {}", cli.command.join(" "));
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
