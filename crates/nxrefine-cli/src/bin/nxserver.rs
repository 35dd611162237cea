//! `nxserver`: drain the persistent task queue across a worker pool, once
//! (spec §4.3). Re-invoke (e.g. from a supervisor) to keep draining.

use clap::Parser;
use nxrefine_cli::common::{init_tracing, task_directory};
use nxrefine_server::{Cluster, Multicore, TaskServer, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nxserver", about = "Drain the queued reduction commands")]
struct Cli {
    #[arg(short = 'd', long, default_value = ".")]
    directory: PathBuf,

    /// Remote hostnames to dispatch to instead of local cores.
    #[arg(long, num_args = 1..)]
    hosts: Vec<String>,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let server = Arc::new(TaskServer::open(task_directory(&cli.directory))?);
    server.claim_pid()?;

    let result = if cli.hosts.is_empty() {
        let pool = WorkerPool::new(server.clone(), Multicore::detected());
        pool.drain()
    } else {
        let pool = WorkerPool::new(server.clone(), Cluster::new(cli.hosts));
        pool.drain()
    };

    server.release_pid()?;
    let outcomes = result?;
    for (cmd, status) in &outcomes {
        println!("{cmd}: {status}");
    }
    if outcomes.iter().any(|(_, status)| !status.success()) {
        anyhow::bail!("one or more queued commands failed");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
