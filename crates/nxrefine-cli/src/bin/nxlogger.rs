//! `nxlogger`: the TCP-socket logging daemon (spec §4.4). Listens on
//! `DEFAULT_TCP_LOGGING_PORT` and appends every line it receives to
//! `tasks/nxlogger.log`, writing a PID file so `Logger::for_entry` knows
//! to route through the socket instead of the file directly.

use clap::Parser;
use nxrefine_cli::common::{init_tracing, task_directory};
use nxrefine_server::logger_pid_path;
use nxrefine_server::DEFAULT_TCP_LOGGING_PORT;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nxlogger", about = "Run the TCP logging daemon")]
struct Cli {
    #[arg(short = 'd', long, default_value = ".")]
    directory: PathBuf,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing();
    let directory = task_directory(&cli.directory);
    std::fs::create_dir_all(&directory)?;

    let pid_path = logger_pid_path(&directory);
    anyhow::ensure!(!pid_path.exists(), "nxlogger is already running ({pid_path:?})");
    std::fs::write(&pid_path, std::process::id().to_string())?;

    let listener = TcpListener::bind(("127.0.0.1", DEFAULT_TCP_LOGGING_PORT))?;
    tracing::info!(port = DEFAULT_TCP_LOGGING_PORT, "nxlogger listening");

    let log_path = directory.join("nxlogger.log");
    let result = (|| -> anyhow::Result<()> {
        for stream in listener.incoming() {
            let stream = stream?;
            let reader = BufReader::new(stream);
            let mut log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            for line in reader.lines() {
                let line = line?;
                writeln!(log_file, "{line}")?;
            }
        }
        Ok(())
    })();

    let _ = std::fs::remove_file(&pid_path);
    result
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
