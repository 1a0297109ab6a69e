//! remshd — scheduler shell server entry point.
//!
//! The wire protocol runs on the socket; all diagnostics (lifecycle events,
//! per-quantum statistics, the Gantt timeline) go to stderr via tracing.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use remsh::server::{DEFAULT_PORT, Server};

#[derive(Debug, Parser)]
#[command(name = "remshd")]
#[command(about = "Remote shell server with a simulated preemptive scheduler", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TCP port to listen on.
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("remshd: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let server = Server::bind(cli.port)?;
    server.run()
}
