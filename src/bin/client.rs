//! remsh — line-oriented client for remshd.
//!
//! Reads one command per line from stdin, sends it as a single frame, and
//! prints the server's framed reply until the end-of-output terminator. The
//! session ends on stdin EOF or the server's close sentinel (sent after
//! `exit`).

use std::io::{self, BufRead, Write};
use std::net::TcpStream;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use remsh::frame::{self, Frame};

#[derive(Debug, Parser)]
#[command(name = "remsh")]
#[command(about = "Client for the remshd scheduler shell", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Server host name or address.
    host: String,

    /// Server TCP port.
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
        eprintln!("remsh: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut writer = TcpStream::connect((cli.host.as_str(), cli.port))
        .with_context(|| format!("connect {}:{}", cli.host, cli.port))?;
    let mut reader = writer.try_clone().context("clone stream")?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        print!("$ ");
        stdout.flush().context("flush prompt")?;

        line.clear();
        if stdin.lock().read_line(&mut line).context("read stdin")? == 0 {
            break; // EOF
        }
        frame::write_frame(&mut writer, line.as_bytes()).context("send command")?;

        // Print the command's output until the terminator.
        loop {
            match frame::read_frame(&mut reader).context("read reply")? {
                Some(Frame::Data(bytes)) => {
                    stdout.write_all(&bytes).context("write output")?;
                    stdout.flush().context("flush output")?;
                }
                Some(Frame::End) => break,
                Some(Frame::Close) | None => return Ok(()),
            }
        }
    }
    Ok(())
}
