//! `procdctl`: the control-client CLI. Connects to the daemon's Unix
//! socket, sends one framed request, prints the response, exits 0 on
//! success and 1 on any error. See spec §6.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use procd_wire::Response;
use thiserror::Error;
use tokio::net::UnixStream;

#[derive(Debug, Error)]
enum ClientError {
    #[error("failed to connect to {path:?}: {source}")]
    Connect { path: PathBuf, source: std::io::Error },
    #[error("protocol error: {0}")]
    Protocol(#[from] procd_wire::ProtocolError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Parser)]
#[command(name = "procdctl", about = "Control client for the procd supervisor daemon")]
struct Cli {
    /// Path to the procd control socket.
    #[arg(long, default_value = "/tmp/procd.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the status of every managed process.
    Status,
    /// Start a process by name.
    Start { name: String },
    /// Stop a process by name.
    Stop { name: String },
    /// Restart a process by name.
    Restart {
        name: String,
        /// Restart even if the process is already stopped.
        #[arg(long)]
        force: bool,
    },
    /// Start every process in a group.
    Startgroup { name: String },
    /// Stop every process in a group.
    Stopgroup { name: String },
    /// Reload the configuration file the daemon was started with.
    Reload,
}

impl From<Command> for procd_wire::Request {
    fn from(command: Command) -> Self {
        match command {
            Command::Status => procd_wire::Request::Status,
            Command::Start { name } => procd_wire::Request::Start { name },
            Command::Stop { name } => procd_wire::Request::Stop { name },
            Command::Restart { name, force } => procd_wire::Request::Restart { name, force },
            Command::Startgroup { name } => procd_wire::Request::StartGroup { name },
            Command::Stopgroup { name } => procd_wire::Request::StopGroup { name },
            Command::Reload => procd_wire::Request::Reload,
        }
    }
}

async fn send(socket: &PathBuf, request: procd_wire::Request) -> Result<Response, ClientError> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|source| ClientError::Connect { path: socket.clone(), source })?;
    let payload = serde_json::to_vec(&request)?;
    procd_wire::write_message(&mut stream, &payload).await?;
    let payload = procd_wire::read_message(&mut stream).await?;
    Ok(procd_wire::decode(&payload)?)
}

fn print_response(response: &Response) {
    match response {
        Response::Ok { message, processes: Some(processes), .. } => {
            println!("{:<20} {:<10} {:>8} {:>10} {:>8}", "NAME", "STATE", "PID", "UPTIME", "HEALTH");
            for p in processes {
                println!(
                    "{:<20} {:<10} {:>8} {:>10} {:>8}",
                    p.name,
                    p.state,
                    p.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".to_string()),
                    p.uptime_seconds.map(|s| format!("{s}s")).unwrap_or_else(|| "-".to_string()),
                    p.health.clone().unwrap_or_else(|| "-".to_string()),
                );
            }
            let _ = message;
        }
        Response::Ok { message, reload: Some(diff), .. } => {
            println!("{message}");
            println!("added:   {}", diff.added.join(", "));
            println!("removed: {}", diff.removed.join(", "));
            println!("changed: {}", diff.changed.join(", "));
        }
        Response::Ok { message, .. } => println!("{message}"),
        Response::Error { code, message } => eprintln!("error [{code:?}]: {message}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let request = procd_wire::Request::from(cli.command);

    match send(&cli.socket, request).await {
        Ok(response) => {
            let ok = response.is_ok();
            print_response(&response);
            if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
