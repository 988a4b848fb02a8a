//! procd: entry point. Loads configuration, starts the Supervisor, binds
//! the RPC socket, and waits on the signal set from spec §4.6.

use std::path::PathBuf;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use procd::DaemonConfig;

#[derive(Debug, Parser)]
#[command(name = "procd", about = "Unix process supervisor daemon")]
struct Args {
    /// Path to the procd configuration file.
    #[arg(short, long, default_value = "/etc/procd.conf")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match DaemonConfig::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, path = %args.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };
    let socket_path = config.socket_path.clone();

    let supervisor = match procd::Supervisor::start(config).await {
        Ok(supervisor) => supervisor,
        Err(error) => {
            error!(%error, "failed to start supervisor");
            std::process::exit(1);
        }
    };

    let listener = match procd::rpc::bind(&socket_path) {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, path = %socket_path.display(), "failed to bind rpc socket");
            std::process::exit(1);
        }
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    let rpc_task = tokio::spawn(procd::rpc::serve(listener, supervisor.clone(), cancel.clone()));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    info!(socket = %socket_path.display(), "procd ready");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sighup.recv() => {
                warn!("received SIGHUP, reload must be requested via procdctl reload");
            }
        }
    }

    cancel.cancel();
    let _ = rpc_task.await;
    supervisor.shutdown().await;
    info!("procd stopped");
    Ok(())
}
