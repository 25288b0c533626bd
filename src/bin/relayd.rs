//! relay daemon - broadcast chat server
//!
//! Accepts TCP connections and relays every line a client sends to all
//! other connected clients. Lines typed on the daemon's own terminal are
//! broadcast to everyone.
//!
//! # Usage
//!
//! ```bash
//! # Listen on 0.0.0.0:12345
//! relayd
//!
//! # Custom address
//! relayd --host 127.0.0.1 --port 4000
//! RELAY_PORT=4000 relayd
//!
//! # Without operator input (e.g. under a service manager)
//! relayd --no-admin
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_core::RelayConfig;
use relayd::{AdminInjector, RelayServer};

/// How long to wait for in-flight tasks (and the stdin reader) on exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// relay daemon - broadcast chat server
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Config file (default: ~/.config/relay/relay.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not broadcast lines read from stdin
    #[arg(long)]
    no_admin: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run_daemon(args));

    // stdin reads cannot be cancelled; don't wait on them forever
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    result
}

/// Builds the effective config: file, then environment, then flags.
fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config =
        RelayConfig::discover(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_server_env(|key| env::var(key).ok())
        .context("Invalid environment override")?;

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    Ok(config)
}

async fn run_daemon(args: Args) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_core=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "relay daemon starting"
    );

    let config = load_config(&args)?;

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let server = RelayServer::bind(config.server.clone(), cancel_token.clone())
        .await
        .context("Failed to start server")?;

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    if args.no_admin {
        info!("Admin input disabled");
    } else {
        let injector = AdminInjector::new(server.broadcaster(), config.server.max_frame_len);
        let admin_token = cancel_token.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            let injected = injector.run(stdin, admin_token).await;
            info!(injected, "Admin injector stopped");
        });
    }

    server.run().await;

    info!("relay daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
