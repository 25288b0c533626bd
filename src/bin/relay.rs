//! relay - terminal chat client
//!
//! Connects to a relay daemon, prints messages from other users as they
//! arrive, and sends each typed line as `"{name}: {line}"`. Type `exit`
//! to leave.
//!
//! # Usage
//!
//! ```text
//! relay                          # connect to 127.0.0.1:12345, prompt for a name
//! relay --name alice             # skip the prompt
//! relay --host chat.lan -p 4000  # another server
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use relay_client::{ClientError, ClientSession};
use relay_core::RelayConfig;

/// How long to wait for the blocked stdin reader on exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

/// relay - terminal chat client
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Args {
    /// Config file (default: ~/.config/relay/relay.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Display name (prompted for when not set)
    #[arg(short, long)]
    name: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they don't mix with chat output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run_client(args));
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    result
}

/// Builds the effective config: file, then environment, then flags.
fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config =
        RelayConfig::discover(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_client_env(|key| env::var(key).ok())
        .context("Invalid environment override")?;

    if let Some(host) = &args.host {
        config.client.host = host.clone();
    }
    if let Some(port) = args.port {
        config.client.port = port;
    }
    if let Some(name) = &args.name {
        config.client.name = Some(name.clone());
    }

    Ok(config)
}

async fn run_client(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let session = ClientSession::connect(&config.client).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let session = match &config.client.name {
        Some(_) => session,
        None => {
            let name = prompt_name(&mut stdin).await?;
            session.with_name(name)?
        }
    };

    match session.run(stdin, tokio::io::stdout()).await {
        Ok(end) => {
            debug!(end = ?end, "Session finished");
            Ok(())
        }
        Err(e @ ClientError::Send(_)) => {
            println!("Error sending message.");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn prompt_name<R>(stdin: &mut R) -> Result<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Enter your name: ").await?;
    stdout.flush().await?;

    let mut name = String::new();
    stdin
        .read_line(&mut name)
        .await
        .context("Failed to read name")?;
    Ok(name.trim().to_string())
}
