//! JouleTrace client
//!
//! Demo workload driver: connects to the meter, opens a session, runs a
//! matrix multiplication ladder with tagged phases, and ends the session
//! so the meter writes its report.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jouletrace_client::ClientConfig;

#[derive(Parser, Debug)]
#[command(name = "jouletrace-client")]
#[command(about = "Measurement session demo client", long_about = None)]
#[command(version)]
struct Args {
    /// Meter hostname or address
    #[arg(short, long)]
    server: Option<String>,

    /// Meter port
    #[arg(short, long)]
    port: Option<u16>,

    /// Comma-separated matrix sizes for the demo workload
    #[arg(long)]
    sizes: Option<String>,

    /// Connect attempts before giving up
    #[arg(long)]
    attempts: Option<u32>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().map_err(|e| anyhow::anyhow!(e))?;

    let args = Args::parse();
    init_tracing(args.verbose)?;

    info!("Starting JouleTrace client");

    let mut config = ClientConfig::default();
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(sizes) = args.sizes {
        config.workload_sizes = parse_sizes(&sizes)?;
    }
    if let Some(attempts) = args.attempts {
        config.retry_attempts = attempts;
    }

    info!("Configuration: {:?}", config);

    jouletrace_client::run(config).await
}

fn parse_sizes(s: &str) -> Result<Vec<usize>> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("Invalid matrix size: {}", part))
        })
        .collect()
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
