//! JouleTrace meter
//!
//! Session server for power measurement. Listens for one instrumented
//! workload at a time, measures while its session is open, and writes the
//! report that correlates power readings with the workload's tags.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jouletrace_meter::admin;
use jouletrace_meter::backend::daq::{DaqHandler, SyntheticSource};
use jouletrace_meter::backend::log::LogHandler;
use jouletrace_meter::backend::SessionHandler;
use jouletrace_meter::config::{BackendKind, MeterConfig};
use jouletrace_meter::server::MeterServer;

#[derive(Parser, Debug)]
#[command(name = "jouletrace-meter")]
#[command(about = "Power measurement session server", long_about = None)]
#[command(version)]
struct Args {
    /// Listen address for the session protocol
    #[arg(short, long)]
    listen: Option<String>,

    /// Admin HTTP listen address (health checks + metrics)
    #[arg(long)]
    admin: Option<String>,

    /// Session backend: log or daq
    #[arg(short, long)]
    backend: Option<String>,

    /// Report file for the DAQ backend
    #[arg(short, long)]
    report: Option<String>,

    /// Serve a single session, then exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().map_err(|e| anyhow::anyhow!(e))?;

    let args = Args::parse();
    init_tracing(args.verbose)?;

    let mut config = MeterConfig::default();
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(admin) = args.admin {
        config.admin_addr = admin;
    }
    if let Some(backend) = args.backend {
        config.backend = backend.parse()?;
    }
    if let Some(report) = args.report {
        config.daq.report_path = report;
    }
    config.validate()?;

    info!("Starting JouleTrace meter on {}", config.listen_addr);
    info!("Configuration: {:?}", config);

    let listen_addr: SocketAddr =
        config.listen_addr.parse().context("Invalid listen address")?;
    let admin_addr: SocketAddr =
        config.admin_addr.parse().context("Invalid admin address")?;

    let ready = Arc::new(AtomicBool::new(false));
    tokio::spawn(admin::serve_admin(admin_addr, ready.clone()));

    let mut server =
        MeterServer::bind(listen_addr, config.transport(), config.tag_failure).await?;
    ready.store(true, Ordering::Relaxed);
    info!("Session listener bound on {}", server.local_addr()?);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let mut handler: Box<dyn SessionHandler> = match config.backend {
        BackendKind::Log => Box::new(LogHandler::new()),
        BackendKind::Daq => {
            // No acquisition driver is linked here; the synthetic source
            // paces windows like the configured device. A hardware build
            // swaps in its own SampleSource.
            let source = SyntheticSource::from_config(&config.daq);
            Box::new(DaqHandler::new(config.daq.clone(), Box::new(source)))
        }
    };

    if args.once {
        let summary = server.serve_once(handler.as_mut(), &cancel).await?;
        info!(
            duration_ns = summary.duration_ns,
            tags = summary.tag_count,
            "Session complete"
        );
    } else {
        server.serve(handler.as_mut(), &cancel).await?;
    }

    Ok(())
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
