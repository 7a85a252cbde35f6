//! Full-loop tests: the real client binary logic against a real meter
//! over TCP, demo workload included.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use jouletrace_client::ClientConfig;
use jouletrace_meter::backend::daq::{DaqHandler, SyntheticSource};
use jouletrace_meter::backend::log::LogHandler;
use jouletrace_meter::config::{DaqConfig, TagFailurePolicy};
use jouletrace_meter::server::MeterServer;
use jouletrace_shared::TransportConfig;

fn client_config(bound: SocketAddr, sizes: Vec<usize>) -> ClientConfig {
    ClientConfig {
        server_addr: bound.ip().to_string(),
        port: bound.port(),
        retry_attempts: 1,
        retry_delay: Duration::from_millis(10),
        workload_sizes: sizes,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_demo_workload_against_log_meter() -> Result<()> {
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut server =
        MeterServer::bind(addr, TransportConfig::default(), TagFailurePolicy::Soft).await?;
    let bound = server.local_addr()?;
    let cancel = CancellationToken::new();

    let driver = tokio::spawn(async move {
        let mut handler = LogHandler::new();
        server.serve_once(&mut handler, &cancel).await
    });

    jouletrace_client::run(client_config(bound, vec![2, 3])).await?;

    let summary = driver.await??;
    // Three tags per size, timestamps from the client clock.
    assert_eq!(summary.tag_count, 6);
    assert_eq!(summary.tags[0].label, "start n=2");
    assert_eq!(summary.tags[3].label, "start n=3");
    assert!(summary.ended_at_ns >= summary.started_at_ns);
    let offsets: Vec<u64> = summary.tags.iter().map(|t| t.offset_ns).collect();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    Ok(())
}

#[tokio::test]
async fn test_demo_workload_against_daq_meter() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let report_path = dir.path().join("report.log").to_str().unwrap().to_string();
    let config = DaqConfig {
        report_path: report_path.clone(),
        summary_path: None,
        channel_description: "Dev1/ai0:1".to_string(),
        sample_rate_hz: 1_000,
        window_samples: 8,
        reference_voltages: vec![3.3, 12.0],
        shunt_ohms: 0.003,
    };

    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut server =
        MeterServer::bind(addr, TransportConfig::default(), TagFailurePolicy::Soft).await?;
    let bound = server.local_addr()?;
    let cancel = CancellationToken::new();

    let driver = tokio::spawn(async move {
        let source = SyntheticSource::from_config(&config);
        let mut handler = DaqHandler::new(config, Box::new(source));
        server.serve_once(&mut handler, &cancel).await
    });

    jouletrace_client::run(client_config(bound, vec![2, 3])).await?;
    driver.await??;

    // The report carries the tag table the plotting tooling reads.
    let report = std::fs::read_to_string(&report_path)?;
    assert!(report.contains("CHANNEL DESCRIPTION: Dev1/ai0:1"));
    assert!(report.contains("NUMBER OF CHANNELS: 2"));
    // Six workload tags plus the session bounds.
    assert!(report.contains("NUMBER OF TIMESTAMPS: 8"));
    assert!(report.contains("session start"));
    assert!(report.contains("\tstart n=2"));
    assert!(report.contains("\tmatmul start"));
    assert!(report.contains("\tmatmul end"));
    assert!(report.contains("\tstart n=3"));
    assert!(report.contains("session end"));
    Ok(())
}

#[tokio::test]
async fn test_connect_failure_after_retries() -> Result<()> {
    // Bind and immediately drop to get a port with nothing behind it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let dead = listener.local_addr()?;
    drop(listener);

    let mut config = client_config(dead, vec![2]);
    config.retry_attempts = 2;
    config.retry_delay = Duration::from_millis(5);

    assert!(jouletrace_client::run(config).await.is_err());
    Ok(())
}
