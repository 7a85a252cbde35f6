//! Meter configuration

use std::time::Duration;

use jouletrace_shared::protocol::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use jouletrace_shared::protocol::wire::sizes::MAX_LABEL_WIRE_LEN;
use jouletrace_shared::utils::parse_duration;
use jouletrace_shared::TransportConfig;

use crate::backend::daq::{ATX_RAIL_VOLTS, DEFAULT_SHUNT_OHMS};

/// What a failed tag does to the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagFailurePolicy {
    /// Log the failure and keep the session alive. Measurement continuity
    /// beats a complete marker set.
    #[default]
    Soft,
    /// Tear the session down on the first failed tag.
    Abort,
}

impl std::str::FromStr for TagFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "soft" => Ok(TagFailurePolicy::Soft),
            "abort" => Ok(TagFailurePolicy::Abort),
            _ => anyhow::bail!("Invalid tag failure policy: {} (expected soft or abort)", s),
        }
    }
}

/// Which session handler backs the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Markers only, no acquisition. For protocol debugging.
    Log,
    /// Shunt-harness acquisition with a per-session report file.
    Daq,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(BackendKind::Log),
            "daq" => Ok(BackendKind::Daq),
            _ => anyhow::bail!("Invalid backend: {} (expected log or daq)", s),
        }
    }
}

/// Acquisition options for the DAQ backend.
#[derive(Debug, Clone)]
pub struct DaqConfig {
    /// Report file written at session end
    pub report_path: String,

    /// Optional JSON session summary path
    pub summary_path: Option<String>,

    /// Device channel range, as the acquisition driver names it
    pub channel_description: String,

    /// Samples per second per channel
    pub sample_rate_hz: u64,

    /// Samples per averaging window
    pub window_samples: usize,

    /// Supply rail voltage per channel; length sets the channel count
    pub reference_voltages: Vec<f64>,

    /// Shunt resistance of the harness, ohms
    pub shunt_ohms: f64,
}

impl DaqConfig {
    pub fn channels(&self) -> usize {
        self.reference_voltages.len()
    }
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            report_path: std::env::var("JOULETRACE_REPORT_PATH")
                .unwrap_or_else(|_| "jouletrace-report.log".to_string()),
            summary_path: std::env::var("JOULETRACE_SUMMARY_PATH").ok(),
            channel_description: std::env::var("JOULETRACE_DAQ_CHANNELS")
                .unwrap_or_else(|_| "Dev1/ai0:17".to_string()),
            sample_rate_hz: std::env::var("JOULETRACE_SAMPLE_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),
            window_samples: std::env::var("JOULETRACE_WINDOW_SAMPLES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),
            reference_voltages: ATX_RAIL_VOLTS.to_vec(),
            shunt_ohms: DEFAULT_SHUNT_OHMS,
        }
    }
}

/// Meter configuration
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Listen address for the session protocol
    pub listen_addr: String,

    /// Admin HTTP listen address (health checks + metrics)
    pub admin_addr: String,

    /// Per-message read deadline (None = wait as long as the workload takes)
    pub read_timeout: Option<Duration>,

    /// Per-message write deadline
    pub write_timeout: Option<Duration>,

    /// Cap on accepted tag label length, terminator included
    pub max_label_len: usize,

    /// What a failed tag does to the session
    pub tag_failure: TagFailurePolicy,

    /// Session handler backend
    pub backend: BackendKind,

    /// Acquisition options (used when backend is `daq`)
    pub daq: DaqConfig,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            listen_addr: std::env::var("JOULETRACE_LISTEN")
                .unwrap_or_else(|_| "0.0.0.0:9111".to_string()),
            admin_addr: std::env::var("JOULETRACE_ADMIN_LISTEN")
                .unwrap_or_else(|_| "0.0.0.0:9090".to_string()),
            read_timeout: env_duration("JOULETRACE_READ_TIMEOUT"),
            write_timeout: env_duration("JOULETRACE_WRITE_TIMEOUT")
                .or(Some(DEFAULT_WRITE_TIMEOUT)),
            max_label_len: std::env::var("JOULETRACE_MAX_LABEL_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_LABEL_WIRE_LEN),
            tag_failure: std::env::var("JOULETRACE_TAG_FAILURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            backend: std::env::var("JOULETRACE_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(BackendKind::Log),
            daq: DaqConfig::default(),
        }
    }
}

impl MeterConfig {
    /// Transport deadlines and caps for accepted connections.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            max_label_len: self.max_label_len,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_label_len == 0 {
            anyhow::bail!("Max label length must be greater than 0");
        }
        if self.max_label_len > MAX_LABEL_WIRE_LEN {
            anyhow::bail!(
                "Max label length {} exceeds the wire maximum {}",
                self.max_label_len,
                MAX_LABEL_WIRE_LEN
            );
        }

        if self.backend == BackendKind::Daq {
            if self.daq.reference_voltages.is_empty() {
                anyhow::bail!("DAQ backend needs at least one channel voltage");
            }
            if self.daq.sample_rate_hz == 0 {
                anyhow::bail!("Sample rate must be greater than 0");
            }
            if self.daq.window_samples == 0 {
                anyhow::bail!("Window size must be greater than 0");
            }
            if self.daq.shunt_ohms <= 0.0 {
                anyhow::bail!("Shunt resistance must be positive");
            }
        }

        Ok(())
    }
}

fn env_duration(name: &str) -> Option<Duration> {
    std::env::var(name).ok().and_then(|s| parse_duration(&s).ok())
}
