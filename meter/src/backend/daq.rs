//! Acquisition backend
//!
//! Measures per-rail power across a shunt-instrumented supply harness
//! while a session is open. The acquisition hardware sits behind
//! [`SampleSource`], so the same handler runs against a bench DAQ driver
//! or a synthetic source.
//!
//! A background task owns the source for the duration of a session: it
//! reads sample windows, averages each channel, converts the shunt
//! voltage drop to power, and buffers one [`WindowRecord`] per window.
//! `end` stops the task, takes the source back for the next session, and
//! writes the report file:
//!
//! ```text
//! CHANNEL DESCRIPTION: Dev1/ai0:17
//! START TIME: <ns>
//! NUMBER OF CHANNELS: 18
//! SAMPLE RATE: 1000
//! NUMBER OF TIMESTAMPS: <n>
//!
//! <window power readings, one line per window, watts per channel>
//!
//! <ns>\tsession start
//! <ns>\t<tag label>
//! <ns>\tsession end
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jouletrace_shared::utils::time::system_time_nanos;

use super::{BackendError, SessionHandler, SessionSummary};
use crate::config::DaqConfig;
use crate::markers::{Marker, MarkerLog};
use crate::metrics;

/// Shunt resistance of the measurement harness, ohms.
pub const DEFAULT_SHUNT_OHMS: f64 = 0.003;

/// Per-channel supply rail voltages for a 24-pin ATX harness split across
/// two acquisition modules.
pub const ATX_RAIL_VOLTS: [f64; 18] = [
    3.3, 3.3, 5.0, 5.0, // module 1, channels 0-3
    12.0, 12.0, 3.3, 3.3, // module 1, channels 4-7
    -12.0, 5.0, 5.0, 5.0, // module 1, channels 16-19
    12.0, 1.0, 12.0, 12.0, 12.0, 12.0, // module 3, channels 0-5
];

/// Convert one averaged shunt reading to rail power in watts.
///
/// `reading` is the voltage drop across the shunt; the current through it
/// is `reading / shunt_ohms`, and the load sees the rail voltage minus
/// the drop.
pub fn shunt_power(reading: f64, rail_volts: f64, shunt_ohms: f64) -> f64 {
    (reading / shunt_ohms) * (rail_volts - reading)
}

/// One window of raw readings, one inner vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    pub channels: Vec<Vec<f64>>,
}

impl SampleWindow {
    pub fn samples_per_channel(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

/// Per-window averaged power, as buffered during a session.
#[derive(Debug, Clone, Serialize)]
pub struct WindowRecord {
    /// Mean power per channel over the window, watts.
    pub channel_power: Vec<f64>,
    /// Samples per channel in this window.
    pub samples: usize,
    /// Meter-side receipt time, nanoseconds since epoch.
    pub received_at_ns: u64,
}

/// Produces sample windows from an acquisition device.
///
/// The handler owns exactly one source and moves it into the sampling
/// task while a session is open. `read_window` may block for as long as
/// one window takes to fill; cancellation happens around it, not in it.
#[async_trait]
pub trait SampleSource: Send {
    /// Arm the device. Called once per session, before any reads.
    async fn start(&mut self) -> Result<(), BackendError>;

    /// Read the next window of raw shunt readings.
    async fn read_window(&mut self) -> Result<SampleWindow, BackendError>;

    /// Disarm the device. Called once per session, after the last read.
    async fn stop(&mut self) -> Result<(), BackendError>;
}

/// Synthetic source producing a constant reading on every channel.
///
/// Stands in for bench hardware in tests and hardware-less deployments;
/// windows are paced to the configured sample rate.
pub struct SyntheticSource {
    channels: usize,
    samples_per_window: usize,
    reading_volts: f64,
    interval: Duration,
}

impl SyntheticSource {
    pub fn new(
        channels: usize,
        samples_per_window: usize,
        reading_volts: f64,
        interval: Duration,
    ) -> Self {
        Self { channels, samples_per_window, reading_volts, interval }
    }

    /// Pace windows the way the configured device would produce them.
    pub fn from_config(config: &DaqConfig) -> Self {
        let interval = Duration::from_secs_f64(
            config.window_samples as f64 / config.sample_rate_hz.max(1) as f64,
        );
        // Half the rated shunt drop: a plausible mid-load reading.
        Self::new(config.channels(), config.window_samples, config.shunt_ohms / 2.0, interval)
    }
}

#[async_trait]
impl SampleSource for SyntheticSource {
    async fn start(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn read_window(&mut self) -> Result<SampleWindow, BackendError> {
        tokio::time::sleep(self.interval).await;
        let channel = vec![self.reading_volts; self.samples_per_window];
        Ok(SampleWindow { channels: vec![channel; self.channels] })
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// What the sampling task hands back when a session ends.
struct SamplerOutcome {
    source: Box<dyn SampleSource>,
    windows: Vec<WindowRecord>,
    samples_read: u64,
    error: Option<BackendError>,
}

/// Acquisition-backed session handler.
pub struct DaqHandler {
    config: DaqConfig,
    source: Option<Box<dyn SampleSource>>,
    markers: MarkerLog,
    started_at: Option<u64>,
    report: Option<File>,
    cancel: Option<CancellationToken>,
    sampler: Option<JoinHandle<SamplerOutcome>>,
}

impl DaqHandler {
    pub fn new(config: DaqConfig, source: Box<dyn SampleSource>) -> Self {
        Self {
            config,
            source: Some(source),
            markers: MarkerLog::new(),
            started_at: None,
            report: None,
            cancel: None,
            sampler: None,
        }
    }
}

#[async_trait]
impl SessionHandler for DaqHandler {
    async fn begin(&mut self, timestamp: u64) -> Result<(), BackendError> {
        if self.sampler.is_some() {
            return Err(BackendError::InvalidState("begin while a session is open"));
        }
        let mut source = self
            .source
            .take()
            .ok_or(BackendError::InvalidState("sample source not available"))?;

        // Fail the session up front if the report cannot be created or the
        // device will not arm; the client then never gets its handshake.
        // The source goes back either way so the next begin can retry.
        let report = match File::create(&self.config.report_path) {
            Ok(report) => report,
            Err(e) => {
                self.source = Some(source);
                return Err(e.into());
            }
        };
        if let Err(e) = source.start().await {
            self.source = Some(source);
            return Err(e);
        }

        self.report = Some(report);
        self.started_at = Some(timestamp);

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let shunt_ohms = self.config.shunt_ohms;
        let rail_volts = self.config.reference_voltages.clone();
        let handle = tokio::spawn(async move {
            let mut windows = Vec::new();
            let mut samples_read: u64 = 0;
            let mut error = None;
            loop {
                let window = tokio::select! {
                    _ = child.cancelled() => break,
                    window = source.read_window() => window,
                };
                match window {
                    Ok(window) => {
                        let samples = window.samples_per_channel();
                        if samples == 0 {
                            continue;
                        }
                        samples_read += samples as u64;
                        let power = channel_means(&window.channels)
                            .iter()
                            .zip(&rail_volts)
                            .map(|(reading, volts)| shunt_power(*reading, *volts, shunt_ohms))
                            .collect();
                        windows.push(WindowRecord {
                            channel_power: power,
                            samples,
                            received_at_ns: system_time_nanos(),
                        });
                        metrics::DAQ_WINDOWS.inc();
                        debug!(samples, total = samples_read, "window acquired");
                    }
                    Err(e) => {
                        error!("acquisition read failed: {}", e);
                        error = Some(e);
                        break;
                    }
                }
            }
            if let Err(e) = source.stop().await {
                error!("acquisition stop failed: {}", e);
                if error.is_none() {
                    error = Some(e);
                }
            }
            SamplerOutcome { source, windows, samples_read, error }
        });

        self.cancel = Some(cancel);
        self.sampler = Some(handle);
        info!(timestamp, channels = self.config.channels(), "acquisition started");
        Ok(())
    }

    async fn tag(&mut self, timestamp: u64, label: &str) -> Result<(), BackendError> {
        self.markers.record(label, timestamp);
        debug!(timestamp, label, "tag recorded");
        Ok(())
    }

    async fn end(&mut self, timestamp: u64) -> Result<SessionSummary, BackendError> {
        let started_at = self
            .started_at
            .take()
            .ok_or(BackendError::InvalidState("end without begin"))?;
        let cancel = self
            .cancel
            .take()
            .ok_or(BackendError::InvalidState("sampler not running"))?;
        let handle = self
            .sampler
            .take()
            .ok_or(BackendError::InvalidState("sampler not running"))?;

        cancel.cancel();
        let outcome = handle
            .await
            .map_err(|e| BackendError::Acquisition(format!("sampler task panicked: {e}")))?;
        self.source = Some(outcome.source);

        // Write the report even when acquisition broke mid-session; the
        // windows gathered so far are still worth keeping.
        let markers = self.markers.drain();
        let report = self
            .report
            .take()
            .ok_or(BackendError::InvalidState("report file not open"))?;
        let mut writer = BufWriter::new(report);
        write_report(
            &mut writer,
            &self.config,
            started_at,
            timestamp,
            &outcome.windows,
            &markers,
        )?;
        writer.flush()?;

        let summary =
            SessionSummary::from_session(started_at, timestamp, &markers, outcome.samples_read);
        if let Some(path) = &self.config.summary_path {
            write_summary(path, &summary)?;
        }

        if let Some(error) = outcome.error {
            return Err(error);
        }
        info!(
            windows = outcome.windows.len(),
            samples = outcome.samples_read,
            report = %self.config.report_path,
            "acquisition stopped"
        );
        Ok(summary)
    }

    async fn abort(&mut self) {
        self.started_at = None;
        self.report = None;
        let dropped_tags = self.markers.len();
        self.markers.drain();
        if let (Some(cancel), Some(handle)) = (self.cancel.take(), self.sampler.take()) {
            cancel.cancel();
            match handle.await {
                Ok(outcome) => {
                    self.source = Some(outcome.source);
                    warn!(
                        dropped_windows = outcome.windows.len(),
                        dropped_tags,
                        "session aborted, measurements discarded"
                    );
                }
                // The source went down with the task; later begins
                // report it missing.
                Err(e) => error!("sampler task lost during abort: {}", e),
            }
        }
    }
}

fn channel_means(channels: &[Vec<f64>]) -> Vec<f64> {
    channels
        .iter()
        .map(|samples| {
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        })
        .collect()
}

fn write_report<W: Write>(
    writer: &mut W,
    config: &DaqConfig,
    started_at: u64,
    ended_at: u64,
    windows: &[WindowRecord],
    markers: &[Marker],
) -> Result<(), BackendError> {
    // The timestamp table also carries the session bounds.
    let timestamp_rows = markers.len() + 2;

    writeln!(writer, "CHANNEL DESCRIPTION: {}", config.channel_description)?;
    writeln!(writer, "START TIME: {started_at}")?;
    writeln!(writer, "NUMBER OF CHANNELS: {}", config.channels())?;
    writeln!(writer, "SAMPLE RATE: {}", config.sample_rate_hz)?;
    writeln!(writer, "NUMBER OF TIMESTAMPS: {timestamp_rows}")?;
    writeln!(writer)?;

    for window in windows {
        let line = window
            .channel_power
            .iter()
            .map(|power| format!("{power:.6}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)?;

    writeln!(writer, "{started_at}\tsession start")?;
    for marker in markers {
        writeln!(writer, "{}\t{}", marker.timestamp, marker.label)?;
    }
    writeln!(writer, "{ended_at}\tsession end")?;
    Ok(())
}

fn write_summary(path: &str, summary: &SessionSummary) -> Result<(), BackendError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), summary)?;
    Ok(())
}
