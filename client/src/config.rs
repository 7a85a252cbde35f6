//! Configuration types for the session client

use std::time::Duration;

use jouletrace_shared::protocol::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use jouletrace_shared::protocol::wire::sizes::MAX_LABEL_WIRE_LEN;
use jouletrace_shared::TransportConfig;

use crate::workload;

/// Largest matrix size the demo workload accepts.
const MAX_WORKLOAD_SIZE: usize = 4096;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Meter hostname or address
    pub server_addr: String,

    /// Meter port
    pub port: u16,

    /// Deadline for the TCP connect
    pub connect_timeout: Duration,

    /// Deadline for the handshake answer; the only read the client makes
    pub handshake_timeout: Duration,

    /// Per-message write deadline
    pub write_timeout: Option<Duration>,

    /// Connect attempts before giving up
    pub retry_attempts: u32,

    /// Initial delay between connect attempts; doubles per attempt
    pub retry_delay: Duration,

    /// Cap on the backoff delay
    pub retry_max_delay: Duration,

    /// Matrix sizes for the demo workload
    pub workload_sizes: Vec<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: std::env::var("JOULETRACE_SERVER")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("JOULETRACE_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(9111),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            workload_sizes: workload::DEFAULT_SIZES.to_vec(),
        }
    }
}

impl ClientConfig {
    /// Transport deadlines for the meter connection. The read deadline is
    /// always set: the one message the client ever waits for is the
    /// handshake, and that answer is either prompt or wrong.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout,
            read_timeout: Some(self.handshake_timeout),
            write_timeout: self.write_timeout,
            max_label_len: MAX_LABEL_WIRE_LEN,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workload_sizes.is_empty() {
            anyhow::bail!("Workload needs at least one matrix size");
        }
        for &n in &self.workload_sizes {
            if n == 0 {
                anyhow::bail!("Matrix size must be greater than 0");
            }
            if n > MAX_WORKLOAD_SIZE {
                anyhow::bail!("Matrix size {} too large (max {})", n, MAX_WORKLOAD_SIZE);
            }
        }
        if self.handshake_timeout.is_zero() {
            anyhow::bail!("Handshake timeout must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let valid = ClientConfig::default();
        assert!(valid.validate().is_ok());

        let mut no_sizes = ClientConfig::default();
        no_sizes.workload_sizes.clear();
        assert!(no_sizes.validate().is_err());

        let mut zero_size = ClientConfig::default();
        zero_size.workload_sizes = vec![100, 0];
        assert!(zero_size.validate().is_err());

        let mut huge_size = ClientConfig::default();
        huge_size.workload_sizes = vec![MAX_WORKLOAD_SIZE + 1];
        assert!(huge_size.validate().is_err());
    }

    #[test]
    fn test_transport_always_sets_read_deadline() {
        let config = ClientConfig::default();
        let transport = config.transport();
        assert_eq!(transport.read_timeout, Some(config.handshake_timeout));
        assert_eq!(transport.max_label_len, MAX_LABEL_WIRE_LEN);
    }
}
