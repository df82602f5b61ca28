//! Configuration for the discovery engine
//!
//! Timing defaults follow common UPnP control point behaviour: a sweep every
//! ten seconds, each search sent three times one second apart, and a device
//! considered gone after six silent sweeps.

use std::time::Duration;

use crate::error::{DiscoveryError, Result};

/// Configuration for the [`DiscoveryEngine`](crate::DiscoveryEngine)
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Interval between periodic eviction + search sweeps
    /// Default: 10 seconds
    pub rescan_interval: Duration,

    /// Number of sweeps a silent device survives before eviction
    /// Default: 6
    pub rescan_attempts: u32,

    /// Liveness window; records not seen within it are evicted
    /// Default: rescan_interval * rescan_attempts (60 seconds)
    pub timeout: Duration,

    /// Delay before the first sweep after `start()`
    /// Default: 100 milliseconds
    pub initial_delay: Duration,

    /// How many times each search request is sent per sweep
    /// Default: 3
    pub search_repeats: u32,

    /// Spacing between repeated search sends
    /// Default: 1 second
    pub search_spacing: Duration,

    /// Value of the MX header in search requests
    /// Default: 5
    pub search_mx: u8,

    /// Port assigned to records before their description is resolved
    /// Default: 3001
    pub default_port: u16,

    /// Timeout for fetching device description documents
    /// Default: 5 seconds
    pub http_timeout: Duration,

    /// Maximum number of concurrent description resolutions
    /// Default: 4
    pub resolver_threads: usize,

    /// Socket read timeout used by receive loops to observe `close()`
    /// Default: 250 milliseconds
    pub receive_poll_interval: Duration,

    /// Receive buffer size for a single datagram
    /// Default: 2048
    pub max_datagram_size: usize,

    /// USER-AGENT header sent with search requests
    pub user_agent: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let rescan_interval = Duration::from_secs(10);
        let rescan_attempts = 6;
        Self {
            rescan_interval,
            rescan_attempts,
            timeout: rescan_interval * rescan_attempts,
            initial_delay: Duration::from_millis(100),
            search_repeats: 3,
            search_spacing: Duration::from_secs(1),
            search_mx: 5,
            default_port: 3001,
            http_timeout: Duration::from_secs(5),
            resolver_threads: 4,
            receive_poll_interval: Duration::from_millis(250),
            max_datagram_size: 2048,
            user_agent: format!(
                "{}/{} UPnP/1.1",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl DiscoveryConfig {
    /// Create a new DiscoveryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Short intervals, useful for demos and tests against local fakes
    pub fn fast() -> Self {
        Self {
            rescan_interval: Duration::from_millis(500),
            rescan_attempts: 4,
            timeout: Duration::from_secs(2),
            initial_delay: Duration::from_millis(10),
            search_spacing: Duration::from_millis(50),
            http_timeout: Duration::from_secs(2),
            receive_poll_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Set the rescan interval, keeping `timeout` at `interval * rescan_attempts`
    pub fn with_rescan_interval(mut self, interval: Duration) -> Self {
        self.rescan_interval = interval;
        self.timeout = interval * self.rescan_attempts;
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.rescan_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "Rescan interval must be greater than 0".to_string(),
            ));
        }

        if self.timeout < self.rescan_interval {
            return Err(DiscoveryError::InvalidConfig(
                "Timeout must not be shorter than the rescan interval".to_string(),
            ));
        }

        if self.search_repeats == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "Search repeats must be greater than 0".to_string(),
            ));
        }

        if self.resolver_threads == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "Resolver threads must be greater than 0".to_string(),
            ));
        }

        if self.receive_poll_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "Receive poll interval must be greater than 0".to_string(),
            ));
        }

        if self.max_datagram_size == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "Datagram buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
