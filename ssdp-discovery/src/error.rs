//! Error types for the discovery engine.

use thiserror::Error;

/// Error type for discovery operations.
///
/// Most failures inside the engine are expected on a shared network (garbage
/// datagrams, unreachable devices) and never reach the caller; they surface
/// here only from the lower-level building blocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Network-related errors (socket creation, HTTP requests, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Parsing errors (XML, SSDP packet, URLs)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The transport was closed while a receive was in flight
    #[error("Transport closed")]
    TransportClosed,

    /// No local network address is available to bind to
    #[error("No local network address available")]
    NoAddress,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Discovery filter rejected when registering
    #[error("Invalid discovery filter: {0}")]
    InvalidFilter(String),

    /// Background threads or the runtime could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl DiscoveryError {
    /// True for the expected shutdown condition of a receive loop.
    pub fn is_closed(&self) -> bool {
        matches!(self, DiscoveryError::TransportClosed)
    }
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
