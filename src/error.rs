//! Error types surfaced by the transport
//!
//! Every way `connect` can fail maps to exactly one [`TransportError`] variant.
//! Errors raised by raw network connections are [`NetworkError`]s and travel
//! inside the transport error as its source.

use thiserror::Error;

pub use crate::network::NetworkError;

/// Failure of a single connection attempt
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unable to create connection to '{peer}'")]
    FactoryFailure { peer: String },

    #[error("There is no address to get from '{host}'")]
    ResolutionFailure { host: String, peer: String },

    #[error("Unable to connect to '{peer}'")]
    ConnectFailure {
        peer: String,
        #[source]
        source: NetworkError,
    },

    #[error("Unable to start processing messages for '{peer}'")]
    ProcessStartFailure {
        peer: String,
        #[source]
        source: NetworkError,
    },
}

impl TransportError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::FactoryFailure { .. } => "factory_failure",
            TransportError::ResolutionFailure { .. } => "resolution_failure",
            TransportError::ConnectFailure { .. } => "connect_failure",
            TransportError::ProcessStartFailure { .. } => "process_start_failure",
        }
    }

    /// Best-available label of the peer the attempt was aimed at
    pub fn peer(&self) -> &str {
        match self {
            TransportError::FactoryFailure { peer }
            | TransportError::ResolutionFailure { peer, .. }
            | TransportError::ConnectFailure { peer, .. }
            | TransportError::ProcessStartFailure { peer, .. } => peer,
        }
    }

    /// Human-readable message including the underlying cause, if any
    pub fn detailed_message(&self) -> String {
        match self {
            TransportError::ConnectFailure { source, .. }
            | TransportError::ProcessStartFailure { source, .. } => format!("{self}: {source}"),
            TransportError::ResolutionFailure { peer, .. } => format!("{self} (peer '{peer}')"),
            TransportError::FactoryFailure { .. } => self.to_string(),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
