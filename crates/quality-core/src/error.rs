//! Error types for the quality monitoring library

use thiserror::Error;

use crate::types::ConnectionId;

/// Result type for quality monitoring operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring and adapting media quality
#[derive(Debug, Error)]
pub enum Error {
    /// The stats pull failed for this tick
    #[error("Stats unavailable for {connection_id}: {reason}")]
    StatsUnavailable {
        connection_id: ConnectionId,
        reason: String,
    },

    /// The transport reports the connection as closed
    #[error("Connection closed: {connection_id}")]
    ConnectionClosed { connection_id: ConnectionId },

    /// Configuration rejected at setup time
    #[error("Invalid configuration: {message}")]
    ConfigurationInvalid { message: String },

    /// Not enough samples accumulated for the requested computation
    #[error("Insufficient history: need {required} samples, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    /// The media control sink refused a command
    #[error("Media control sink error: {message}")]
    Sink { message: String },

    /// Configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration document could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Create a stats unavailable error
    pub fn stats_unavailable(connection_id: ConnectionId, reason: impl Into<String>) -> Self {
        Self::StatsUnavailable {
            connection_id,
            reason: reason.into(),
        }
    }

    /// Create a connection closed error
    pub fn connection_closed(connection_id: ConnectionId) -> Self {
        Self::ConnectionClosed { connection_id }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid {
            message: message.into(),
        }
    }

    /// Create a sink error
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }

    /// Whether monitoring continues after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StatsUnavailable { .. } | Self::InsufficientHistory { .. } | Self::Sink { .. }
        )
    }
}
