//! Error types for session operations
//!
//! Every failure is returned to the caller; nothing in the session aborts the
//! process. Transport-side connection errors are not represented here, they
//! arrive as events and are classified by [`crate::session::error_report`].

use crate::config::ConfigError;
use crate::session::ConnectionState;
use crate::transport::TransportError;
use thiserror::Error;

/// Session operation being attempted, used in error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Publish,
    Subscribe,
    Unsubscribe,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Start => "start",
            Operation::Publish => "publish",
            Operation::Subscribe => "subscribe",
            Operation::Unsubscribe => "unsubscribe",
        };
        f.write_str(name)
    }
}

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected: {operation} skipped while {state:?}")]
    NotConnected {
        operation: Operation,
        state: ConnectionState,
    },

    #[error("Transport rejected {operation}: {source}")]
    TransportRejected {
        operation: Operation,
        #[source]
        source: TransportError,
    },

    #[error("Broker URI is not set, not connecting")]
    MissingBrokerUri,

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Create not-connected error
    pub fn not_connected(operation: Operation, state: ConnectionState) -> Self {
        Self::NotConnected { operation, state }
    }

    /// Create transport rejection error
    pub fn rejected(operation: Operation, source: TransportError) -> Self {
        Self::TransportRejected { operation, source }
    }

    /// True for failures caused by the connection being down
    pub fn is_not_connected(&self) -> bool {
        matches!(self, SessionError::NotConnected { .. })
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
