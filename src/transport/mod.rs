//! Transport layer between the session and the MQTT protocol engine
//!
//! The session never touches sockets or packets. It drives a [`Transport`]
//! through a narrow start/publish/subscribe/unsubscribe/destroy interface and
//! receives [`TransportEvent`]s back through the [`EventSink`] it handed over
//! at start time.

use crate::config::SessionConfig;
use crate::protocol::QoS;
use std::sync::Arc;
use thiserror::Error;

pub mod rumqtt;

pub use rumqtt::RumqttcTransport;

/// Protocol engine driven by the session
///
/// All methods must return promptly: publish/subscribe/unsubscribe report only
/// whether the request was accepted for sending, never whether the broker
/// acknowledged it.
pub trait Transport: Send + Sync + 'static {
    /// Begin connecting with a snapshot of the configuration.
    ///
    /// Events for this connection must be delivered through `events`, and not
    /// before `start` returns. A second call replaces the previous connection;
    /// a call that fails must leave the previous connection running.
    fn start(&self, config: &SessionConfig, events: EventSink) -> Result<(), TransportError>;

    /// Queue a message for publishing
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), TransportError>;

    /// Queue a subscription request
    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError>;

    /// Queue an unsubscribe request
    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError>;

    /// Tear down the connection and release its resources
    fn destroy(&self);
}

/// Events a transport reports back to the session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// Inbound message on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Connection-level failure, classified for reporting
    Error(ErrorCode),
}

/// Structured error code carried by [`TransportEvent::Error`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error recorded
    None,
    /// Socket or transport-layer fault
    Transport(TransportFault),
    /// Broker refused the connection
    ConnectionRefused(RefusalCode),
    /// Unrecognised error type
    Unknown(i32),
}

/// Socket-level detail for [`ErrorCode::Transport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    /// OS error number reported by the socket, when known
    pub errno: Option<i32>,
    /// Engine-provided description
    pub detail: String,
}

/// CONNACK return codes for refused connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalCode {
    Accepted,
    BadProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Other(u8),
}

impl RefusalCode {
    /// Map a raw MQTT 3.1.1 CONNACK return code
    pub fn from_return_code(code: u8) -> Self {
        match code {
            0 => RefusalCode::Accepted,
            1 => RefusalCode::BadProtocolVersion,
            2 => RefusalCode::IdentifierRejected,
            3 => RefusalCode::ServerUnavailable,
            4 => RefusalCode::BadCredentials,
            5 => RefusalCode::NotAuthorized,
            other => RefusalCode::Other(other),
        }
    }
}

/// Receives transport events on behalf of a session
pub trait EventHandler: Send + Sync {
    /// Handle one event from the connection started with `generation`
    fn on_event(&self, generation: u64, event: TransportEvent);
}

/// Delivery channel from a transport back to the session that started it
///
/// Each `start()` produces a sink stamped with a new generation, so events
/// still in flight from a replaced connection can be told apart.
#[derive(Clone)]
pub struct EventSink {
    handler: Arc<dyn EventHandler>,
    generation: u64,
}

impl EventSink {
    pub fn new(handler: Arc<dyn EventHandler>, generation: u64) -> Self {
        Self {
            handler,
            generation,
        }
    }

    /// Connection generation this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event synchronously on the caller's thread
    pub fn deliver(&self, event: TransportEvent) {
        self.handler.on_event(self.generation, event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Transport-side failures for requests made by the session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Transport not started")]
    NotStarted,
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Invalid broker URI: {0}")]
    InvalidBrokerUri(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("No async runtime available: {0}")]
    Runtime(String),
}
