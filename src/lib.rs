//! MQTT client session layer
//!
//! Tracks connection state, keeps the set of active subscriptions, matches
//! inbound topics against subscription patterns and dispatches messages to
//! handlers. Wire framing, QoS retries and TLS belong to the [`Transport`]
//! underneath; [`RumqttcTransport`] is the production one.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_session::testing::MockTransport;
//! use mqtt_session::{MqttSession, QoS, TransportEvent};
//!
//! let session = MqttSession::new(MockTransport::new());
//! session.set_broker_uri("mqtt://localhost:1883");
//! session.start().unwrap();
//!
//! // the transport reports the broker's ConnAck
//! session.transport().emit(TransportEvent::Connected);
//!
//! session
//!     .subscribe_with_topic("sensors/+/temp", |topic, payload| {
//!         println!("{topic}: {}", String::from_utf8_lossy(payload));
//!     })
//!     .unwrap();
//! session
//!     .publish("sensors/room1/temp", b"21.5", QoS::AtMostOnce, false)
//!     .unwrap();
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{BrokerEndpoint, ConfigError, LastWill, SessionConfig, TlsMaterial};
pub use error::{Operation, SessionError, SessionResult};
pub use protocol::{topic_matches, QoS};
pub use session::{ConnectionState, MessageHandler, MqttSession};
pub use transport::{
    ErrorCode, EventSink, RefusalCode, RumqttcTransport, Transport, TransportError,
    TransportEvent,
};
