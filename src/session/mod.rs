//! Client session: connection state, subscriptions and message dispatch

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error_report;
pub mod registry;

pub use client::{ConnectionCallback, MqttSession};
pub use connection::{ConnectionEvent, ConnectionState, ConnectionTracker};
pub use dispatcher::{DispatchReport, MessageDispatcher};
pub use error_report::{classify, ErrorCategory, ErrorClassification};
pub use registry::{
    AddOutcome, MatchedHandlers, MessageHandler, PayloadCallback, SubscriptionRecord,
    SubscriptionRegistry, TopicPayloadCallback,
};
