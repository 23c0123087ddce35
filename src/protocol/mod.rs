//! MQTT protocol vocabulary shared by the session and its transports
//!
//! Topic matching rules and quality-of-service levels. Wire framing is not
//! part of this crate; it belongs to the transport engine.

pub mod qos;
pub mod topics;

pub use qos::QoS;
pub use topics::*;
