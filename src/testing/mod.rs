//! Testing utilities and mock implementations
//!
//! Lets sessions be exercised without an MQTT broker: the mock transport
//! records every request and lets tests inject transport events.

pub mod mocks;

pub use mocks::*;
