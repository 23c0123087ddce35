//! Inbound message dispatch
//!
//! Runs on the transport's event-delivery thread. The global handler fires
//! first, then every subscription whose pattern matches. Handlers are called
//! after the registry lock is released, so a handler may subscribe or
//! unsubscribe without deadlocking.

use super::registry::{SubscriptionRegistry, TopicPayloadCallback};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Fixed header, length prefix and packet id bytes budgeted per inbound message
pub const FRAME_OVERHEAD: usize = 9;

/// True when a message of this size may not have fit the inbound buffer
pub fn may_be_truncated(topic: &str, payload_len: usize, max_inbound_packet_size: usize) -> bool {
    topic.len() + payload_len + FRAME_OVERHEAD >= max_inbound_packet_size
}

/// What a dispatch did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub global_handler_invoked: bool,
    /// Subscription handlers invoked
    pub handlers_invoked: usize,
    pub possibly_truncated: bool,
}

/// Registry plus optional global handler, shared between the API thread and
/// the event thread
#[derive(Default)]
pub struct MessageDispatcher {
    registry: RwLock<SubscriptionRegistry>,
    global_handler: RwLock<Option<TopicPayloadCallback>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &RwLock<SubscriptionRegistry> {
        &self.registry
    }

    /// Install or clear the handler that sees every inbound message
    pub fn set_global_handler(&self, handler: Option<TopicPayloadCallback>) {
        *self.global_handler.write() = handler;
    }

    pub fn has_global_handler(&self) -> bool {
        self.global_handler.read().is_some()
    }

    /// Deliver one inbound message.
    ///
    /// Oversized messages are still delivered; they are only flagged.
    pub fn dispatch(
        &self,
        topic: &str,
        payload: &[u8],
        max_inbound_packet_size: usize,
        debug_logging: bool,
    ) -> DispatchReport {
        let possibly_truncated = may_be_truncated(topic, payload.len(), max_inbound_packet_size);
        if possibly_truncated {
            warn!(
                topic = %topic,
                payload_len = payload.len(),
                max_inbound_packet_size,
                "MQTT! Message may be truncated, raise the inbound packet size limit"
            );
        }

        if debug_logging {
            info!("MQTT >> [{}] {}", topic, String::from_utf8_lossy(payload));
        }

        let global = self.global_handler.read().clone();
        let matched = self.registry.read().route(topic);

        if let Some(global) = &global {
            global(topic, payload);
        }
        let handlers_invoked = matched.dispatch(topic, payload);

        DispatchReport {
            global_handler_invoked: global.is_some(),
            handlers_invoked,
            possibly_truncated,
        }
    }
}

/// Wrap a closure as a global handler
pub fn global_handler<F>(callback: F) -> TopicPayloadCallback
where
    F: Fn(&str, &[u8]) + Send + Sync + 'static,
{
    Arc::new(callback)
}
