//! Subscription registry
//!
//! An insertion-ordered list of patterns with their handlers. There is at most
//! one record per distinct pattern string; a record holds at most one handler
//! of each shape. A flat scan is fine for the tens of patterns a device
//! typically holds.

use crate::protocol::topic_matches;
use std::fmt;
use std::sync::Arc;

/// Callback receiving only the payload
pub type PayloadCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Callback receiving topic and payload
pub type TopicPayloadCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Handler attached to a subscription
#[derive(Clone)]
pub enum MessageHandler {
    PayloadOnly(PayloadCallback),
    TopicAndPayload(TopicPayloadCallback),
}

impl MessageHandler {
    pub fn payload_only<F>(callback: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        MessageHandler::PayloadOnly(Arc::new(callback))
    }

    pub fn topic_and_payload<F>(callback: F) -> Self
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        MessageHandler::TopicAndPayload(Arc::new(callback))
    }

    /// Invoke with the signature matching the handler shape
    pub fn invoke(&self, topic: &str, payload: &[u8]) {
        match self {
            MessageHandler::PayloadOnly(callback) => callback(payload),
            MessageHandler::TopicAndPayload(callback) => callback(topic, payload),
        }
    }

    fn same_shape(&self, other: &MessageHandler) -> bool {
        matches!(
            (self, other),
            (MessageHandler::PayloadOnly(_), MessageHandler::PayloadOnly(_))
                | (
                    MessageHandler::TopicAndPayload(_),
                    MessageHandler::TopicAndPayload(_)
                )
        )
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageHandler::PayloadOnly(_) => f.write_str("PayloadOnly(..)"),
            MessageHandler::TopicAndPayload(_) => f.write_str("TopicAndPayload(..)"),
        }
    }
}

/// One subscribed pattern and its handlers
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pattern: String,
    handlers: Vec<MessageHandler>,
}

impl SubscriptionRecord {
    fn new(pattern: &str, handler: MessageHandler) -> Self {
        Self {
            pattern: pattern.to_string(),
            handlers: vec![handler],
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handlers(&self) -> &[MessageHandler] {
        &self.handlers
    }
}

/// Effect of [`SubscriptionRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New record created
    Inserted,
    /// Handler of the other shape attached to the existing record
    Attached,
    /// Record already had a handler of this shape; it is kept
    AlreadyPresent,
}

/// Insertion-ordered, pattern-deduplicated subscription list
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    records: Vec<SubscriptionRecord>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a pattern.
    ///
    /// An existing handler of the same shape is never replaced.
    pub fn add(&mut self, pattern: &str, handler: MessageHandler) -> AddOutcome {
        match self.records.iter_mut().find(|r| r.pattern == pattern) {
            None => {
                self.records.push(SubscriptionRecord::new(pattern, handler));
                AddOutcome::Inserted
            }
            Some(record) if record.handlers.iter().any(|h| h.same_shape(&handler)) => {
                AddOutcome::AlreadyPresent
            }
            Some(record) => {
                record.handlers.push(handler);
                AddOutcome::Attached
            }
        }
    }

    /// Remove every record whose pattern equals `pattern` verbatim.
    /// Returns the number of records removed.
    pub fn remove(&mut self, pattern: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.pattern != pattern);
        before - self.records.len()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.records.iter().any(|r| r.pattern == pattern)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SubscriptionRecord] {
        &self.records
    }

    /// Subscribed patterns in insertion order
    pub fn patterns(&self) -> Vec<String> {
        self.records.iter().map(|r| r.pattern.clone()).collect()
    }

    /// Handlers of every record matching `topic`, in registry order.
    ///
    /// Returned as owned handles so callers can invoke them without holding
    /// a lock on the registry.
    pub fn route(&self, topic: &str) -> MatchedHandlers {
        MatchedHandlers {
            handlers: self
                .records
                .iter()
                .filter(|r| topic_matches(&r.pattern, topic))
                .flat_map(|r| r.handlers.iter().cloned())
                .collect(),
        }
    }
}

/// Snapshot of the handlers a topic routes to
#[derive(Debug, Clone, Default)]
pub struct MatchedHandlers {
    handlers: Vec<MessageHandler>,
}

impl MatchedHandlers {
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke every handler in order; returns how many fired
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        for handler in &self.handlers {
            handler.invoke(topic, payload);
        }
        self.handlers.len()
    }
}
