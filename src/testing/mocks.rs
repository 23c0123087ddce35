//! Mock transport for testing

use crate::config::SessionConfig;
use crate::protocol::QoS;
use crate::transport::{EventSink, Transport, TransportError, TransportEvent};
use parking_lot::Mutex;
use std::sync::Arc;

/// A publish request recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Default)]
struct MockState {
    should_fail: bool,
    start_count: usize,
    destroy_count: usize,
    last_config: Option<SessionConfig>,
    sink: Option<EventSink>,
    published: Vec<PublishedMessage>,
    subscribed: Vec<(String, QoS)>,
    unsubscribed: Vec<String>,
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep a handle after handing the
/// transport to a session.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that rejects every request
    pub fn with_failure() -> Self {
        let transport = Self::new();
        transport.set_should_fail(true);
        transport
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.state.lock().should_fail = should_fail;
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().start_count
    }

    pub fn destroy_count(&self) -> usize {
        self.state.lock().destroy_count
    }

    /// Configuration snapshot passed to the latest `start()`
    pub fn last_config(&self) -> Option<SessionConfig> {
        self.state.lock().last_config.clone()
    }

    /// Event sink passed to the latest `start()`
    pub fn sink(&self) -> Option<EventSink> {
        self.state.lock().sink.clone()
    }

    /// Deliver an event through the latest sink, as the transport's event
    /// thread would. Returns false if never started.
    pub fn emit(&self, event: TransportEvent) -> bool {
        // handlers may call back into the transport
        let sink = self.sink();
        match sink {
            Some(sink) => {
                sink.deliver(event);
                true
            }
            None => false,
        }
    }

    /// Deliver an inbound message
    pub fn emit_message(&self, topic: &str, payload: &[u8]) -> bool {
        self.emit(TransportEvent::MessageReceived {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn subscribed(&self) -> Vec<(String, QoS)> {
        self.state.lock().subscribed.clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.state.lock().unsubscribed.clone()
    }

    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.published.clear();
        state.subscribed.clear();
        state.unsubscribed.clear();
    }

    fn check(&self, state: &MockState) -> Result<(), TransportError> {
        if state.should_fail {
            return Err(TransportError::Rejected("mock failure".to_string()));
        }
        if state.sink.is_none() {
            return Err(TransportError::NotStarted);
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn start(&self, config: &SessionConfig, events: EventSink) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.should_fail {
            return Err(TransportError::Rejected("mock failure".to_string()));
        }
        state.start_count += 1;
        state.last_config = Some(config.clone());
        state.sink = Some(events);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.check(&state)?;
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.check(&state)?;
        state.subscribed.push((pattern.to_string(), qos));
        Ok(())
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.check(&state)?;
        state.unsubscribed.push(pattern.to_string());
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.state.lock();
        state.destroy_count += 1;
        state.sink = None;
    }
}
