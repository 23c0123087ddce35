//! MQTT session facade
//!
//! [`MqttSession`] owns the configuration, connection state and subscription
//! registry, and drives a [`Transport`]. It is cheap to clone; clones share
//! the same session. Calls from the application and events from the
//! transport may arrive on different threads.

use super::connection::{
    can_publish, can_subscribe, log_state_transition, ConnectionEvent, ConnectionState,
    ConnectionTracker,
};
use super::dispatcher::{DispatchReport, MessageDispatcher};
use super::error_report;
use super::registry::{AddOutcome, MessageHandler};
use crate::config::{BrokerEndpoint, LastWill, SessionConfig};
use crate::error::{Operation, SessionError, SessionResult};
use crate::protocol::{validate_topic_filter, validate_topic_name, wildcard_count, QoS};
use crate::transport::{EventHandler, EventSink, Transport, TransportEvent};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Callback run each time the broker accepts a connection
pub type ConnectionCallback<T> = Arc<dyn Fn(&MqttSession<T>) + Send + Sync>;

struct Inner<T: Transport> {
    transport: T,
    config: RwLock<SessionConfig>,
    connection: ConnectionTracker,
    dispatcher: MessageDispatcher,
    on_connected: RwLock<Option<ConnectionCallback<T>>>,
    /// Bumped by every start/stop; events from older generations are dropped
    generation: AtomicU64,
    established_count: AtomicU64,
    /// Inbound limit of the running connection
    inbound_limit: AtomicUsize,
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        self.transport.destroy();
    }
}

/// Client session over a [`Transport`]
pub struct MqttSession<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for MqttSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Opaque context handed to the transport. Holds the session weakly so the
/// transport never keeps it alive.
struct SessionHandle<T: Transport> {
    inner: Weak<Inner<T>>,
}

impl<T: Transport> EventHandler for SessionHandle<T> {
    fn on_event(&self, generation: u64, event: TransportEvent) {
        if let Some(inner) = self.inner.upgrade() {
            MqttSession { inner }.handle_event_from(generation, event);
        }
    }
}

impl<T: Transport> MqttSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        let inbound_limit = config.max_inbound_packet_size;
        Self {
            inner: Arc::new(Inner {
                transport,
                config: RwLock::new(config),
                connection: ConnectionTracker::new(),
                dispatcher: MessageDispatcher::new(),
                on_connected: RwLock::new(None),
                generation: AtomicU64::new(0),
                established_count: AtomicU64::new(0),
                inbound_limit: AtomicUsize::new(inbound_limit),
            }),
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Copy of the current configuration
    pub fn config(&self) -> SessionConfig {
        self.inner.config.read().clone()
    }

    fn debug_enabled(&self) -> bool {
        self.inner.config.read().debug_logging
    }

    fn update_config(&self, update: impl FnOnce(&mut SessionConfig)) {
        update(&mut *self.inner.config.write());
    }

    // Configuration. Values apply to the next start().

    /// Per-message diagnostics. Takes effect immediately.
    pub fn enable_debug_logging(&self, enabled: bool) {
        self.update_config(|c| c.debug_logging = enabled);
    }

    /// Ask the broker to keep session state across reconnects by turning
    /// clean session off.
    pub fn disable_persistent_session(&self) {
        self.update_config(|c| c.clean_session = false);
    }

    /// Register a QoS 0 last-will message
    pub fn set_last_will(&self, topic: &str, message: &str, retain: bool) {
        self.update_config(|c| {
            c.last_will = Some(LastWill {
                topic: topic.to_string(),
                message: message.to_string(),
                qos: QoS::AtMostOnce,
                retain,
            })
        });
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.update_config(|c| c.auto_reconnect = enabled);
    }

    pub fn disable_auto_reconnect(&self) {
        self.set_auto_reconnect(false);
    }

    pub fn set_keep_alive(&self, seconds: u16) {
        self.update_config(|c| c.keep_alive_secs = seconds);
    }

    /// Set both inbound and outbound packet size limits
    pub fn set_max_packet_size(&self, bytes: usize) {
        self.update_config(|c| {
            c.max_inbound_packet_size = bytes;
            c.max_outbound_packet_size = bytes;
        });
    }

    pub fn set_max_inbound_packet_size(&self, bytes: usize) {
        self.update_config(|c| c.max_inbound_packet_size = bytes);
    }

    pub fn set_max_outbound_packet_size(&self, bytes: usize) {
        self.update_config(|c| c.max_outbound_packet_size = bytes);
    }

    pub fn set_client_certificate(&self, pem: &str) {
        self.update_config(|c| c.tls.client_cert_pem = Some(pem.to_string()));
    }

    pub fn set_ca_certificate(&self, pem: &str) {
        self.update_config(|c| c.tls.ca_cert_pem = Some(pem.to_string()));
    }

    pub fn set_private_key(&self, pem: &str) {
        self.update_config(|c| c.tls.client_key_pem = Some(pem.to_string()));
    }

    pub fn set_broker_uri(&self, uri: &str) {
        self.update_config(|c| c.broker_uri = Some(uri.to_string()));
    }

    /// Build the broker URI from host and port
    pub fn set_broker_address(&self, host: &str, port: u16, use_tls: bool) {
        let uri = BrokerEndpoint {
            host: host.to_string(),
            port,
            use_tls,
        }
        .to_uri();
        self.set_broker_uri(&uri);
    }

    pub fn set_credentials(&self, username: &str, password: &str) {
        self.update_config(|c| {
            c.username = Some(username.to_string());
            c.password = Some(password.to_string());
        });
    }

    pub fn set_client_name(&self, client_id: &str) {
        self.update_config(|c| c.client_id = Some(client_id.to_string()));
    }

    pub fn set_task_priority(&self, priority: u8) {
        self.update_config(|c| c.task_priority = Some(priority));
    }

    /// Install the handler that sees every inbound message, replacing any
    /// previous one
    pub fn set_global_message_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_global_handler(Some(Arc::new(handler)));
    }

    pub fn clear_global_message_handler(&self) {
        self.inner.dispatcher.set_global_handler(None);
    }

    /// Run `callback` every time the broker accepts a connection, after the
    /// state has flipped to Connected. Typically used to (re)subscribe.
    pub fn set_on_connection_established<F>(&self, callback: F)
    where
        F: Fn(&MqttSession<T>) + Send + Sync + 'static,
    {
        *self.inner.on_connected.write() = Some(Arc::new(callback));
    }

    // Lifecycle

    /// Hand a configuration snapshot to the transport and begin connecting.
    ///
    /// Returns once the transport accepted the request; the connection itself
    /// is reported later through a Connected event. Calling it again replaces
    /// the running connection.
    pub fn start(&self) -> SessionResult<()> {
        let mut snapshot = self.config();
        if snapshot.broker_uri.is_none() {
            if snapshot.debug_logging {
                info!("MQTT: Broker URI is not set, not connecting");
            }
            return Err(SessionError::MissingBrokerUri);
        }

        snapshot.resolve_credentials()?;
        snapshot.validate()?;

        if snapshot.client_id.as_deref().map_or(true, str::is_empty) {
            let generated = snapshot.client_id_or_generate();
            self.update_config(|c| c.client_id = Some(generated.clone()));
            snapshot.client_id = Some(generated);
        }

        let generation = self.generation() + 1;
        let _span = crate::session_span!(generation).entered();

        let handle: Arc<dyn EventHandler> = Arc::new(SessionHandle {
            inner: Arc::downgrade(&self.inner),
        });
        // a rejected start leaves the running connection and its generation in place
        self.inner
            .transport
            .start(&snapshot, EventSink::new(handle, generation))
            .map_err(|e| {
                warn!(error = %e, "MQTT: Transport refused to start");
                SessionError::rejected(Operation::Start, e)
            })?;

        self.inner.generation.store(generation, Ordering::SeqCst);
        self.force_disconnected();
        self.inner
            .inbound_limit
            .store(snapshot.max_inbound_packet_size, Ordering::SeqCst);

        if snapshot.debug_logging {
            info!(
                broker_uri = snapshot.broker_uri.as_deref().unwrap_or_default(),
                client_id = snapshot.client_id.as_deref().unwrap_or_default(),
                generation,
                "MQTT: Connecting to broker"
            );
        }
        Ok(())
    }

    /// Destroy the transport connection. Events still in flight from it are
    /// ignored.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.transport.destroy();
        self.force_disconnected();
        info!("MQTT: Session stopped");
    }

    fn force_disconnected(&self) {
        if self.inner.connection.is_connected() {
            let (from, to) = self.inner.connection.apply(ConnectionEvent::Disconnected);
            log_state_transition(from, to);
        }
    }

    // State

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Number of Connected events handled since the session was created
    pub fn connection_established_count(&self) -> u64 {
        self.inner.established_count.load(Ordering::SeqCst)
    }

    pub fn client_name(&self) -> Option<String> {
        self.inner.config.read().client_id.clone()
    }

    pub fn broker_uri(&self) -> Option<String> {
        self.inner.config.read().broker_uri.clone()
    }

    /// Subscribed patterns in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.dispatcher.registry().read().patterns()
    }

    /// Generation of the current connection
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    // Outbound operations

    /// Publish a message. Reports only whether the transport accepted it for
    /// sending.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> SessionResult<()> {
        let state = self.connection_state();
        if !can_publish(state) {
            if self.debug_enabled() {
                info!(topic = %topic, "MQTT: Not connected, publish skipped");
            }
            return Err(SessionError::not_connected(Operation::Publish, state));
        }

        validate_topic_name(topic).map_err(|e| SessionError::InvalidTopic {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        self.inner
            .transport
            .publish(topic, payload, qos, retain)
            .map_err(|e| {
                warn!(topic = %topic, error = %e, "MQTT! publish failed, is the message too long?");
                SessionError::rejected(Operation::Publish, e)
            })?;

        if self.debug_enabled() {
            info!("MQTT << [{}] {}", topic, String::from_utf8_lossy(payload));
        }
        Ok(())
    }

    /// Subscribe with a handler receiving only the payload
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SessionResult<AddOutcome>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.subscribe_handler(pattern, MessageHandler::payload_only(handler), QoS::AtMostOnce)
    }

    pub fn subscribe_with_qos<F>(&self, pattern: &str, qos: QoS, handler: F) -> SessionResult<AddOutcome>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.subscribe_handler(pattern, MessageHandler::payload_only(handler), qos)
    }

    /// Subscribe with a handler receiving topic and payload
    pub fn subscribe_with_topic<F>(&self, pattern: &str, handler: F) -> SessionResult<AddOutcome>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        self.subscribe_handler(pattern, MessageHandler::topic_and_payload(handler), QoS::AtMostOnce)
    }

    pub fn subscribe_with_topic_and_qos<F>(
        &self,
        pattern: &str,
        qos: QoS,
        handler: F,
    ) -> SessionResult<AddOutcome>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        self.subscribe_handler(pattern, MessageHandler::topic_and_payload(handler), qos)
    }

    /// Forward the subscription to the transport, then record the handler
    /// once the transport accepted it.
    pub fn subscribe_handler(
        &self,
        pattern: &str,
        handler: MessageHandler,
        qos: QoS,
    ) -> SessionResult<AddOutcome> {
        validate_topic_filter(pattern).map_err(|e| SessionError::InvalidTopic {
            topic: pattern.to_string(),
            reason: e.to_string(),
        })?;
        if wildcard_count(pattern) > 1 {
            warn!(
                pattern = %pattern,
                "MQTT: only the first wildcard of a pattern is honoured when matching"
            );
        }

        let state = self.connection_state();
        if !can_subscribe(state) {
            if self.debug_enabled() {
                info!(pattern = %pattern, "MQTT: Not connected, subscribe skipped");
            }
            return Err(SessionError::not_connected(Operation::Subscribe, state));
        }

        self.inner.transport.subscribe(pattern, qos).map_err(|e| {
            warn!(pattern = %pattern, error = %e, "MQTT: Subscribe request rejected");
            SessionError::rejected(Operation::Subscribe, e)
        })?;

        let outcome = self.inner.dispatcher.registry().write().add(pattern, handler);
        if outcome == AddOutcome::AlreadyPresent {
            debug!(pattern = %pattern, "Handler of this shape already registered, keeping the first");
        }
        if self.debug_enabled() {
            info!(pattern = %pattern, ?outcome, "MQTT: Subscribed");
        }
        Ok(outcome)
    }

    /// Unsubscribe a pattern. Only the record with exactly this pattern is
    /// removed, and only after the transport accepted the request.
    pub fn unsubscribe(&self, pattern: &str) -> SessionResult<usize> {
        let state = self.connection_state();
        if !can_subscribe(state) {
            if self.debug_enabled() {
                info!(pattern = %pattern, "MQTT: Not connected, unsubscribe skipped");
            }
            return Err(SessionError::not_connected(Operation::Unsubscribe, state));
        }

        self.inner.transport.unsubscribe(pattern).map_err(|e| {
            warn!(pattern = %pattern, error = %e, "MQTT: Unsubscribe request rejected");
            SessionError::rejected(Operation::Unsubscribe, e)
        })?;

        let removed = self.inner.dispatcher.registry().write().remove(pattern);
        if self.debug_enabled() {
            info!(pattern = %pattern, removed, "MQTT: Unsubscribed");
        }
        Ok(removed)
    }

    // Inbound events

    /// Process an event as if delivered by the current connection
    pub fn handle_event(&self, event: TransportEvent) {
        self.handle_event_from(self.generation(), event);
    }

    fn handle_event_from(&self, generation: u64, event: TransportEvent) {
        let current = self.generation();
        if generation != current {
            debug!(generation, current, ?event, "Ignoring event from a replaced connection");
            return;
        }

        match event {
            TransportEvent::Connected => {
                let (from, to) = self.inner.connection.apply(ConnectionEvent::Connected);
                log_state_transition(from, to);
                self.inner.established_count.fetch_add(1, Ordering::SeqCst);

                let callback = self.inner.on_connected.read().clone();
                if let Some(callback) = callback {
                    callback(self);
                }
            }
            TransportEvent::Disconnected => {
                let (from, to) = self.inner.connection.apply(ConnectionEvent::Disconnected);
                log_state_transition(from, to);
            }
            TransportEvent::MessageReceived { topic, payload } => {
                self.dispatch(&topic, &payload);
            }
            TransportEvent::Error(code) => {
                error_report::report(&code);
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchReport {
        let limit = self.inner.inbound_limit.load(Ordering::SeqCst);
        self.inner
            .dispatcher
            .dispatch(topic, payload, limit, self.debug_enabled())
    }
}
