//! Production transport backed by `rumqttc`
//!
//! Option building, event routing and backoff are pure functions. The
//! impure part is a tokio task that polls the rumqttc event loop and
//! forwards events to the session through its [`EventSink`].

use super::{
    ErrorCode, EventSink, RefusalCode, Transport, TransportError, TransportEvent, TransportFault,
};
use crate::config::{SessionConfig, TlsMaterial};
use crate::protocol::QoS;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Packet, Transport as WireTransport,
};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Capacity of the request channel between client handle and event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Smallest inbound packet limit handed to rumqttc. rumqttc drops the
/// connection on anything larger, while the configured inbound size only
/// drives the truncation warning.
pub const MIN_WIRE_INBOUND_PACKET_SIZE: usize = 256 * 1024;

/// Reconnection backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectBackoff {
    /// Default pattern with every delay capped at `max_delay_ms`
    pub fn capped(max_delay_ms: u64) -> Self {
        let default = Self::default();
        Self {
            backoff_pattern: default
                .backoff_pattern
                .into_iter()
                .map(|delay| delay.min(max_delay_ms))
                .collect(),
            sustained_delay: max_delay_ms,
        }
    }

    /// Delay before reconnection attempt `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// What an incoming rumqttc event means for the session
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck with success code
    Connected,
    /// ConnAck carrying a refusal
    Refused(RefusalCode),
    /// Publish on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker closed the session
    Disconnected,
    /// Acks, pings and outgoing traffic
    Ignored,
}

/// Route a rumqttc event (pure function)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => match refusal_code(ack.code) {
            RefusalCode::Accepted => EventRoute::Connected,
            refusal => EventRoute::Refused(refusal),
        },
        Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
        },
        Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
        Event::Incoming(_) | Event::Outgoing(_) => EventRoute::Ignored,
    }
}

/// Map a CONNACK return code
pub fn refusal_code(code: ConnectReturnCode) -> RefusalCode {
    match code {
        ConnectReturnCode::Success => RefusalCode::Accepted,
        ConnectReturnCode::RefusedProtocolVersion => RefusalCode::BadProtocolVersion,
        ConnectReturnCode::BadClientId => RefusalCode::IdentifierRejected,
        ConnectReturnCode::ServiceUnavailable => RefusalCode::ServerUnavailable,
        ConnectReturnCode::BadUserNamePassword => RefusalCode::BadCredentials,
        ConnectReturnCode::NotAuthorized => RefusalCode::NotAuthorized,
    }
}

/// Classify an event loop failure into an [`ErrorCode`] (pure function)
pub fn error_code(error: &ConnectionError) -> ErrorCode {
    match error {
        ConnectionError::ConnectionRefused(code) => ErrorCode::ConnectionRefused(refusal_code(*code)),
        ConnectionError::Io(io) => ErrorCode::Transport(TransportFault {
            errno: io.raw_os_error(),
            detail: io.to_string(),
        }),
        other => ErrorCode::Transport(TransportFault {
            errno: None,
            detail: other.to_string(),
        }),
    }
}

pub fn to_wire_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Inbound limit enforced by rumqttc for a configured inbound size
pub fn wire_inbound_packet_size(max_inbound_packet_size: usize) -> usize {
    max_inbound_packet_size.max(MIN_WIRE_INBOUND_PACKET_SIZE)
}

fn tls_transport(tls: &TlsMaterial) -> Result<WireTransport, TransportError> {
    let client_auth = match (&tls.client_cert_pem, &tls.client_key_pem) {
        (Some(cert), Some(key)) => Some((cert.as_bytes().to_vec(), key.as_bytes().to_vec())),
        (None, None) => None,
        _ => {
            return Err(TransportError::Tls(
                "client certificate and private key must be provided together".to_string(),
            ))
        }
    };

    match (&tls.ca_cert_pem, client_auth) {
        (Some(ca), client_auth) => Ok(WireTransport::tls(ca.as_bytes().to_vec(), client_auth, None)),
        (None, None) => Ok(WireTransport::tls_with_default_config()),
        (None, Some(_)) => Err(TransportError::Tls(
            "client authentication requires a CA certificate".to_string(),
        )),
    }
}

/// Build rumqttc options from a configuration snapshot (pure function)
pub fn configure_mqtt_options(config: &SessionConfig) -> Result<MqttOptions, TransportError> {
    let endpoint = config
        .broker_endpoint()
        .map_err(|e| TransportError::InvalidBrokerUri(e.to_string()))?
        .ok_or_else(|| TransportError::InvalidBrokerUri("broker URI is not set".to_string()))?;

    let mut options = MqttOptions::new(config.client_id_or_generate(), endpoint.host, endpoint.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.into()));
    options.set_clean_session(config.clean_session);
    options.set_max_packet_size(
        wire_inbound_packet_size(config.max_inbound_packet_size),
        config.max_outbound_packet_size,
    );

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }

    if let Some(will) = &config.last_will {
        options.set_last_will(LastWill::new(
            &will.topic,
            Bytes::copy_from_slice(will.message.as_bytes()),
            to_wire_qos(will.qos),
            will.retain,
        ));
    }

    if endpoint.use_tls || config.tls.is_configured() {
        options.set_transport(tls_transport(&config.tls)?);
    }

    Ok(options)
}

struct ActiveConnection {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ActiveConnection {
    fn shutdown(self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
        }
        let _ = self.shutdown_tx.send(true);
        drop(self.task);
    }
}

/// [`Transport`] running the rumqttc event loop on a tokio runtime
pub struct RumqttcTransport {
    runtime: Option<Handle>,
    connection: Mutex<Option<ActiveConnection>>,
}

impl Default for RumqttcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RumqttcTransport {
    /// Use the runtime current at `start()` time
    pub fn new() -> Self {
        Self {
            runtime: None,
            connection: Mutex::new(None),
        }
    }

    /// Spawn the event loop on the given runtime
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            connection: Mutex::new(None),
        }
    }

    pub fn is_started(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn runtime(&self) -> Result<Handle, TransportError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|e| TransportError::Runtime(e.to_string())),
        }
    }

    fn with_client<R>(
        &self,
        request: impl FnOnce(&AsyncClient) -> Result<R, rumqttc::ClientError>,
    ) -> Result<R, TransportError> {
        let guard = self.connection.lock();
        let connection = guard.as_ref().ok_or(TransportError::NotStarted)?;
        request(&connection.client).map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

impl Transport for RumqttcTransport {
    fn start(&self, config: &SessionConfig, events: EventSink) -> Result<(), TransportError> {
        let runtime = self.runtime()?;
        let options = configure_mqtt_options(config)?;
        if let Some(priority) = config.task_priority {
            debug!(priority, "Task priority is not applied to tokio tasks");
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backoff = ReconnectBackoff::capped(config.reconnect_delay_ms);

        let span = crate::mqtt_span!(generation = events.generation());
        let task = runtime.spawn(
            run_event_loop(event_loop, events, backoff, config.auto_reconnect, shutdown_rx)
                .instrument(span),
        );

        let previous = self.connection.lock().replace(ActiveConnection {
            client,
            shutdown_tx,
            task,
        });
        if let Some(previous) = previous {
            info!("Replacing running MQTT connection");
            previous.shutdown();
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        self.with_client(|client| client.try_publish(topic, to_wire_qos(qos), retain, payload.to_vec()))
    }

    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        self.with_client(|client| client.try_subscribe(pattern, to_wire_qos(qos)))
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.with_client(|client| client.try_unsubscribe(pattern))
    }

    fn destroy(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.shutdown();
        }
    }
}

enum Step {
    Shutdown,
    Polled(Result<Event, ConnectionError>),
}

/// Poll the event loop until shutdown, or until the first failure when
/// auto-reconnect is off
async fn run_event_loop(
    mut event_loop: EventLoop,
    sink: EventSink,
    backoff: ReconnectBackoff,
    auto_reconnect: bool,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connected = false;
    let mut attempts = 0u32;

    loop {
        let step = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    Step::Shutdown
                } else {
                    continue;
                }
            }
            result = event_loop.poll() => Step::Polled(result),
        };

        match step {
            Step::Shutdown => {
                debug!(generation = sink.generation(), "MQTT event loop shutting down");
                break;
            }
            Step::Polled(Ok(event)) => match route_event(&event) {
                EventRoute::Connected => {
                    connected = true;
                    attempts = 0;
                    sink.deliver(TransportEvent::Connected);
                }
                EventRoute::Refused(code) => {
                    sink.deliver(TransportEvent::Error(ErrorCode::ConnectionRefused(code)));
                }
                EventRoute::MessageReceived { topic, payload } => {
                    sink.deliver(TransportEvent::MessageReceived { topic, payload });
                }
                EventRoute::Disconnected => {
                    if connected {
                        connected = false;
                        sink.deliver(TransportEvent::Disconnected);
                    }
                }
                EventRoute::Ignored => {}
            },
            Step::Polled(Err(error)) => {
                sink.deliver(TransportEvent::Error(error_code(&error)));
                if connected {
                    connected = false;
                    sink.deliver(TransportEvent::Disconnected);
                }

                if !auto_reconnect {
                    warn!(error = %error, "MQTT connection failed and auto-reconnect is disabled");
                    break;
                }

                attempts = attempts.saturating_add(1);
                let delay = backoff.delay_for_attempt(attempts);
                debug!(attempt = attempts, delay_ms = delay, "Reconnecting to MQTT broker");
                if !interruptible_sleep(&mut shutdown_rx, delay).await {
                    break;
                }
            }
        }
    }
}

/// Returns false if shutdown was requested during the delay
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
