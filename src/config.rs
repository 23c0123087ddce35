//! Session configuration
//!
//! A [`SessionConfig`] is assembled before `start()` (through the session
//! setters or from a TOML file) and handed to the transport as a snapshot.
//! Changing it afterwards only affects the next `start()`.

use crate::protocol::{validate_topic_name, QoS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Default keepalive interval in seconds
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 15;
/// Default inbound and outbound buffer size in bytes
pub const DEFAULT_PACKET_SIZE: usize = 1024;
/// Default upper bound for the reconnection delay in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 250;

const REDACTED: &str = "***";

/// Complete configuration of one MQTT session
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Broker URI, e.g. `mqtt://broker.local:1883` or `mqtts://broker.local`
    pub broker_uri: Option<String>,
    /// Client identifier; a random one is generated at start when absent
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable holding the username (used when `username` is unset)
    pub username_env: Option<String>,
    /// Environment variable holding the password (used when `password` is unset)
    pub password_env: Option<String>,
    /// Message published by the broker if the connection drops unexpectedly
    pub last_will: Option<LastWill>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// false asks the broker to keep subscriptions across reconnects
    #[serde(default = "default_true")]
    pub clean_session: bool,
    /// Inbound buffer size; larger messages are delivered with a truncation
    /// warning
    #[serde(default = "default_packet_size")]
    pub max_inbound_packet_size: usize,
    #[serde(default = "default_packet_size")]
    pub max_outbound_packet_size: usize,
    #[serde(default)]
    pub tls: TlsMaterial,
    /// Priority hint for the transport's worker task
    pub task_priority: Option<u8>,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Per-message diagnostics (publish, receive, subscribe traces)
    #[serde(default)]
    pub debug_logging: bool,
}

/// Last-will message registered with the broker at connect time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub message: String,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
}

/// PEM encoded TLS material
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TlsMaterial {
    pub ca_cert_pem: Option<String>,
    pub client_cert_pem: Option<String>,
    pub client_key_pem: Option<String>,
}

impl TlsMaterial {
    /// True when any TLS material was provided
    pub fn is_configured(&self) -> bool {
        self.ca_cert_pem.is_some() || self.client_cert_pem.is_some() || self.client_key_pem.is_some()
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_cert_pem", &self.ca_cert_pem.as_ref().map(|_| "<pem>"))
            .field("client_cert_pem", &self.client_cert_pem.as_ref().map(|_| "<pem>"))
            .field("client_key_pem", &self.client_key_pem.as_ref().map(|_| REDACTED))
            .finish()
    }
}

/// Host, port and TLS flag extracted from a broker URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerEndpoint {
    /// Parse `mqtt://`, `tcp://`, `mqtts://` or `ssl://` URIs
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(uri).map_err(|_| ConfigError::InvalidBrokerUri(uri.to_string()))?;

        let use_tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUri(uri.to_string())),
        };

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUri(uri.to_string()))?;
        let port = url.port().unwrap_or(if use_tls { 8883 } else { 1883 });

        Ok(Self {
            host: host.to_string(),
            port,
            use_tls,
        })
    }

    /// Format back into a broker URI
    pub fn to_uri(&self) -> String {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

fn default_keep_alive() -> u16 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_packet_size() -> usize {
    DEFAULT_PACKET_SIZE
}

fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broker_uri: None,
            client_id: None,
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            last_will: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            clean_session: true,
            max_inbound_packet_size: DEFAULT_PACKET_SIZE,
            max_outbound_packet_size: DEFAULT_PACKET_SIZE,
            tls: TlsMaterial::default(),
            task_priority: None,
            auto_reconnect: true,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            debug_logging: false,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("broker_uri", &self.broker_uri)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("username_env", &self.username_env)
            .field("password_env", &self.password_env)
            .field("last_will", &self.last_will)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("clean_session", &self.clean_session)
            .field("max_inbound_packet_size", &self.max_inbound_packet_size)
            .field("max_outbound_packet_size", &self.max_outbound_packet_size)
            .field("tls", &self.tls)
            .field("task_priority", &self.task_priority)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("debug_logging", &self.debug_logging)
            .finish()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URI: {0}")]
    InvalidBrokerUri(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Load configuration from a TOML file, resolve credentials and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, resolve credentials and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: SessionConfig = toml::from_str(content)?;
        config.resolve_credentials()?;
        config.validate()?;
        Ok(config)
    }

    /// Fill username and password from their environment variables.
    ///
    /// Explicit values win. A named username variable must exist; a missing
    /// password variable leaves the password empty.
    pub fn resolve_credentials(&mut self) -> Result<(), ConfigError> {
        if self.username.is_none() {
            if let Some(name) = &self.username_env {
                let username =
                    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.clone()))?;
                self.username = Some(username);
            }
        }
        if self.password.is_none() {
            self.password = self
                .password_env
                .as_ref()
                .and_then(|name| std::env::var(name).ok());
        }
        Ok(())
    }

    /// Check the configuration is usable for a connection attempt
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(uri) = &self.broker_uri {
            BrokerEndpoint::parse(uri)?;
        }

        if let Some(will) = &self.last_will {
            validate_topic_name(&will.topic).map_err(|e| {
                ConfigError::InvalidConfig(format!("last will topic '{}': {e}", will.topic))
            })?;
        }

        if self.max_inbound_packet_size == 0 || self.max_outbound_packet_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "packet size limits must be greater than 0".to_string(),
            ));
        }

        if self.tls.client_cert_pem.is_some() != self.tls.client_key_pem.is_some() {
            return Err(ConfigError::InvalidConfig(
                "client certificate and private key must be provided together".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed broker endpoint, if a broker URI is configured
    pub fn broker_endpoint(&self) -> Result<Option<BrokerEndpoint>, ConfigError> {
        self.broker_uri
            .as_deref()
            .map(BrokerEndpoint::parse)
            .transpose()
    }

    /// Configured client id, or a freshly generated unique one
    pub fn client_id_or_generate(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("mqtt-session-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Copy with secrets replaced, suitable for printing
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.password.is_some() {
            copy.password = Some(REDACTED.to_string());
        }
        if copy.tls.client_key_pem.is_some() {
            copy.tls.client_key_pem = Some(REDACTED.to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_embedded_client() {
        let config = SessionConfig::default();
        assert_eq!(config.keep_alive_secs, 15);
        assert!(config.clean_session);
        assert_eq!(config.max_inbound_packet_size, 1024);
        assert_eq!(config.max_outbound_packet_size, 1024);
        assert!(config.auto_reconnect);
        assert!(!config.debug_logging);
        assert!(config.last_will.is_none());
        assert!(!config.tls.is_configured());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
broker_uri = "mqtts://broker.example.com"
client_id = "sensor-01"
username = "device"
password = "hunter2"
keep_alive_secs = 30
clean_session = false
max_inbound_packet_size = 4096
max_outbound_packet_size = 2048
task_priority = 5
auto_reconnect = false
debug_logging = true

[last_will]
topic = "lwt"
message = "I am going offline"
qos = 1
retain = true

[tls]
ca_cert_pem = "-----BEGIN CERTIFICATE-----"
"#;

        let config = SessionConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.client_id.as_deref(), Some("sensor-01"));
        assert_eq!(config.keep_alive_secs, 30);
        assert!(!config.clean_session);
        assert_eq!(config.max_inbound_packet_size, 4096);
        assert_eq!(config.task_priority, Some(5));
        assert!(!config.auto_reconnect);
        assert!(config.debug_logging);

        let will = config.last_will.unwrap();
        assert_eq!(will.topic, "lwt");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        assert!(config.tls.is_configured());
    }

    #[test]
    fn test_minimal_config() {
        let config = SessionConfig::from_toml_str(r#"broker_uri = "mqtt://localhost""#).unwrap();
        assert_eq!(config, SessionConfig {
            broker_uri: Some("mqtt://localhost".to_string()),
            ..SessionConfig::default()
        });
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let toml_content = r#"
[last_will]
topic = "lwt"
message = "bye"
qos = 3
"#;
        assert!(matches!(
            SessionConfig::from_toml_str(toml_content),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_broker_endpoint_parsing() {
        assert_eq!(
            BrokerEndpoint::parse("mqtt://test.mosquitto.org:1883").unwrap(),
            BrokerEndpoint {
                host: "test.mosquitto.org".to_string(),
                port: 1883,
                use_tls: false,
            }
        );

        let tls = BrokerEndpoint::parse("mqtts://broker.local").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.use_tls);

        assert_eq!(BrokerEndpoint::parse("tcp://10.0.0.2").unwrap().port, 1883);
        assert!(BrokerEndpoint::parse("ssl://10.0.0.2:9000").unwrap().use_tls);
    }

    #[test]
    fn test_invalid_broker_uris() {
        for uri in ["invalid-url", "http://broker.local", "mqtt://"] {
            assert!(
                matches!(BrokerEndpoint::parse(uri), Err(ConfigError::InvalidBrokerUri(_))),
                "{uri} should be rejected"
            );
        }
    }

    #[test]
    fn test_endpoint_round_trip_uri() {
        let endpoint = BrokerEndpoint {
            host: "broker.local".to_string(),
            port: 8883,
            use_tls: true,
        };
        assert_eq!(endpoint.to_uri(), "mqtts://broker.local:8883");
    }

    #[test]
    fn test_validate_rejects_wildcard_last_will() {
        let config = SessionConfig {
            last_will: Some(LastWill {
                topic: "status/#".to_string(),
                message: "offline".to_string(),
                qos: QoS::AtMostOnce,
                retain: false,
            }),
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_buffers() {
        let config = SessionConfig {
            max_inbound_packet_size: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_cert_and_key_together() {
        let mut config = SessionConfig::default();
        config.tls.client_cert_pem = Some("cert".to_string());
        assert!(config.validate().is_err());

        config.tls.client_key_pem = Some("key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_from_environment() {
        std::env::set_var("MQTT_SESSION_TEST_USER", "envuser");
        std::env::set_var("MQTT_SESSION_TEST_PASS", "envpass");

        let mut config = SessionConfig {
            username_env: Some("MQTT_SESSION_TEST_USER".to_string()),
            password_env: Some("MQTT_SESSION_TEST_PASS".to_string()),
            ..SessionConfig::default()
        };
        config.resolve_credentials().unwrap();
        assert_eq!(config.username.as_deref(), Some("envuser"));
        assert_eq!(config.password.as_deref(), Some("envpass"));

        std::env::remove_var("MQTT_SESSION_TEST_USER");
        std::env::remove_var("MQTT_SESSION_TEST_PASS");
    }

    #[test]
    fn test_missing_username_env_is_an_error() {
        let mut config = SessionConfig {
            username_env: Some("MQTT_SESSION_TEST_DEFINITELY_UNSET".to_string()),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.resolve_credentials(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_explicit_credentials_win() {
        let mut config = SessionConfig {
            username: Some("explicit".to_string()),
            username_env: Some("MQTT_SESSION_TEST_DEFINITELY_UNSET".to_string()),
            ..SessionConfig::default()
        };
        config.resolve_credentials().unwrap();
        assert_eq!(config.username.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_generated_client_id_is_unique() {
        let config = SessionConfig::default();
        let first = config.client_id_or_generate();
        let second = config.client_id_or_generate();
        assert!(first.starts_with("mqtt-session-"));
        assert_ne!(first, second);

        let named = SessionConfig {
            client_id: Some("device".to_string()),
            ..SessionConfig::default()
        };
        assert_eq!(named.client_id_or_generate(), "device");
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let mut config = SessionConfig {
            password: Some("hunter2".to_string()),
            ..SessionConfig::default()
        };
        config.tls.client_key_pem = Some("PRIVATE KEY DATA".to_string());

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("PRIVATE KEY DATA"));

        let redacted = config.redacted();
        assert_eq!(redacted.password.as_deref(), Some("***"));
        assert_eq!(redacted.tls.client_key_pem.as_deref(), Some("***"));
    }
}
