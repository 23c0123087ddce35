//! Configuration loading and validation tests
//!
//! Exercise loading from files on disk and how a loaded configuration flows
//! into a session start.

use mqtt_session::testing::MockTransport;
use mqtt_session::{ConfigError, MqttSession, QoS, SessionConfig, SessionError};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
broker_uri = "mqtt://test.mosquitto.org:1883"
client_id = "esp32-kitchen"
keep_alive_secs = 20

[last_will]
topic = "kitchen/status"
message = "offline"
retain = true
"#,
    );

    let config = SessionConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(
        config.broker_uri.as_deref(),
        Some("mqtt://test.mosquitto.org:1883")
    );
    assert_eq!(config.client_id.as_deref(), Some("esp32-kitchen"));
    assert_eq!(config.keep_alive_secs, 20);
    let will = config.last_will.unwrap();
    assert_eq!(will.qos, QoS::AtMostOnce);
    assert!(will.retain);
}

#[test]
fn test_empty_file_yields_defaults() {
    let temp_file = write_config("");
    let config = SessionConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config, SessionConfig::default());
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = SessionConfig::load_from_file(Path::new("/nonexistent/mqtt-session.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("broker_uri = ");
    assert!(matches!(
        SessionConfig::load_from_file(temp_file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_invalid_broker_uri_is_rejected_on_load() {
    let temp_file = write_config(r#"broker_uri = "http://broker.local""#);
    assert!(matches!(
        SessionConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidBrokerUri(_))
    ));
}

#[test]
fn test_credentials_resolved_from_environment_on_load() {
    std::env::set_var("MQTT_SESSION_IT_USER", "sensor");
    std::env::set_var("MQTT_SESSION_IT_PASS", "s3cret");

    let temp_file = write_config(
        r#"
broker_uri = "mqtt://localhost"
username_env = "MQTT_SESSION_IT_USER"
password_env = "MQTT_SESSION_IT_PASS"
"#,
    );
    let config = SessionConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.username.as_deref(), Some("sensor"));
    assert_eq!(config.password.as_deref(), Some("s3cret"));

    std::env::remove_var("MQTT_SESSION_IT_USER");
    std::env::remove_var("MQTT_SESSION_IT_PASS");
}

#[test]
fn test_loaded_config_drives_session_start() {
    let temp_file = write_config(
        r#"
broker_uri = "mqtts://broker.local"
client_id = "from-file"
clean_session = false
max_inbound_packet_size = 4096
"#,
    );
    let config = SessionConfig::load_from_file(temp_file.path()).unwrap();

    let session = MqttSession::with_config(MockTransport::new(), config);
    session.start().unwrap();

    let snapshot = session.transport().last_config().unwrap();
    assert_eq!(snapshot.client_id.as_deref(), Some("from-file"));
    assert!(!snapshot.clean_session);
    assert_eq!(snapshot.max_inbound_packet_size, 4096);
    assert_eq!(session.client_name().as_deref(), Some("from-file"));
}

#[test]
fn test_session_without_broker_does_not_start() {
    let temp_file = write_config("client_id = \"lonely\"");
    let config = SessionConfig::load_from_file(temp_file.path()).unwrap();

    let session = MqttSession::with_config(MockTransport::new(), config);
    assert!(matches!(session.start(), Err(SessionError::MissingBrokerUri)));
    assert_eq!(session.transport().start_count(), 0);
}

#[test]
fn test_redacted_config_serializes_without_secrets() {
    let mut config = SessionConfig::from_toml_str(r#"broker_uri = "mqtt://localhost""#).unwrap();
    config.password = Some("hunter2".to_string());

    let rendered = toml::to_string_pretty(&config.redacted()).unwrap();
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("broker_uri"));
}
