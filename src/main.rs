//! mqtt-session command line entry point
//!
//! `run` connects to a broker, subscribes on every connection and publishes a
//! counter until interrupted. `config --show` prints the effective
//! configuration.

use clap::{Parser, Subcommand};
use mqtt_session::config::SessionConfig;
use mqtt_session::observability::init_default_logging;
use mqtt_session::protocol::QoS;
use mqtt_session::session::MqttSession;
use mqtt_session::transport::RumqttcTransport;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["mqtt-session.toml", "config/mqtt-session.toml"];
const PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

/// Client-side MQTT session
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "MQTT client session with wildcard subscriptions")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URI, overrides the configuration file
    #[arg(short, long, env = "MQTT_BROKER_URI")]
    broker: Option<String>,

    /// Client identifier, overrides the configuration file
    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// Enable per-message diagnostics
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the publish/subscribe demo loop
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-session v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn find_default_config() -> Option<&'static Path> {
    DEFAULT_CONFIG_PATHS
        .into_iter()
        .map(Path::new)
        .find(|path| path.exists())
}

fn load_configuration(cli: &Cli) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let path = match &cli.config {
        Some(path) => Some(path.as_path()),
        None => find_default_config(),
    };

    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            SessionConfig::load_from_file(path)?
        }
        None => {
            info!("No configuration file found, using defaults");
            SessionConfig::default()
        }
    };

    if let Some(broker) = &cli.broker {
        config.broker_uri = Some(broker.clone());
    }
    if let Some(client_id) = &cli.client_id {
        config.client_id = Some(client_id.clone());
    }
    if cli.verbose {
        config.debug_logging = true;
    }

    config.validate()?;
    Ok(config)
}

async fn run_session(config: SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = MqttSession::with_config(RumqttcTransport::new(), config);

    session.set_on_connection_established(|session| {
        if let Err(e) = session.subscribe("foo", |payload| {
            info!("foo: {}", String::from_utf8_lossy(payload));
        }) {
            warn!("Subscribe to foo failed: {}", e);
        }

        if let Err(e) = session.subscribe_with_topic("bar/#", |topic, payload| {
            info!("{}: {}", topic, String::from_utf8_lossy(payload));
        }) {
            warn!("Subscribe to bar/# failed: {}", e);
        }
    });

    session.set_global_message_handler(|topic, payload| {
        info!(topic = %topic, bytes = payload.len(), "Global handler");
    });

    session.start()?;
    info!(
        broker_uri = %session.broker_uri().unwrap_or_default(),
        client_id = %session.client_name().unwrap_or_default(),
        "Session started"
    );

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut ticker = interval(PUBLISH_INTERVAL);
    let mut counter: u64 = 0;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => {
                if !session.is_connected() {
                    continue;
                }
                let message = format!("Hello: {counter}");
                counter += 1;
                if let Err(e) = session.publish("bar/bar", message.as_bytes(), QoS::AtMostOnce, false) {
                    warn!("Publish failed: {}", e);
                }
            }
        }
    }

    session.stop();
    info!(
        connections = session.connection_established_count(),
        "Session stopped"
    );
    Ok(())
}

fn handle_config_command(config: &SessionConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }
    println!("Configuration is valid");
    Ok(())
}
