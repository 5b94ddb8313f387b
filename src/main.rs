//! mqtt-transport-probe - open one connection through the transport and report
//!
//! Connects to a broker URL once, optionally sends raw bytes, logs what comes back,
//! closes cleanly and prints the transport metrics as JSON.

use clap::Parser;
use mqtt_network_transport::diagnostics::levels;
use mqtt_network_transport::observability::{init_default_logging, metrics};
use mqtt_network_transport::transport::{ClientTransport, MqttClientNetworkTransport};
use mqtt_network_transport::TransportConfig;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use url::Url;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Probe an MQTT broker through the client network transport
#[derive(Parser)]
#[command(name = "mqtt-transport-probe")]
#[command(about = "Open one transport connection to an MQTT broker and report what happens")]
#[command(version)]
struct Cli {
    /// Broker URL, e.g. mqtt://localhost:1883
    #[arg(value_name = "URL", env = "MQTT_BROKER_URL")]
    broker: String,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds to keep the connection open before closing it
    #[arg(long, default_value_t = 2)]
    hold_secs: u64,

    /// Hex-encoded bytes to send once connected, e.g. c000 for PINGREQ
    #[arg(long, value_name = "HEX")]
    send_hex: Option<String>,
}

#[derive(Debug, PartialEq)]
struct BrokerTarget {
    scheme: String,
    host: String,
    port: u16,
}

fn parse_broker_url(raw: &str) -> Result<BrokerTarget, String> {
    let url = Url::parse(raw)
        .map_err(|e| format!("Invalid broker URL '{raw}': {e}"))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| format!("Broker URL '{raw}' has no host"))?
        .to_string();

    let port = match (url.port(), url.scheme()) {
        (Some(port), _) => port,
        (None, "mqtts" | "ssl" | "tls") => DEFAULT_MQTTS_PORT,
        (None, _) => DEFAULT_MQTT_PORT,
    };

    Ok(BrokerTarget {
        scheme: url.scheme().to_string(),
        host,
        port,
    })
}

fn parse_hex(raw: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<char> = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("Hex payload '{raw}' has an odd number of digits"));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16)
                .map_err(|_| format!("Invalid hex byte '{text}'"))
        })
        .collect()
}

fn load_configuration(path: &Option<PathBuf>) -> Result<TransportConfig, String> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            TransportConfig::load_from_file(path).map_err(|e| e.to_string())
        }
        None => Ok(TransportConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let target = match parse_broker_url(&cli.broker) {
        Ok(target) => target,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };

    let payload = match cli.send_hex.as_deref().map(parse_hex).transpose() {
        Ok(payload) => payload,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let transport = MqttClientNetworkTransport::from_config(&config);
    let _diagnostics = transport.subscribe_to_diagnostics(
        Arc::new(|sender: &str, level: usize, message: &str| {
            if level >= levels::WARNING {
                warn!(sender, level, "diagnostic: {}", message);
            } else {
                info!(sender, level, "diagnostic: {}", message);
            }
        }),
        levels::INFO,
    );

    let broken = Arc::new(Notify::new());
    let broken_signal = broken.clone();

    let connection = match transport
        .connect(
            &target.scheme,
            &target.host,
            target.port,
            Some(Arc::new(|data: Vec<u8>| {
                info!(bytes = data.len(), "Received data");
            })),
            Some(Arc::new(move |graceful: bool| {
                info!(graceful, "Connection broken");
                broken_signal.notify_one();
            })),
        )
        .await
    {
        Ok(connection) => connection,
        Err(e) => {
            error!(kind = e.kind(), "{}", e.detailed_message());
            process::exit(1);
        }
    };

    info!(peer_id = %connection.peer_id(), "Connected");

    if let Some(payload) = payload {
        info!(bytes = payload.len(), "Sending payload");
        connection.send_data(payload);
    }

    let hold = Duration::from_secs(cli.hold_secs);
    let held = timeout(hold, broken.notified()).await;
    if held.is_ok() {
        warn!("Peer closed the connection before the hold period ended");
    } else {
        connection.break_connection(true);
        let closed = timeout(Duration::from_secs(1), broken.notified()).await;
        if closed.is_err() {
            warn!("No broken notification after closing");
        }
    }
    drop(connection);

    match serde_json::to_string_pretty(&metrics().get_metrics()) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!("Failed to serialize metrics: {}", e);
            process::exit(1);
        }
    }
}
