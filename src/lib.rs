//! MQTT client network transport
//!
//! Bridges an OS-level, asynchronous byte-stream connection to the narrower
//! connection abstraction an MQTT client engine consumes.
//!
//! # Overview
//!
//! - [`transport::MqttClientNetworkTransport`] opens one connection per `connect` call
//! - [`transport::Connection`] is what the protocol engine talks to: send, break,
//!   and replaceable delegates for received data and broken notifications
//! - [`network`] holds the raw connection collaborators and their tokio TCP defaults
//! - [`diagnostics`] carries level-filtered diagnostic messages, relayed from each
//!   raw connection with its peer label prepended
//!
//! Retry, reconnection, TLS and MQTT packet handling are left to the caller.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_network_transport::diagnostics::levels;
//! use mqtt_network_transport::testing::{MockConnectionFactory, StaticResolver};
//! use mqtt_network_transport::transport::{
//!     ClientTransport, Connection, MqttClientNetworkTransport,
//! };
//! use mqtt_network_transport::TransportConfig;
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! let factory = Arc::new(MockConnectionFactory::new());
//! let resolver = StaticResolver::new().with_host("broker.local", Ipv4Addr::new(192, 168, 0, 10));
//! let transport = MqttClientNetworkTransport::with_components(
//!     TransportConfig::default(),
//!     factory.clone(),
//!     Arc::new(resolver),
//! );
//! let _unsubscribe = transport.subscribe_to_diagnostics(
//!     Arc::new(|sender: &str, level: usize, message: &str| {
//!         println!("[{sender}:{level}] {message}")
//!     }),
//!     levels::INFO,
//! );
//!
//! let connection = tokio_test::block_on(transport.connect(
//!     "mqtt",
//!     "broker.local",
//!     1883,
//!     Some(Arc::new(|data: Vec<u8>| println!("received {} bytes", data.len()))),
//!     Some(Arc::new(|graceful: bool| println!("broken, graceful = {graceful}"))),
//! ))
//! .unwrap();
//!
//! assert_eq!(connection.peer_id(), "192.168.0.10:1883");
//! connection.send_data(vec![0xc0, 0x00]);
//! connection.break_connection(true);
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod network;
pub mod observability;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, NetworkSection, TransportConfig, TransportSection};
pub use diagnostics::{levels, DiagnosticMessageDelegate, DiagnosticsSender, UnsubscribeDelegate};
pub use error::{NetworkError, TransportError, TransportResult};
pub use network::{ConnectionFactory, HostResolver, NetworkConnection};
pub use transport::{
    BrokenDelegate, ClientTransport, Connection, DataReceivedDelegate, MqttClientNetworkTransport,
};
