//! Protocol-facing transport layer
//!
//! This module provides the abstraction an MQTT client engine consumes: a
//! [`ClientTransport`] that opens connections, and the [`Connection`] it hands
//! back. The engine never sees the raw network connection underneath.
//!
//! # Delegate threading contract
//!
//! Delegates are invoked synchronously on whatever thread the raw connection
//! uses to deliver events, which may run concurrently with calls the engine makes
//! on its own thread. A delegate may call back into the connection, including
//! replacing itself. A delegate replaced while an invocation is already in flight
//! may still be invoked once more with an event that was being delivered at the
//! moment of replacement.

use crate::error::TransportResult;
use async_trait::async_trait;
use std::sync::Arc;

pub mod adapter;
pub mod client;
pub mod delegates;

pub use adapter::{format_peer_id, ConnectionAdapter};
pub use client::MqttClientNetworkTransport;
pub use delegates::ConnectionDelegates;

/// Called with each chunk of bytes received from the peer
pub type DataReceivedDelegate = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Called when the connection is broken; `true` when the close was graceful
pub type BrokenDelegate = Arc<dyn Fn(bool) + Send + Sync>;

/// A connection as seen by the MQTT protocol engine
pub trait Connection: Send + Sync {
    /// Identity of the peer, formatted as `A.B.C.D:port`
    fn peer_id(&self) -> String;

    /// Replace the delegate called with received data; `None` discards received data
    fn set_data_received_delegate(&self, delegate: Option<DataReceivedDelegate>);

    /// Replace the delegate called when the connection breaks
    fn set_connection_broken_delegate(&self, delegate: Option<BrokenDelegate>);

    /// Send bytes to the peer
    fn send_data(&self, data: Vec<u8>);

    /// Close the connection; `clean` requests a graceful close
    fn break_connection(&self, clean: bool);
}

/// Opens connections for the MQTT protocol engine
///
/// Each call makes exactly one attempt. Retry and backoff belong to the caller.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn connect(
        &self,
        scheme: &str,
        host_name_or_address: &str,
        port: u16,
        data_received_delegate: Option<DataReceivedDelegate>,
        broken_delegate: Option<BrokenDelegate>,
    ) -> TransportResult<Arc<dyn Connection>>;
}
