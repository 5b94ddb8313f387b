//! Connection Adapter: the protocol-facing side of one raw connection

use super::{BrokenDelegate, Connection, ConnectionDelegates, DataReceivedDelegate};
use crate::network::{
    ConnectionBrokenDelegate, MessageReceivedDelegate, NetworkConnection, NetworkError,
};
use crate::observability::metrics;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Format a peer identity as `A.B.C.D:port`
pub fn format_peer_id(address: Ipv4Addr, port: u16) -> String {
    let [a, b, c, d] = address.octets();
    format!("{a}.{b}.{c}.{d}:{port}")
}

/// Wraps one connected raw connection and the delegates the protocol engine registered
///
/// The adapter exclusively owns the raw connection. Dropping the adapter drops the
/// raw connection with it, and no delegate is invoked afterwards.
pub struct ConnectionAdapter {
    connection: Box<dyn NetworkConnection>,
    delegates: Arc<ConnectionDelegates>,
    peer_id: String,
}

impl std::fmt::Debug for ConnectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAdapter")
            .field("peer_id", &self.peer_id)
            .field("delegates", &self.delegates)
            .finish()
    }
}

impl ConnectionAdapter {
    /// Wrap a connected raw connection; the peer identity is captured here
    pub fn new(connection: Box<dyn NetworkConnection>) -> Self {
        let peer_id = format_peer_id(connection.peer_address(), connection.peer_port());
        metrics().connection_opened();
        Self {
            connection,
            delegates: Arc::new(ConnectionDelegates::new()),
            peer_id,
        }
    }

    /// Start the raw connection's processing loop
    ///
    /// The closures handed to the raw connection look up the current delegate on
    /// every event, so later replacements take effect without restarting.
    pub fn start_processing(&self) -> Result<(), NetworkError> {
        let delegates = self.delegates.clone();
        let message_received: MessageReceivedDelegate = Arc::new(move |message: Vec<u8>| {
            metrics().data_received(message.len());
            if !delegates.notify_data_received(message) {
                trace!("Discarding received data: no delegate registered");
            }
        });

        let delegates = self.delegates.clone();
        let broken: ConnectionBrokenDelegate = Arc::new(move |graceful: bool| {
            metrics().connection_broken(graceful);
            delegates.notify_broken(graceful);
        });

        self.connection.process(message_received, broken)
    }
}

impl Connection for ConnectionAdapter {
    fn peer_id(&self) -> String {
        self.peer_id.clone()
    }

    fn set_data_received_delegate(&self, delegate: Option<DataReceivedDelegate>) {
        self.delegates.set_data_received(delegate);
    }

    fn set_connection_broken_delegate(&self, delegate: Option<BrokenDelegate>) {
        self.delegates.set_broken(delegate);
    }

    fn send_data(&self, data: Vec<u8>) {
        metrics().data_sent(data.len());
        self.connection.send_message(data);
    }

    fn break_connection(&self, clean: bool) {
        debug!(peer = %self.peer_id, clean, "Breaking connection");
        self.connection.close(clean);
    }
}

impl Drop for ConnectionAdapter {
    fn drop(&mut self) {
        // Late events from the raw connection must not reach the engine
        self.delegates.set_data_received(None);
        self.delegates.set_broken(None);
        metrics().connection_released();
    }
}
