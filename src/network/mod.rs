//! Raw network connection layer
//!
//! These are the collaborators the transport drives but does not implement the
//! protocol of: a byte-stream [`NetworkConnection`], the [`ConnectionFactory`]
//! that creates one per connection attempt, and the [`HostResolver`] that turns
//! a host name into an IPv4 address.
//!
//! # Threading contract
//!
//! A raw connection delivers inbound messages and its broken report on an
//! execution context of its own choosing (the default TCP connection uses tasks
//! on the ambient tokio runtime). Those deliveries may run concurrently with
//! calls to `send_message` or `close` from any other thread. Delegates passed to
//! `process` must therefore be `Send + Sync` and must tolerate being called from
//! a thread other than the one that registered them. A connection reports broken
//! at most once and never delivers a message after reporting broken.

use crate::diagnostics::{DiagnosticMessageDelegate, UnsubscribeDelegate};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;

pub mod resolver;
pub mod tcp;

pub use resolver::DnsResolver;
pub use tcp::{TcpConnectionFactory, TcpNetworkConnection};

/// Called with each chunk of bytes received from the peer, in order
pub type MessageReceivedDelegate = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Called once when the connection is broken; the flag is `true` for a graceful close
pub type ConnectionBrokenDelegate = Arc<dyn Fn(bool) + Send + Sync>;

/// Errors raised by raw network connections
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection is not connected")]
    NotConnected,
    #[error("Connection is already connected")]
    AlreadyConnected,
    #[error("Connection is already processing")]
    AlreadyProcessing,
    #[error("No async runtime available to process the connection")]
    NoRuntime,
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// An OS-level byte-stream connection to a single peer
#[async_trait]
pub trait NetworkConnection: Send + Sync {
    /// Subscribe to diagnostic messages published by this connection
    fn subscribe_to_diagnostics(
        &self,
        delegate: DiagnosticMessageDelegate,
        min_level: usize,
    ) -> UnsubscribeDelegate;

    /// Establish the connection to `address:port`
    async fn connect(&self, address: Ipv4Addr, port: u16) -> Result<(), NetworkError>;

    /// Start delivering inbound messages and the broken report
    fn process(
        &self,
        message_received: MessageReceivedDelegate,
        broken: ConnectionBrokenDelegate,
    ) -> Result<(), NetworkError>;

    /// Queue a message for sending; failures are reported through diagnostics
    fn send_message(&self, message: Vec<u8>);

    /// Close the connection, gracefully when `clean` is set
    fn close(&self, clean: bool);

    /// Address of the connected peer, or `0.0.0.0` before connecting
    fn peer_address(&self) -> Ipv4Addr;

    /// Port of the connected peer, or `0` before connecting
    fn peer_port(&self) -> u16;
}

/// Creates raw network connections for the transport
///
/// Returning `None` means no connection could be constructed for the scheme and
/// server name. Factories must not perform network I/O themselves.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, scheme: &str, server_name: &str) -> Option<Box<dyn NetworkConnection>>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(&str, &str) -> Option<Box<dyn NetworkConnection>> + Send + Sync,
{
    fn create(&self, scheme: &str, server_name: &str) -> Option<Box<dyn NetworkConnection>> {
        self(scheme, server_name)
    }
}

/// Resolves host names to IPv4 addresses
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns `None` when the host has no usable (non-zero) IPv4 address
    async fn resolve(&self, host: &str) -> Option<Ipv4Addr>;
}
