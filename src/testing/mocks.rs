//! Mock implementations for testing
//!
//! Provides an in-memory raw connection, a factory that hands those out, and a
//! table-driven resolver, so the transport can be exercised without sockets or DNS.

use crate::diagnostics::{DiagnosticMessageDelegate, DiagnosticsSender, UnsubscribeDelegate};
use crate::network::{
    ConnectionBrokenDelegate, ConnectionFactory, HostResolver, MessageReceivedDelegate,
    NetworkConnection, NetworkError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Sender name used by mock connection diagnostics
pub const MOCK_DIAGNOSTICS_NAME: &str = "MockNetworkConnection";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MockState {
    diagnostics: DiagnosticsSender,
    peer: Mutex<(Ipv4Addr, u16)>,
    fail_connect: AtomicBool,
    fail_process: AtomicBool,
    connect_calls: Mutex<Vec<(Ipv4Addr, u16)>>,
    delegates: Mutex<Option<(MessageReceivedDelegate, ConnectionBrokenDelegate)>>,
    broken: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
    closes: Mutex<Vec<bool>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            diagnostics: DiagnosticsSender::new(MOCK_DIAGNOSTICS_NAME),
            peer: Mutex::new((Ipv4Addr::UNSPECIFIED, 0)),
            fail_connect: AtomicBool::new(false),
            fail_process: AtomicBool::new(false),
            connect_calls: Mutex::new(Vec::new()),
            delegates: Mutex::new(None),
            broken: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
        }
    }
}

/// In-memory raw connection driven from a [`MockConnectionHandle`]
pub struct MockNetworkConnection {
    state: Arc<MockState>,
}

/// Test-side handle onto a [`MockNetworkConnection`]
///
/// Stays usable after the connection itself has been dropped.
#[derive(Clone)]
pub struct MockConnectionHandle {
    state: Arc<MockState>,
}

impl MockNetworkConnection {
    pub fn pair() -> (Self, MockConnectionHandle) {
        let state = Arc::new(MockState::default());
        (
            Self {
                state: state.clone(),
            },
            MockConnectionHandle { state },
        )
    }
}

#[async_trait]
impl NetworkConnection for MockNetworkConnection {
    fn subscribe_to_diagnostics(
        &self,
        delegate: DiagnosticMessageDelegate,
        min_level: usize,
    ) -> UnsubscribeDelegate {
        self.state.diagnostics.subscribe(delegate, min_level)
    }

    async fn connect(&self, address: Ipv4Addr, port: u16) -> Result<(), NetworkError> {
        lock(&self.state.connect_calls).push((address, port));
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(NetworkError::Rejected("connection refused".to_string()));
        }
        *lock(&self.state.peer) = (address, port);
        Ok(())
    }

    fn process(
        &self,
        message_received: MessageReceivedDelegate,
        broken: ConnectionBrokenDelegate,
    ) -> Result<(), NetworkError> {
        if self.state.fail_process.load(Ordering::SeqCst) {
            return Err(NetworkError::Rejected("processing refused".to_string()));
        }
        let mut delegates = lock(&self.state.delegates);
        if delegates.is_some() {
            return Err(NetworkError::AlreadyProcessing);
        }
        *delegates = Some((message_received, broken));
        Ok(())
    }

    fn send_message(&self, message: Vec<u8>) {
        lock(&self.state.sent).push(message);
    }

    fn close(&self, clean: bool) {
        lock(&self.state.closes).push(clean);
        MockConnectionHandle {
            state: self.state.clone(),
        }
        .report_broken(clean);
    }

    fn peer_address(&self) -> Ipv4Addr {
        lock(&self.state.peer).0
    }

    fn peer_port(&self) -> u16 {
        lock(&self.state.peer).1
    }
}

impl MockConnectionHandle {
    /// Make the next `connect` fail
    pub fn fail_connect(&self) {
        self.state.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Make `process` fail
    pub fn fail_process(&self) {
        self.state.fail_process.store(true, Ordering::SeqCst);
    }

    /// Override the peer reported by the connection
    pub fn set_peer(&self, address: Ipv4Addr, port: u16) {
        *lock(&self.state.peer) = (address, port);
    }

    /// Deliver inbound bytes as the connection would
    ///
    /// Returns `false` when the connection is not processing or already broken.
    pub fn deliver(&self, message: Vec<u8>) -> bool {
        if self.state.broken.load(Ordering::SeqCst) {
            return false;
        }
        let message_received = match &*lock(&self.state.delegates) {
            Some((message_received, _)) => message_received.clone(),
            None => return false,
        };
        message_received(message);
        true
    }

    /// Report the connection as broken; only the first report is delivered
    pub fn report_broken(&self, graceful: bool) -> bool {
        let broken = match &*lock(&self.state.delegates) {
            Some((_, broken)) => broken.clone(),
            None => return false,
        };
        if self.state.broken.swap(true, Ordering::SeqCst) {
            return false;
        }
        broken(graceful);
        true
    }

    /// Publish a diagnostic from the connection
    pub fn emit_diagnostic(&self, level: usize, message: &str) {
        self.state.diagnostics.send(level, message);
    }

    pub fn diagnostics_subscribers(&self) -> usize {
        self.state.diagnostics.subscriber_count()
    }

    pub fn is_processing(&self) -> bool {
        lock(&self.state.delegates).is_some()
    }

    pub fn is_broken(&self) -> bool {
        self.state.broken.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> Vec<(Ipv4Addr, u16)> {
        lock(&self.state.connect_calls).clone()
    }

    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        lock(&self.state.sent).clone()
    }

    pub fn close_calls(&self) -> Vec<bool> {
        lock(&self.state.closes).clone()
    }
}

/// Factory handing out [`MockNetworkConnection`]s and keeping their handles
#[derive(Default)]
pub struct MockConnectionFactory {
    fail_create: bool,
    fail_connect: bool,
    fail_process: bool,
    requests: Mutex<Vec<(String, String)>>,
    handles: Mutex<Vec<MockConnectionHandle>>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that never produces a connection
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Default::default()
        }
    }

    /// A factory whose connections refuse to connect
    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    /// A factory whose connections refuse to start processing
    pub fn with_process_failure() -> Self {
        Self {
            fail_process: true,
            ..Default::default()
        }
    }

    /// Every `(scheme, server_name)` the factory was asked for
    pub fn requests(&self) -> Vec<(String, String)> {
        lock(&self.requests).clone()
    }

    pub fn handles(&self) -> Vec<MockConnectionHandle> {
        lock(&self.handles).clone()
    }

    pub fn last_handle(&self) -> Option<MockConnectionHandle> {
        lock(&self.handles).last().cloned()
    }
}

impl ConnectionFactory for MockConnectionFactory {
    fn create(&self, scheme: &str, server_name: &str) -> Option<Box<dyn NetworkConnection>> {
        lock(&self.requests).push((scheme.to_string(), server_name.to_string()));
        if self.fail_create {
            return None;
        }

        let (connection, handle) = MockNetworkConnection::pair();
        if self.fail_connect {
            handle.fail_connect();
        }
        if self.fail_process {
            handle.fail_process();
        }
        lock(&self.handles).push(handle);
        Some(Box::new(connection))
    }
}

/// Resolver answering from a fixed table, then from literal addresses
#[derive(Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Ipv4Addr>,
    lookups: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, address: Ipv4Addr) -> Self {
        self.hosts.insert(host.to_string(), address);
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        lock(&self.lookups).clone()
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        lock(&self.lookups).push(host.to_string());
        self.hosts
            .get(host)
            .copied()
            .or_else(|| host.parse().ok())
            .filter(|address: &Ipv4Addr| !address.is_unspecified())
    }
}
