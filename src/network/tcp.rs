//! Default raw connection over tokio TCP sockets
//!
//! A connected [`TcpNetworkConnection`] runs two tasks on the ambient tokio
//! runtime once `process` is called: a reader delivering inbound chunks in order
//! and a writer draining the outbound queue. Whichever of them first observes the
//! end of the connection reports it, exactly once.

use super::{
    ConnectionBrokenDelegate, ConnectionFactory, MessageReceivedDelegate, NetworkConnection,
    NetworkError,
};
use crate::config::NetworkSection;
use crate::connection_span;
use crate::diagnostics::{
    levels, DiagnosticMessageDelegate, DiagnosticsSender, UnsubscribeDelegate,
};
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, Instrument};

/// Sender name used on every connection's diagnostics
pub const DIAGNOSTICS_NAME: &str = "TcpNetworkConnection";

enum Outgoing {
    Data(Vec<u8>),
    Close { clean: bool },
}

enum SocketState {
    Idle,
    Connected(TcpStream),
    Processing(mpsc::UnboundedSender<Outgoing>),
    Released,
}

/// State shared between the connection and its tasks
struct Shared {
    closing: AtomicBool,
    broken_reported: AtomicBool,
    /// Held while a message is delivered or the broken report is made
    delivery: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            closing: AtomicBool::new(false),
            broken_reported: AtomicBool::new(false),
            delivery: Mutex::new(()),
            shutdown,
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Deliver one inbound chunk unless the connection is closing or already broken
    fn deliver(&self, message_received: &MessageReceivedDelegate, message: Vec<u8>) -> bool {
        let _gate = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closing() || self.broken_reported.load(Ordering::SeqCst) {
            return false;
        }
        message_received(message);
        true
    }

    /// Report the connection as broken; only the first report reaches the delegate
    fn report_broken(&self, broken: &ConnectionBrokenDelegate, graceful: bool) -> bool {
        let _gate = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if self.broken_reported.swap(true, Ordering::SeqCst) {
            return false;
        }
        broken(graceful);
        true
    }
}

/// Raw network connection backed by a tokio [`TcpStream`]
pub struct TcpNetworkConnection {
    config: NetworkSection,
    diagnostics: Arc<DiagnosticsSender>,
    state: Mutex<SocketState>,
    peer: OnceLock<SocketAddrV4>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TcpNetworkConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpNetworkConnection")
            .field("peer", &self.peer.get())
            .field("closing", &self.shared.is_closing())
            .finish()
    }
}

impl Default for TcpNetworkConnection {
    fn default() -> Self {
        Self::new(NetworkSection::default())
    }
}

impl TcpNetworkConnection {
    pub fn new(config: NetworkSection) -> Self {
        Self {
            config,
            diagnostics: Arc::new(DiagnosticsSender::new(DIAGNOSTICS_NAME)),
            state: Mutex::new(SocketState::Idle),
            peer: OnceLock::new(),
            shared: Arc::new(Shared::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer_label(&self) -> String {
        self.peer
            .get()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unconnected".to_string())
    }
}

#[async_trait]
impl NetworkConnection for TcpNetworkConnection {
    fn subscribe_to_diagnostics(
        &self,
        delegate: DiagnosticMessageDelegate,
        min_level: usize,
    ) -> UnsubscribeDelegate {
        self.diagnostics.subscribe(delegate, min_level)
    }

    async fn connect(&self, address: Ipv4Addr, port: u16) -> Result<(), NetworkError> {
        if !matches!(*self.lock_state(), SocketState::Idle) {
            return Err(NetworkError::AlreadyConnected);
        }

        let target = SocketAddrV4::new(address, port);
        let stream = match TcpStream::connect(target).await {
            Ok(stream) => stream,
            Err(e) => {
                self.diagnostics
                    .send(levels::WARNING, format!("error connecting to {target}: {e}"));
                return Err(NetworkError::Io(e));
            }
        };

        if self.config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        let peer = match stream.peer_addr()? {
            SocketAddr::V4(peer) => peer,
            SocketAddr::V6(_) => target,
        };

        {
            let mut state = self.lock_state();
            if !matches!(*state, SocketState::Idle) {
                return Err(NetworkError::AlreadyConnected);
            }
            *state = SocketState::Connected(stream);
        }
        let _ = self.peer.set(peer);

        self.diagnostics
            .send(levels::INFO, format!("connected to {peer}"));
        Ok(())
    }

    fn process(
        &self,
        message_received: MessageReceivedDelegate,
        broken: ConnectionBrokenDelegate,
    ) -> Result<(), NetworkError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| NetworkError::NoRuntime)?;

        let stream = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, SocketState::Released) {
                SocketState::Connected(stream) => stream,
                SocketState::Processing(outgoing) => {
                    *state = SocketState::Processing(outgoing);
                    return Err(NetworkError::AlreadyProcessing);
                }
                other => {
                    *state = other;
                    return Err(NetworkError::NotConnected);
                }
            }
        };

        let (reader, writer) = stream.into_split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        *self.lock_state() = SocketState::Processing(outgoing_tx);

        let peer = self.peer_label();
        runtime.spawn(
            run_reader(
                reader,
                self.shared.clone(),
                self.diagnostics.clone(),
                message_received,
                broken.clone(),
                self.config.receive_buffer_size,
            )
            .instrument(connection_span!(peer = %peer, role = "reader")),
        );
        runtime.spawn(
            run_writer(
                writer,
                outgoing_rx,
                self.shared.clone(),
                self.diagnostics.clone(),
                broken,
            )
            .instrument(connection_span!(peer = %peer, role = "writer")),
        );

        debug!(peer = %peer, "Started processing connection");
        Ok(())
    }

    fn send_message(&self, message: Vec<u8>) {
        if self.shared.is_closing() {
            self.diagnostics.send(
                levels::DEBUG,
                format!("dropping {} bytes: connection is closing", message.len()),
            );
            return;
        }

        let state = self.lock_state();
        match &*state {
            SocketState::Processing(outgoing) => {
                if outgoing.send(Outgoing::Data(message)).is_err() {
                    self.diagnostics.send(
                        levels::WARNING,
                        "dropping message: connection is no longer processing",
                    );
                }
            }
            _ => {
                self.diagnostics.send(
                    levels::WARNING,
                    "dropping message: connection is not processing",
                );
            }
        }
    }

    fn close(&self, clean: bool) {
        self.shared.closing.store(true, Ordering::SeqCst);

        let mut state = self.lock_state();
        match &*state {
            SocketState::Processing(outgoing) => {
                // Queued data is written before the close is carried out
                let _ = outgoing.send(Outgoing::Close { clean });
            }
            SocketState::Connected(_) => {
                *state = SocketState::Released;
            }
            SocketState::Idle | SocketState::Released => {}
        }
    }

    fn peer_address(&self) -> Ipv4Addr {
        self.peer
            .get()
            .map(|peer| *peer.ip())
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    fn peer_port(&self) -> u16 {
        self.peer.get().map(SocketAddrV4::port).unwrap_or(0)
    }
}

impl Drop for TcpNetworkConnection {
    fn drop(&mut self) {
        // The owner is gone, so nobody is left to hear about the break
        let close_queued = self.shared.closing.swap(true, Ordering::SeqCst);
        self.shared.broken_reported.store(true, Ordering::SeqCst);

        // A queued close lets the writer drain up to it and then stop both tasks
        if !close_queued {
            self.shared.signal_shutdown();
        }
    }
}

async fn run_reader(
    mut reader: OwnedReadHalf,
    shared: Arc<Shared>,
    diagnostics: Arc<DiagnosticsSender>,
    message_received: MessageReceivedDelegate,
    broken: ConnectionBrokenDelegate,
    buffer_size: usize,
) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut buffer = BytesMut::with_capacity(buffer_size);
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        buffer.reserve(buffer_size);
        let mut limited = (&mut reader).take(buffer_size as u64);
        let result = tokio::select! {
            _ = shutdown.changed() => break,
            result = limited.read_buf(&mut buffer) => result,
        };

        match result {
            Ok(0) => {
                // While closing, the writer owns the broken report
                if !shared.is_closing() {
                    diagnostics.send(levels::INFO, "connection closed by peer");
                    shared.report_broken(&broken, true);
                    shared.signal_shutdown();
                }
                break;
            }
            Ok(_) => {
                let chunk = buffer.split().to_vec();
                if !shared.deliver(&message_received, chunk) {
                    break;
                }
            }
            Err(e) => {
                if !shared.is_closing() {
                    diagnostics.send(levels::WARNING, format!("error reading from peer: {e}"));
                    shared.report_broken(&broken, false);
                    shared.signal_shutdown();
                }
                break;
            }
        }
    }
    debug!("Reader stopped");
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    shared: Arc<Shared>,
    diagnostics: Arc<DiagnosticsSender>,
    broken: ConnectionBrokenDelegate,
) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let next = tokio::select! {
            biased;
            next = outgoing.recv() => next,
            _ = shutdown.changed() => break,
        };

        match next {
            Some(Outgoing::Data(message)) => {
                if let Err(e) = writer.write_all(&message).await {
                    diagnostics.send(levels::WARNING, format!("error writing to peer: {e}"));
                    shared.report_broken(&broken, false);
                    shared.signal_shutdown();
                    break;
                }
            }
            Some(Outgoing::Close { clean }) => {
                if clean {
                    if let Err(e) = writer.shutdown().await {
                        diagnostics.send(levels::DEBUG, format!("error shutting down: {e}"));
                    }
                }
                diagnostics.send(
                    levels::INFO,
                    if clean {
                        "connection closed gracefully"
                    } else {
                        "connection closed abruptly"
                    },
                );
                shared.report_broken(&broken, clean);
                shared.signal_shutdown();
                break;
            }
            None => {
                shared.signal_shutdown();
                break;
            }
        }
    }
    debug!("Writer stopped");
}

/// Default factory: ignores the scheme and creates a [`TcpNetworkConnection`]
#[derive(Debug, Clone, Default)]
pub struct TcpConnectionFactory {
    config: NetworkSection,
}

impl TcpConnectionFactory {
    pub fn new(config: NetworkSection) -> Self {
        Self { config }
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn create(&self, scheme: &str, server_name: &str) -> Option<Box<dyn NetworkConnection>> {
        debug!(scheme, server_name, "Creating TCP network connection");
        Some(Box::new(TcpNetworkConnection::new(self.config.clone())))
    }
}
