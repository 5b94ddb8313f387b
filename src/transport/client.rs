//! The transport entry point and its diagnostics relay
//!
//! [`MqttClientNetworkTransport::connect`] makes exactly one attempt: create a
//! raw connection, relay its diagnostics, resolve the host, connect, install the
//! caller's delegates, start processing. The first failing step ends the attempt
//! with one ERROR diagnostic and the matching [`TransportError`].

use super::{
    BrokenDelegate, ClientTransport, Connection, ConnectionAdapter, DataReceivedDelegate,
};
use crate::config::TransportConfig;
use crate::diagnostics::{
    levels, DiagnosticMessageDelegate, DiagnosticsSender, UnsubscribeDelegate,
};
use crate::error::{TransportError, TransportResult};
use crate::network::{
    ConnectionFactory, DnsResolver, HostResolver, NetworkConnection, TcpConnectionFactory,
};
use crate::observability::metrics;
use crate::transport_span;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, Instrument};

/// Opens MQTT client connections over raw network connections
pub struct MqttClientNetworkTransport {
    config: TransportConfig,
    diagnostics: Arc<DiagnosticsSender>,
    factory: Arc<dyn ConnectionFactory>,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for MqttClientNetworkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClientNetworkTransport")
            .field("config", &self.config)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

impl Default for MqttClientNetworkTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttClientNetworkTransport {
    /// Transport using TCP connections, DNS resolution and the default configuration
    pub fn new() -> Self {
        Self::from_config(&TransportConfig::default())
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::with_components(
            config.clone(),
            Arc::new(TcpConnectionFactory::new(config.network.clone())),
            Arc::new(DnsResolver::new()),
        )
    }

    /// Transport with an injected factory and resolver, fixed for its lifetime
    pub fn with_components(
        config: TransportConfig,
        factory: Arc<dyn ConnectionFactory>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        let diagnostics = Arc::new(DiagnosticsSender::new(
            config.transport.diagnostics_name.clone(),
        ));
        Self {
            config,
            diagnostics,
            factory,
            resolver,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Subscribe to the transport's diagnostics, including relayed connection messages
    pub fn subscribe_to_diagnostics(
        &self,
        delegate: DiagnosticMessageDelegate,
        min_level: usize,
    ) -> UnsubscribeDelegate {
        self.diagnostics.subscribe(delegate, min_level)
    }

    /// Republish the raw connection's diagnostics under `peer_label`
    ///
    /// The subscription is owned by the raw connection's sender and ends with it.
    fn relay_diagnostics(&self, connection: &dyn NetworkConnection, peer_label: &str) {
        let sink = self.diagnostics.clone();
        let label = peer_label.to_string();
        let _subscription = connection.subscribe_to_diagnostics(
            Arc::new(move |_sender: &str, level: usize, message: &str| {
                sink.send(level, format!("{label}: {message}"));
            }),
            self.config.transport.relay_min_level,
        );
    }

    async fn try_connect(
        &self,
        scheme: &str,
        host: &str,
        port: u16,
        peer_label: &str,
        data_received_delegate: Option<DataReceivedDelegate>,
        broken_delegate: Option<BrokenDelegate>,
    ) -> TransportResult<Arc<ConnectionAdapter>> {
        let connection = self
            .factory
            .create(scheme, host)
            .ok_or_else(|| TransportError::FactoryFailure {
                peer: peer_label.to_string(),
            })?;

        self.relay_diagnostics(connection.as_ref(), peer_label);

        let address = self
            .resolver
            .resolve(host)
            .await
            .filter(|address| !address.is_unspecified())
            .ok_or_else(|| TransportError::ResolutionFailure {
                host: host.to_string(),
                peer: peer_label.to_string(),
            })?;
        debug!(%address, "Resolved host");

        connection
            .connect(address, port)
            .await
            .map_err(|source| TransportError::ConnectFailure {
                peer: peer_label.to_string(),
                source,
            })?;

        let adapter = Arc::new(ConnectionAdapter::new(connection));
        adapter.set_data_received_delegate(data_received_delegate);
        adapter.set_connection_broken_delegate(broken_delegate);

        adapter
            .start_processing()
            .map_err(|source| TransportError::ProcessStartFailure {
                peer: adapter.peer_id(),
                source,
            })?;

        Ok(adapter)
    }
}

#[async_trait]
impl ClientTransport for MqttClientNetworkTransport {
    async fn connect(
        &self,
        scheme: &str,
        host_name_or_address: &str,
        port: u16,
        data_received_delegate: Option<DataReceivedDelegate>,
        broken_delegate: Option<BrokenDelegate>,
    ) -> TransportResult<Arc<dyn Connection>> {
        let peer_label = format!("{host_name_or_address}:{port}");
        let span = transport_span!(peer = %peer_label, scheme = scheme);

        async move {
            metrics().connection_attempt();
            let started = Instant::now();

            let result = self
                .try_connect(
                    scheme,
                    host_name_or_address,
                    port,
                    &peer_label,
                    data_received_delegate,
                    broken_delegate,
                )
                .await;

            match result {
                Ok(adapter) => {
                    metrics().connection_established(started.elapsed());
                    info!(peer_id = %adapter.peer_id(), "Connection established");
                    let connection: Arc<dyn Connection> = adapter;
                    Ok(connection)
                }
                Err(e) => {
                    metrics().connection_failed(&e);
                    self.diagnostics.send(levels::ERROR, e.detailed_message());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}
