//! TCP connection tests against a local listener
//!
//! Each test binds `127.0.0.1:0`, so no broker or fixed port is needed.

use mqtt_network_transport::config::{NetworkSection, TransportConfig};
use mqtt_network_transport::diagnostics::levels;
use mqtt_network_transport::network::{NetworkConnection, TcpNetworkConnection};
use mqtt_network_transport::transport::{ClientTransport, MqttClientNetworkTransport};
use mqtt_network_transport::NetworkError;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn local_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

enum Event {
    Data(Vec<u8>),
    Broken(bool),
}

fn event_channel() -> (
    Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    Arc<dyn Fn(bool) + Send + Sync>,
    mpsc::UnboundedReceiver<Event>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let data_tx = tx.clone();
    let on_data: Arc<dyn Fn(Vec<u8>) + Send + Sync> = Arc::new(move |data: Vec<u8>| {
        let _ = data_tx.send(Event::Data(data));
    });
    let on_broken: Arc<dyn Fn(bool) + Send + Sync> = Arc::new(move |graceful: bool| {
        let _ = tx.send(Event::Broken(graceful));
    });
    (on_data, on_broken, rx)
}

/// Collect events until the broken report arrives
async fn collect_until_broken(rx: &mut mpsc::UnboundedReceiver<Event>) -> (Vec<u8>, bool) {
    let mut bytes = Vec::new();
    loop {
        match timeout(WAIT, rx.recv()).await.expect("timed out waiting for events") {
            Some(Event::Data(data)) => bytes.extend(data),
            Some(Event::Broken(graceful)) => return (bytes, graceful),
            None => panic!("event channel closed before broken report"),
        }
    }
}

#[tokio::test]
async fn test_connect_records_peer() {
    let (listener, port) = local_listener().await;
    let connection = TcpNetworkConnection::default();

    connection.connect(Ipv4Addr::LOCALHOST, port).await.unwrap();
    let _accepted = listener.accept().await.unwrap();

    assert_eq!(connection.peer_address(), Ipv4Addr::LOCALHOST);
    assert_eq!(connection.peer_port(), port);
    assert!(matches!(
        connection.connect(Ipv4Addr::LOCALHOST, port).await,
        Err(NetworkError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn test_connect_refused_is_io_error() {
    let (listener, port) = local_listener().await;
    drop(listener);

    let connection = TcpNetworkConnection::default();
    let result = connection.connect(Ipv4Addr::LOCALHOST, port).await;

    assert!(matches!(result, Err(NetworkError::Io(_))));
}

#[tokio::test]
async fn test_data_is_delivered_in_order_and_peer_close_is_graceful() {
    let (listener, port) = local_listener().await;
    let connection = TcpNetworkConnection::new(NetworkSection {
        receive_buffer_size: 3,
        ..NetworkSection::default()
    });
    connection.connect(Ipv4Addr::LOCALHOST, port).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    let (on_data, on_broken, mut rx) = event_channel();
    connection.process(on_data, on_broken).unwrap();

    peer.write_all(b"hello, ").await.unwrap();
    peer.write_all(b"broker").await.unwrap();
    drop(peer);

    let (bytes, graceful) = collect_until_broken(&mut rx).await;
    assert_eq!(bytes, b"hello, broker");
    assert!(graceful);
}

#[tokio::test]
async fn test_chunks_never_exceed_receive_buffer_size() {
    let (listener, port) = local_listener().await;
    let connection = TcpNetworkConnection::new(NetworkSection {
        receive_buffer_size: 4,
        ..NetworkSection::default()
    });
    connection.connect(Ipv4Addr::LOCALHOST, port).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    connection
        .process(
            Arc::new(move |data: Vec<u8>| {
                let _ = tx.send(data);
            }),
            Arc::new(|_: bool| {}),
        )
        .unwrap();

    peer.write_all(&[0u8; 64]).await.unwrap();

    let mut total = 0;
    while total < 64 {
        let chunk = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(!chunk.is_empty() && chunk.len() <= 4);
        total += chunk.len();
    }
}

#[tokio::test]
async fn test_sent_messages_reach_peer_in_order() {
    let (listener, port) = local_listener().await;
    let connection = TcpNetworkConnection::default();
    connection.connect(Ipv4Addr::LOCALHOST, port).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    let (on_data, on_broken, mut rx) = event_channel();
    connection.process(on_data, on_broken).unwrap();

    connection.send_message(vec![0x10, 0x01]);
    connection.send_message(vec![0x02]);
    connection.send_message(vec![0x03, 0x04]);
    connection.close(true);

    let mut received = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, vec![0x10, 0x01, 0x02, 0x03, 0x04]);

    let (bytes, graceful) = collect_until_broken(&mut rx).await;
    assert!(bytes.is_empty());
    assert!(graceful);
}

#[tokio::test]
async fn test_process_twice_fails() {
    let (listener, port) = local_listener().await;
    let connection = TcpNetworkConnection::default();
    connection.connect(Ipv4Addr::LOCALHOST, port).await.unwrap();
    let _peer = listener.accept().await.unwrap();

    let (on_data, on_broken, _rx) = event_channel();
    connection
        .process(on_data.clone(), on_broken.clone())
        .unwrap();

    assert!(matches!(
        connection.process(on_data, on_broken),
        Err(NetworkError::AlreadyProcessing)
    ));
}

#[tokio::test]
async fn test_transport_break_reports_graceful_exactly_once() {
    let (listener, port) = local_listener().await;
    let transport = MqttClientNetworkTransport::from_config(&TransportConfig::default());
    let (on_data, on_broken, mut rx) = event_channel();

    let connection = transport
        .connect("mqtt", "127.0.0.1", port, Some(on_data), Some(on_broken))
        .await
        .unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    assert_eq!(connection.peer_id(), format!("127.0.0.1:{port}"));

    connection.send_data(b"ping".to_vec());
    connection.break_connection(true);
    connection.break_connection(false);

    let mut received = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"ping");

    let (bytes, graceful) = collect_until_broken(&mut rx).await;
    assert!(bytes.is_empty());
    assert!(graceful);

    // Nothing follows the broken report
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_release_after_clean_close_still_flushes_queued_writes() {
    let (listener, port) = local_listener().await;
    let connection = TcpNetworkConnection::default();
    connection.connect(Ipv4Addr::LOCALHOST, port).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    let (on_data, on_broken, _rx) = event_channel();
    connection.process(on_data, on_broken).unwrap();

    connection.send_message(vec![0x30, 0x03, 0x00, 0x01, 0x61]);
    connection.close(true);
    drop(connection);

    let mut received = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, vec![0x30, 0x03, 0x00, 0x01, 0x61]);
}

#[tokio::test]
async fn test_disconnect_is_written_when_engine_releases_after_break() {
    let (listener, port) = local_listener().await;
    let transport = MqttClientNetworkTransport::new();

    let connection = transport
        .connect("mqtt", "127.0.0.1", port, None, None)
        .await
        .unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    // DISCONNECT, then a clean break, then the engine lets go of the connection
    connection.send_data(vec![0xe0, 0x00]);
    connection.break_connection(true);
    drop(connection);

    let mut received = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, vec![0xe0, 0x00]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_release_after_clean_close_flushes_on_multi_thread_runtime() {
    for _ in 0..10 {
        let (listener, port) = local_listener().await;
        let connection = TcpNetworkConnection::default();
        connection.connect(Ipv4Addr::LOCALHOST, port).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let (on_data, on_broken, _rx) = event_channel();
        connection.process(on_data, on_broken).unwrap();

        connection.send_message(vec![0xe0, 0x00]);
        connection.close(true);
        drop(connection);

        let mut received = Vec::new();
        timeout(WAIT, peer.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, vec![0xe0, 0x00]);
    }
}

#[tokio::test]
async fn test_transport_relays_connection_diagnostics() {
    let (listener, port) = local_listener().await;
    let transport = MqttClientNetworkTransport::new();
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let _unsubscribe = transport.subscribe_to_diagnostics(
        Arc::new(move |_: &str, level: usize, message: &str| {
            sink.lock().unwrap().push((level, message.to_string()));
        }),
        levels::INFO,
    );

    let _connection = transport
        .connect("mqtt", "127.0.0.1", port, None, None)
        .await
        .unwrap();
    let _peer = listener.accept().await.unwrap();

    let label = format!("127.0.0.1:{port}");
    let messages = messages.lock().unwrap();
    assert!(messages
        .iter()
        .any(|(level, message)| *level == levels::INFO
            && message.starts_with(&format!("{label}: connected to"))));
}

#[tokio::test]
async fn test_transport_connect_refused_is_connect_failure() {
    let (listener, port) = local_listener().await;
    drop(listener);
    let transport = MqttClientNetworkTransport::new();

    let result = transport
        .connect("mqtt", "127.0.0.1", port, None, None)
        .await;

    match result {
        Err(error) => assert_eq!(error.kind(), "connect_failure"),
        Ok(_) => panic!("connect to a closed port should fail"),
    }
}
