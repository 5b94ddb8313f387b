//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected latency window for tracking
//! connection attempts and traffic through the transport.

use crate::error::TransportError;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_CONNECT_TIMES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Connection attempts
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    factory_failures: AtomicU64,
    resolution_failures: AtomicU64,
    connect_failures: AtomicU64,
    process_start_failures: AtomicU64,
    active_connections: AtomicU64,
    connections_broken_gracefully: AtomicU64,
    connections_broken_abruptly: AtomicU64,

    // Traffic
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,

    // Successful connect durations, in milliseconds
    connect_times: Mutex<Vec<u64>>,

    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            factory_failures: AtomicU64::new(0),
            resolution_failures: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            process_start_failures: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            connections_broken_gracefully: AtomicU64::new(0),
            connections_broken_abruptly: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connect_times: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self, duration: Duration) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut times) = self.connect_times.lock() {
            times.push(duration.as_millis() as u64);

            // Limit to the most recent measurements
            if times.len() > MAX_CONNECT_TIMES {
                times.remove(0);
            }
        }
    }

    pub fn connection_failed(&self, error: &TransportError) {
        let counter = match error {
            TransportError::FactoryFailure { .. } => &self.factory_failures,
            TransportError::ResolutionFailure { .. } => &self.resolution_failures,
            TransportError::ConnectFailure { .. } => &self.connect_failures,
            TransportError::ProcessStartFailure { .. } => &self.process_start_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_released(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| {
                active.checked_sub(1)
            });
    }

    pub fn connection_broken(&self, graceful: bool) {
        if graceful {
            self.connections_broken_gracefully
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_broken_abruptly
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    // Traffic metrics
    pub fn data_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn data_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Reset all counters, mainly for tests
    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connections_established,
            &self.factory_failures,
            &self.resolution_failures,
            &self.connect_failures,
            &self.process_start_failures,
            &self.active_connections,
            &self.connections_broken_gracefully,
            &self.connections_broken_abruptly,
            &self.messages_sent,
            &self.bytes_sent,
            &self.messages_received,
            &self.bytes_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.connect_times.lock() {
            times.clear();
        }
        self.started_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Average, p50 and p95 of recorded connect durations
    fn calculate_connect_time_statistics(&self) -> (f64, f64, f64) {
        let mut times = match self.connect_times.lock() {
            Ok(times) => times.clone(),
            Err(_) => return (0.0, 0.0, 0.0),
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        times.sort_unstable();
        let average = times.iter().sum::<u64>() as f64 / times.len() as f64;
        (average, percentile(&times, 50.0), percentile(&times, 95.0))
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_connect_time_ms, connect_time_p50_ms, connect_time_p95_ms) =
            self.calculate_connect_time_statistics();

        let factory_failures = self.factory_failures.load(Ordering::Relaxed);
        let resolution_failures = self.resolution_failures.load(Ordering::Relaxed);
        let connect_failures = self.connect_failures.load(Ordering::Relaxed);
        let process_start_failures = self.process_start_failures.load(Ordering::Relaxed);

        MetricsSnapshot {
            connections: ConnectionMetrics {
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: factory_failures
                    + resolution_failures
                    + connect_failures
                    + process_start_failures,
                factory_failures,
                resolution_failures,
                connect_failures,
                process_start_failures,
                active_connections: self.active_connections.load(Ordering::Relaxed),
                broken_gracefully: self.connections_broken_gracefully.load(Ordering::Relaxed),
                broken_abruptly: self.connections_broken_abruptly.load(Ordering::Relaxed),
                avg_connect_time_ms,
                connect_time_p50_ms,
                connect_time_p95_ms,
            },
            traffic: TrafficMetrics {
                messages_sent: self.messages_sent.load(Ordering::Relaxed),
                bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                bytes_received: self.bytes_received.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub connections: ConnectionMetrics,
    pub traffic: TrafficMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub factory_failures: u64,
    pub resolution_failures: u64,
    pub connect_failures: u64,
    pub process_start_failures: u64,
    pub active_connections: u64,
    pub broken_gracefully: u64,
    pub broken_abruptly: u64,
    pub avg_connect_time_ms: f64,
    pub connect_time_p50_ms: f64,
    pub connect_time_p95_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct TrafficMetrics {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkError;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_metrics() {
        let collector = MetricsCollector::new();

        collector.connection_attempt();
        collector.connection_established(Duration::from_millis(20));
        collector.connection_opened();
        collector.connection_attempt();
        collector.connection_failed(&TransportError::ConnectFailure {
            peer: "10.0.0.1:1883".to_string(),
            source: NetworkError::NotConnected,
        });

        let metrics = collector.get_metrics();
        assert_eq!(metrics.connections.connection_attempts, 2);
        assert_eq!(metrics.connections.connections_established, 1);
        assert_eq!(metrics.connections.connect_failures, 1);
        assert_eq!(metrics.connections.connection_failures, 1);
        assert_eq!(metrics.connections.active_connections, 1);
        assert!(metrics.connections.avg_connect_time_ms >= 20.0);
    }

    #[test]
    fn test_release_never_underflows() {
        let collector = MetricsCollector::new();
        collector.connection_released();
        assert_eq!(collector.get_metrics().connections.active_connections, 0);
    }

    #[test]
    fn test_traffic_metrics() {
        let collector = MetricsCollector::new();

        collector.data_sent(10);
        collector.data_sent(5);
        collector.data_received(7);
        collector.connection_broken(true);
        collector.connection_broken(false);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.traffic.messages_sent, 2);
        assert_eq!(metrics.traffic.bytes_sent, 15);
        assert_eq!(metrics.traffic.messages_received, 1);
        assert_eq!(metrics.traffic.bytes_received, 7);
        assert_eq!(metrics.connections.broken_gracefully, 1);
        assert_eq!(metrics.connections.broken_abruptly, 1);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let mut handles = vec![];

        for _ in 0..10 {
            let collector_clone = Arc::clone(&collector);
            let handle = thread::spawn(move || {
                for _ in 0..100 {
                    collector_clone.connection_attempt();
                    collector_clone.data_received(1);
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.connections.connection_attempts, 1000);
        assert_eq!(metrics.traffic.bytes_received, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        let p50 = percentile(&data, 50.0);
        let p95 = percentile(&data, 95.0);

        assert!((p50 - 5.5).abs() < 0.1, "P50: expected ~5.5, got {p50}");
        assert!((p95 - 9.5).abs() < 0.1, "P95: expected ~9.5, got {p95}");
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.connection_attempt();
        collector.data_sent(3);
        collector.connection_established(Duration::from_millis(5));

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.connections.connection_attempts, 0);
        assert_eq!(metrics.traffic.bytes_sent, 0);
        assert_eq!(metrics.connections.avg_connect_time_ms, 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        let json = serde_json::to_value(collector.get_metrics()).unwrap();
        assert!(json["connections"]["connection_attempts"].is_u64());
        assert!(json["traffic"]["bytes_sent"].is_u64());
    }
}
