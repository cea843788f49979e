//! Server counters for monitoring.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection and request counters, shared between the server and handlers.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total requests processed.
    pub requests_total: AtomicU64,
    /// Requests answered with an `ERROR` reply.
    pub requests_failed: AtomicU64,
    /// Connections accepted since creation.
    pub connections_accepted: AtomicU64,
    /// Connections dropped because the limit was reached.
    pub connections_rejected: AtomicU64,
    /// Currently open connections.
    pub active_connections: AtomicUsize,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connected_clients: usize,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub started_at: Option<String>,
    pub uptime_seconds: i64,
}

impl ServerMetrics {
    /// Create new server metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment request count.
    pub fn record_request(&self, success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_started(&self) {
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub(crate) fn mark_stopped(&self) {
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Get total request count.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get failed request count.
    pub fn failed_requests(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    /// Get active connection count.
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let started_at = *self.started_at.lock().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            connected_clients: self.active(),
            requests_total: self.total_requests(),
            requests_failed: self.failed_requests(),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            started_at: started_at.map(|t| t.to_rfc3339()),
            uptime_seconds: started_at
                .map(|t| (Utc::now() - t).num_seconds())
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters() {
        let metrics = ServerMetrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_request(true);

        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.failed_requests(), 1);
    }

    #[test]
    fn test_connection_gauge() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connected_clients, 1);
        assert_eq!(snapshot.connections_accepted, 2);
        assert!(snapshot.started_at.is_none());
    }

    #[test]
    fn test_started_at() {
        let metrics = ServerMetrics::new();
        metrics.mark_started();
        let snapshot = metrics.snapshot();
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.uptime_seconds >= 0);

        metrics.mark_stopped();
        assert!(metrics.snapshot().started_at.is_none());
    }
}
