//! The set of open server-side connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::metrics::ServerMetrics;
use crate::transport::Connection;

/// Open connections keyed by id. Entries are removed when a session ends.
#[derive(Debug)]
pub(crate) struct ConnectionSet {
    open: Mutex<HashMap<Uuid, Connection>>,
    metrics: Arc<ServerMetrics>,
}

impl ConnectionSet {
    pub(crate) fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Connection>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, connection: Connection) {
        if self.lock().insert(connection.id(), connection).is_none() {
            self.metrics.connection_opened();
        }
    }

    /// Returns true if the connection was still tracked.
    pub(crate) fn remove(&self, id: Uuid) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            self.metrics.connection_closed();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Close and forget every tracked connection. Sessions still unwinding
    /// find their entry gone and leave the counters alone.
    pub(crate) fn close_all(&self) -> usize {
        let drained: Vec<Connection> = self.lock().drain().map(|(_, c)| c).collect();
        for connection in &drained {
            connection.close();
            self.metrics.connection_closed();
        }
        drained.len()
    }
}
