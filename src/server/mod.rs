//! Server module.
//!
//! Accepts TCP connections and runs one session task per client. Each
//! session decodes requests, dispatches them through the handler registry
//! and writes the replies back on the same connection.

mod connections;
mod listener;
mod metrics;
mod session;

pub use listener::Server;
pub use metrics::{MetricsSnapshot, ServerMetrics};
