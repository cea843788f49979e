//! Server status handler.

use std::sync::Arc;

use crate::handlers::traits::Handler;
use crate::handlers::types::{HandlerContext, HandlerResult};
use crate::protocol::Message;
use crate::server::ServerMetrics;

/// Message type answered by [`StatusHandler`].
pub const SERVER_STATUS: &str = "SERVER_STATUS";

/// Reports connection and request counters.
pub struct StatusHandler {
    metrics: Arc<ServerMetrics>,
}

impl StatusHandler {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self { metrics }
    }
}

impl Handler for StatusHandler {
    fn handle(&self, _ctx: &HandlerContext, message: Message) -> HandlerResult {
        let reply = message
            .reply_success()
            .with_encoded("status", &self.metrics.snapshot())?;
        Ok(Some(reply))
    }
}
