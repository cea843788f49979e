//! Handler registry for dispatching messages by type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{HandlerErrorKind, TransportError, TransportResult};
use crate::protocol::Message;
use crate::server::ServerMetrics;

use super::system::{PingHandler, StatusHandler, PING, SERVER_STATUS};
use super::traits::Handler;
use super::types::{HandlerContext, HandlerResult};

/// Mapping from message type to handler.
///
/// Registering a type twice is rejected with `DuplicateHandler`; the first
/// registration stays in place. The server wraps the registry in an `Arc`
/// when it starts, after which it is only read.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in system handlers.
    ///
    /// `SERVER_STATUS` is only available when metrics are supplied.
    pub fn with_builtins(metrics: Option<Arc<ServerMetrics>>) -> Self {
        let mut registry = Self::new();

        registry.insert(PING, Arc::new(PingHandler));
        if let Some(metrics) = metrics {
            registry.insert(SERVER_STATUS, Arc::new(StatusHandler::new(metrics)));
        }

        info!(count = registry.len(), "Handler registry initialized");

        registry
    }

    /// Register a handler for `message_type`.
    pub fn register<H>(&mut self, message_type: impl Into<String>, handler: H) -> TransportResult<()>
    where
        H: Handler + 'static,
    {
        self.register_arc(message_type, Arc::new(handler))
    }

    /// Register a shared handler for `message_type`.
    pub fn register_arc(
        &mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> TransportResult<()> {
        let message_type = message_type.into();
        if self.handlers.contains_key(&message_type) {
            return Err(TransportError::Handler {
                kind: HandlerErrorKind::DuplicateHandler { message_type },
            });
        }
        self.insert(message_type, handler);
        Ok(())
    }

    fn insert(&mut self, message_type: impl Into<String>, handler: Arc<dyn Handler>) {
        let message_type = message_type.into();
        debug!(message_type = %message_type, "Registering handler");
        self.handlers.insert(message_type, handler);
    }

    /// Get a handler by message type.
    pub fn get(&self, message_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(message_type).cloned()
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a message to its handler on the current thread.
    pub fn dispatch(&self, ctx: &HandlerContext, message: Message) -> HandlerResult {
        let handler = self
            .handlers
            .get(&message.message_type)
            .ok_or_else(|| TransportError::Handler {
                kind: HandlerErrorKind::UnknownType {
                    message_type: message.message_type.clone(),
                },
            })?;

        handler.handle(ctx, message)
    }

    /// List all registered message types, sorted.
    pub fn list_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}
