//! Handler types: execution context and results.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::protocol::Message;
use crate::transport::Connection;

/// What a handler returns: a reply, no reply, or a failure.
pub type HandlerResult = Result<Option<Message>, TransportError>;

/// Context for a single handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Type of the message being handled.
    pub message_type: String,
    /// Request id, if the client sent one.
    pub request_id: Option<u64>,
    /// When the server decoded the request.
    pub received_at: DateTime<Utc>,
    outbound: Option<Outbound>,
}

/// The connection the request arrived on, plus the runtime to drive writes
/// from the blocking pool.
#[derive(Debug, Clone)]
struct Outbound {
    connection: Connection,
    runtime: Handle,
}

impl HandlerContext {
    /// Context for a request received on `connection`.
    pub fn new(connection: Connection, runtime: Handle, message: &Message) -> Self {
        Self {
            message_type: message.message_type.clone(),
            request_id: message.id,
            received_at: Utc::now(),
            outbound: Some(Outbound {
                connection,
                runtime,
            }),
        }
    }

    /// Context with no connection attached, for direct dispatch and tests.
    pub fn detached(message: &Message) -> Self {
        Self {
            message_type: message.message_type.clone(),
            request_id: message.id,
            received_at: Utc::now(),
            outbound: None,
        }
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        self.outbound.as_ref().map(|o| o.connection.id())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.outbound.as_ref().map(|o| o.connection.peer_addr())
    }

    /// Push an extra message to the client, ahead of the reply.
    ///
    /// Blocks the calling (blocking-pool) thread until the frame is written.
    pub fn send(&self, message: Message) -> TransportResult<()> {
        match &self.outbound {
            Some(outbound) => outbound.runtime.block_on(outbound.connection.send(message)),
            None => Err(TransportError::NotConnected),
        }
    }
}
