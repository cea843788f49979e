//! Per-connection receive loop.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::metrics::ServerMetrics;
use crate::error::{HandlerErrorKind, TransportError, TransportResult};
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::protocol::{Message, Status};
use crate::transport::Connection;

/// Handle a single client connection until it closes.
///
/// Returns `Ok(())` when the peer disconnects or the connection is closed
/// locally, and an error for any other transport failure.
pub(crate) async fn handle_connection(
    connection: Connection,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<ServerMetrics>,
) -> TransportResult<()> {
    loop {
        let request = match connection.receive().await {
            Ok(message) => message,
            Err(e) if e.is_connection_closed() => {
                debug!(connection_id = %connection.id(), "Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some(reply) = process_request(&connection, &registry, &metrics, request).await else {
            continue;
        };

        if let Err(e) = send_reply(&connection, reply).await {
            if e.is_connection_closed() {
                debug!(connection_id = %connection.id(), "Connection closed before reply was sent");
                return Ok(());
            }
            return Err(e);
        }
    }
}

/// Write a reply. If it cannot be encoded (or is over the frame limit),
/// answer with an `ERROR` instead so the client is never left waiting.
async fn send_reply(connection: &Connection, reply: Message) -> TransportResult<()> {
    let message_type = reply.message_type.clone();
    let id = reply.id;

    match connection.send(reply).await {
        // Nothing reached the wire if the connection is still open
        Err(e) if !matches!(e, TransportError::Io(_)) && !connection.is_closed() => {
            warn!(
                connection_id = %connection.id(),
                message_type = %message_type,
                error = %e,
                "Reply could not be encoded"
            );
            let mut fallback = Message::error(message_type, format!("Reply could not be sent: {}", e));
            fallback.id = id;
            connection.send(fallback).await
        }
        other => other,
    }
}

/// Run one request through the registry and build the reply, if any.
async fn process_request(
    connection: &Connection,
    registry: &HandlerRegistry,
    metrics: &ServerMetrics,
    request: Message,
) -> Option<Message> {
    let message_type = request.message_type.clone();
    let request_id = request.id;
    let start_time = Instant::now();

    info!(
        connection_id = %connection.id(),
        message_type = %message_type,
        request_id = ?request_id,
        "Received message"
    );

    let Some(handler) = registry.get(&message_type) else {
        warn!(
            connection_id = %connection.id(),
            message_type = %message_type,
            "No handler registered"
        );
        metrics.record_request(false);
        let kind = HandlerErrorKind::UnknownType {
            message_type: message_type.clone(),
        };
        return Some(error_reply(&message_type, request_id, kind.to_string()));
    };

    let ctx = HandlerContext::new(connection.clone(), Handle::current(), &request);
    let task = tokio::task::spawn_blocking(move || handler.handle(&ctx, request));

    // A blocking handler cannot be cancelled; stop waiting for it once the
    // connection is gone so the session can end.
    let result = tokio::select! {
        result = task => result,
        _ = connection.closed() => {
            warn!(
                connection_id = %connection.id(),
                message_type = %message_type,
                "Connection closed while handler was running, reply dropped"
            );
            metrics.record_request(false);
            return None;
        }
    };
    let duration_ms = start_time.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(Some(reply))) => {
            let reply = normalize_reply(reply, &message_type, request_id);
            metrics.record_request(!reply.is_error());
            debug!(
                connection_id = %connection.id(),
                message_type = %message_type,
                status = ?reply.status,
                duration_ms,
                "Handler replied"
            );
            Some(reply)
        }
        Ok(Ok(None)) => {
            metrics.record_request(true);
            debug!(
                connection_id = %connection.id(),
                message_type = %message_type,
                duration_ms,
                "Handler produced no reply"
            );
            None
        }
        Ok(Err(e)) => {
            metrics.record_request(false);
            warn!(
                connection_id = %connection.id(),
                message_type = %message_type,
                error = %e,
                duration_ms,
                "Handler failed"
            );
            Some(error_reply(&message_type, request_id, describe_failure(&message_type, &e)))
        }
        Err(e) => {
            metrics.record_request(false);
            error!(
                connection_id = %connection.id(),
                message_type = %message_type,
                error = %e,
                "Handler task panicked"
            );
            Some(error_reply(
                &message_type,
                request_id,
                format!("Handler for '{}' panicked", message_type),
            ))
        }
    }
}

fn error_reply(message_type: &str, request_id: Option<u64>, content: String) -> Message {
    let mut reply = Message::error(message_type, content);
    reply.id = request_id;
    reply
}

/// Content for a failed handler's `ERROR` reply. Never empty.
fn describe_failure(message_type: &str, err: &TransportError) -> String {
    let description = match err {
        TransportError::Handler {
            kind: HandlerErrorKind::Failed { message },
        } => message.clone(),
        other => other.to_string(),
    };

    if description.trim().is_empty() {
        format!("Handler for '{}' failed", message_type)
    } else {
        description
    }
}

/// A reply always answers the request it was produced for: same type, same
/// id, and a status.
fn normalize_reply(mut reply: Message, message_type: &str, request_id: Option<u64>) -> Message {
    if reply.message_type != message_type {
        warn!(
            expected = %message_type,
            actual = %reply.message_type,
            "Handler reply had the wrong type, correcting"
        );
        reply.message_type = message_type.to_string();
    }
    if reply.status.is_none() {
        reply.status = Some(Status::Success);
    }
    reply.id = request_id;
    reply
}
