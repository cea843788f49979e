//! Error types for the finwire transport.

use thiserror::Error;

/// Main error type for the transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The listening socket could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The client could not dial the server.
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// `start_server` was called on a running server.
    #[error("Server is already running")]
    AlreadyRunning,

    /// A lifecycle operation needed a running server.
    #[error("Server is not running")]
    NotRunning,

    /// `connect` was called on a connected client.
    #[error("Client is already connected")]
    AlreadyConnected,

    /// A client operation needed an open connection.
    #[error("Client is not connected")]
    NotConnected,

    /// Framing and connection-level protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// Handler lookup and execution errors.
    #[error("Handler error: {kind}")]
    Handler { kind: HandlerErrorKind },

    /// Payload access errors.
    #[error("Value error: {kind}")]
    Value { kind: ValueErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Protocol error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    #[error("Malformed frame: {message}")]
    Decode { message: String },

    #[error("Frame cannot be encoded: {message}")]
    InvalidFrame { message: String },

    #[error("Frame exceeds maximum of {max} bytes")]
    FrameTooLarge { max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out after {millis} ms")]
    Timeout { millis: u64 },
}

/// Handler error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerErrorKind {
    #[error("No handler registered for message type '{message_type}'")]
    UnknownType { message_type: String },

    #[error("A handler is already registered for message type '{message_type}'")]
    DuplicateHandler { message_type: String },

    #[error("{message}")]
    Failed { message: String },
}

/// Value access error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueErrorKind {
    #[error("Expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Missing key '{key}'")]
    MissingKey { key: String },
}

impl TransportError {
    /// Shorthand for a connection-closed protocol error.
    pub fn connection_closed() -> Self {
        TransportError::Protocol {
            kind: ProtocolErrorKind::ConnectionClosed,
        }
    }

    /// Build a handler failure from any displayable description.
    ///
    /// Handlers return this to have the server reply with an `ERROR`
    /// message carrying `message` as its content.
    pub fn handler_failed(message: impl Into<String>) -> Self {
        TransportError::Handler {
            kind: HandlerErrorKind::Failed {
                message: message.into(),
            },
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        TransportError::Protocol {
            kind: ProtocolErrorKind::Decode {
                message: message.into(),
            },
        }
    }

    pub(crate) fn timeout(millis: u64) -> Self {
        TransportError::Protocol {
            kind: ProtocolErrorKind::Timeout { millis },
        }
    }

    pub(crate) fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Bind {
            address: address.into(),
            source,
        }
    }

    /// True when the peer closed the stream or the connection was closed locally.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            TransportError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed
            }
        )
    }
}

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
