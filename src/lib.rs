//! finwire
//!
//! Request/response message transport for the finance tracker. A server
//! dispatches newline-delimited JSON messages to handlers registered per
//! message type; a client connector sends requests and correlates replies.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{ClientConnector, PendingReply};
pub use config::Settings;
pub use error::{TransportError, TransportResult};
pub use handlers::{Handler, HandlerContext, HandlerRegistry, HandlerResult};
pub use protocol::{Message, Status, Value};
pub use server::Server;
pub use transport::Connection;
