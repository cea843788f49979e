//! Client connector module.
//!
//! Dials a server, sends requests and collects replies, either by message
//! type or by the request id assigned in `send_request`.

mod connector;
mod inbox;

pub use connector::{ClientConnector, PendingReply};
