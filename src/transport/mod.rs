//! Connection module.
//!
//! A framed TCP stream shared by the server's sessions and the client connector.

mod connection;

pub use connection::{Connection, ConnectionOptions};
