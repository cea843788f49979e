//! Built-in system handlers.

mod ping;
mod status;

pub use ping::{PingHandler, PING};
pub use status::{StatusHandler, SERVER_STATUS};
