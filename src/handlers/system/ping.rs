//! Ping handler for health checking.

use chrono::Utc;

use crate::handlers::traits::Handler;
use crate::handlers::types::{HandlerContext, HandlerResult};
use crate::protocol::Message;

/// Message type answered by [`PingHandler`].
pub const PING: &str = "PING";

/// Simple ping handler that returns a pong response.
///
/// Used for health checks and verifying the server is responsive.
pub struct PingHandler;

impl Handler for PingHandler {
    fn handle(&self, _ctx: &HandlerContext, message: Message) -> HandlerResult {
        Ok(Some(
            message
                .reply_success()
                .with_content("pong")
                .with_data("timestamp", Utc::now().timestamp()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_handle() {
        let request = Message::request(PING).with_id(3);
        let ctx = HandlerContext::detached(&request);

        let reply = PingHandler.handle(&ctx, request).unwrap().unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.message_type, PING);
        assert_eq!(reply.id, Some(3));
        assert_eq!(reply.content(), Some("pong"));
        assert!(reply.get_i64("timestamp").unwrap() > 0);
    }
}
