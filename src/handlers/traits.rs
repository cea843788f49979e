//! Handler trait definition.

use crate::protocol::Message;

use super::types::{HandlerContext, HandlerResult};

/// Business logic for one message type.
///
/// Every operation the server exposes implements this trait, either as a
/// struct or as a closure. This is the primary extension point for the
/// entity services built on top of the transport.
///
/// # Example
///
/// ```ignore
/// registry.register("ACCOUNT_GET", |_ctx: &HandlerContext, message: Message| {
///     let id = message.get_i64("id")?;
///     let account = accounts.find(id)?;
///     Ok(Some(message.reply_success().with_encoded("account", &account)?))
/// })?;
/// ```
pub trait Handler: Send + Sync {
    /// Handle one decoded request.
    ///
    /// Return `Ok(Some(reply))` to answer, `Ok(None)` to send nothing, or an
    /// error to have the server answer with an `ERROR` reply carrying the
    /// error's description. The connection stays open in every case.
    ///
    /// Note: This is called from a blocking context via `spawn_blocking`.
    fn handle(&self, ctx: &HandlerContext, message: Message) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&HandlerContext, Message) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &HandlerContext, message: Message) -> HandlerResult {
        self(ctx, message)
    }
}
