//! Client-side store of received messages.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, Notify};
use tracing::trace;

use crate::error::{TransportError, TransportResult};
use crate::protocol::Message;

type PendingKey = (String, u64);

/// Messages received on one client connection.
///
/// A message whose `(type, id)` matches a pending request goes straight to
/// that request's waiter. Everything else is queued per type, in arrival
/// order, for `wait_for_type`.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    state: Mutex<InboxState>,
    arrived: Notify,
}

#[derive(Debug, Default)]
struct InboxState {
    by_type: HashMap<String, VecDeque<Message>>,
    pending: HashMap<PendingKey, oneshot::Sender<Message>>,
    closed: bool,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a received message to its pending request or the type queue.
    pub(crate) fn deliver(&self, message: Message) {
        let mut state = self.lock();

        let message = match message.id {
            Some(id) => match state.pending.remove(&(message.message_type.clone(), id)) {
                Some(waiter) => match waiter.send(message) {
                    Ok(()) => return,
                    // Waiter gave up between lookup and send
                    Err(message) => message,
                },
                None => message,
            },
            None => message,
        };

        trace!(message_type = %message.message_type, "Queued message");
        state
            .by_type
            .entry(message.message_type.clone())
            .or_default()
            .push_back(message);
        drop(state);
        self.arrived.notify_waiters();
    }

    /// Wait for the oldest queued message of `message_type` and remove it.
    ///
    /// Messages queued before the inbox closed are still returned; after
    /// that the wait fails with `ConnectionClosed`.
    pub(crate) async fn wait_for_type(&self, message_type: &str) -> TransportResult<Message> {
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(message) = state
                    .by_type
                    .get_mut(message_type)
                    .and_then(VecDeque::pop_front)
                {
                    return Ok(message);
                }
                if state.closed {
                    return Err(TransportError::connection_closed());
                }
            }

            notified.await;
        }
    }

    /// Reserve the reply slot for a request about to be sent.
    pub(crate) fn register_pending(
        &self,
        message_type: &str,
        id: u64,
    ) -> TransportResult<oneshot::Receiver<Message>> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::connection_closed());
        }
        let (sender, receiver) = oneshot::channel();
        state.pending.insert((message_type.to_string(), id), sender);
        Ok(receiver)
    }

    pub(crate) fn cancel_pending(&self, message_type: &str, id: u64) {
        self.lock().pending.remove(&(message_type.to_string(), id));
    }

    /// Mark the inbox closed and release every waiter.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        // Dropping the senders fails each pending receiver
        state.pending.clear();
        drop(state);
        self.arrived.notify_waiters();
    }

    #[cfg(test)]
    fn queued(&self, message_type: &str) -> usize {
        self.lock().by_type.get(message_type).map_or(0, VecDeque::len)
    }
}
