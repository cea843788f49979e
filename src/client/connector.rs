//! Client side of the transport.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::inbox::Inbox;
use crate::config::{ClientConfig, Settings};
use crate::error::{TransportError, TransportResult};
use crate::protocol::Message;
use crate::transport::{Connection, ConnectionOptions};

/// Connects to a server, sends requests and waits for replies.
///
/// A background task reads every incoming message into an inbox. Replies
/// can be awaited either by type (`wait_for_message`) or, for requests sent
/// with `send_request`, by the request id the connector assigned.
///
/// `wait_for_message` only matches on type: with two outstanding requests
/// of the same type, each waiter gets whichever reply arrives first. Use
/// `request`/`send_request` when that matters.
#[derive(Debug)]
pub struct ClientConnector {
    config: ClientConfig,
    options: ConnectionOptions,
    session: Mutex<Option<ClientSession>>,
    next_request_id: AtomicU64,
}

#[derive(Debug)]
struct ClientSession {
    connection: Connection,
    inbox: Arc<Inbox>,
    receiver: JoinHandle<()>,
}

impl ClientSession {
    fn is_open(&self) -> bool {
        !self.connection.is_closed()
    }
}

impl ClientConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_options(config, ConnectionOptions::default())
    }

    /// Client using the `[client]` timeouts and the frame limits of `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let options = ConnectionOptions {
            // A client waits on the server for as long as it needs
            idle_timeout: None,
            ..ConnectionOptions::from_settings(settings)
        };
        Self::with_options(settings.client.clone(), options)
    }

    pub fn with_options(config: ClientConfig, options: ConnectionOptions) -> Self {
        Self {
            config,
            options,
            session: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ClientSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection to `host:port` and start receiving.
    pub async fn connect(&self, host: &str, port: u16) -> TransportResult<()> {
        if self.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }

        let address = format!("{}:{}", host, port);
        let dial = TcpStream::connect(address.as_str());
        let stream = match self.config.connect_timeout() {
            Some(limit) => match timeout(limit, dial).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer within {}s", limit.as_secs()),
                )),
            },
            None => dial.await,
        }
        .map_err(|source| TransportError::Connect {
            address: address.clone(),
            source,
        })?;

        let connection = Connection::new(stream, self.options)?;
        let inbox = Arc::new(Inbox::new());

        let mut session = self.lock();
        if session.as_ref().is_some_and(ClientSession::is_open) {
            // Lost a race with a concurrent connect
            connection.close();
            return Err(TransportError::AlreadyConnected);
        }

        let receiver = tokio::spawn(receive_loop(connection.clone(), Arc::clone(&inbox)));
        info!(
            connection_id = %connection.id(),
            address = %address,
            "Connected to server"
        );
        *session = Some(ClientSession {
            connection,
            inbox,
            receiver,
        });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().as_ref().is_some_and(ClientSession::is_open)
    }

    fn open_session(&self) -> TransportResult<(Connection, Arc<Inbox>)> {
        match self.lock().as_ref() {
            Some(session) if session.is_open() => {
                Ok((session.connection.clone(), Arc::clone(&session.inbox)))
            }
            _ => Err(TransportError::NotConnected),
        }
    }

    /// Send a message without waiting for anything.
    pub async fn send_message(&self, message: Message) -> TransportResult<()> {
        let (connection, _) = self.open_session()?;
        connection.send(message).await
    }

    /// Wait for the next message of `message_type` and take it from the inbox.
    ///
    /// Fails with `ConnectionClosed` once the connection is gone and no
    /// such message is left.
    pub async fn wait_for_message(&self, message_type: &str) -> TransportResult<Message> {
        let inbox = self.inbox()?;
        inbox.wait_for_type(message_type).await
    }

    /// Like `wait_for_message`, failing with `Timeout` after `limit`.
    pub async fn wait_for_message_timeout(
        &self,
        message_type: &str,
        limit: Duration,
    ) -> TransportResult<Message> {
        let inbox = self.inbox()?;
        timeout(limit, inbox.wait_for_type(message_type))
            .await
            .map_err(|_| TransportError::timeout(limit.as_millis() as u64))?
    }

    /// Messages that already arrived can still be collected after the
    /// connection closes.
    fn inbox(&self) -> TransportResult<Arc<Inbox>> {
        match self.lock().as_ref() {
            Some(session) => Ok(Arc::clone(&session.inbox)),
            None => Err(TransportError::NotConnected),
        }
    }

    /// Send `message` under a fresh request id and return a handle for its reply.
    pub async fn send_request(&self, mut message: Message) -> TransportResult<PendingReply> {
        let (connection, inbox) = self.open_session()?;

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        message.id = Some(id);
        let message_type = message.message_type.clone();

        let receiver = inbox.register_pending(&message_type, id)?;
        let pending = PendingReply {
            inbox,
            message_type,
            id,
            receiver: Some(receiver),
        };

        debug!(message_type = %pending.message_type, request_id = id, "Sending request");
        connection.send(message).await?;
        Ok(pending)
    }

    /// Send a request and wait for its reply, bounded by the configured
    /// request timeout.
    pub async fn request(&self, message: Message) -> TransportResult<Message> {
        let pending = self.send_request(message).await?;
        match self.config.request_timeout() {
            Some(limit) => pending.wait_timeout(limit).await,
            None => pending.wait().await,
        }
    }

    /// Close the connection and release every waiter. Does nothing when
    /// not connected.
    pub async fn disconnect(&self) {
        let Some(session) = self.lock().take() else {
            return;
        };

        session.connection.close();
        session.inbox.close();
        if let Err(e) = session.receiver.await {
            warn!(error = %e, "Receive task ended abnormally");
        }
        info!(connection_id = %session.connection.id(), "Disconnected from server");
    }
}

impl Default for ClientConnector {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for ClientConnector {
    fn drop(&mut self) {
        if let Some(session) = self.lock().take() {
            session.connection.close();
            session.inbox.close();
        }
    }
}

/// A request that has been sent and whose reply has not been collected yet.
///
/// Dropping it unregisters the request; a late reply then lands in the
/// type queue.
#[derive(Debug)]
pub struct PendingReply {
    inbox: Arc<Inbox>,
    message_type: String,
    id: u64,
    receiver: Option<oneshot::Receiver<Message>>,
}

impl PendingReply {
    /// Request id assigned to the outgoing message.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Wait for the reply. Fails with `ConnectionClosed` if the connection
    /// goes away first.
    pub async fn wait(mut self) -> TransportResult<Message> {
        match self.receiver.take() {
            Some(receiver) => receiver
                .await
                .map_err(|_| TransportError::connection_closed()),
            None => Err(TransportError::connection_closed()),
        }
    }

    /// Wait for the reply, failing with `Timeout` after `limit`.
    pub async fn wait_timeout(self, limit: Duration) -> TransportResult<Message> {
        timeout(limit, self.wait())
            .await
            .map_err(|_| TransportError::timeout(limit.as_millis() as u64))?
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.inbox.cancel_pending(&self.message_type, self.id);
    }
}

/// Read messages into the inbox until the connection closes.
async fn receive_loop(connection: Connection, inbox: Arc<Inbox>) {
    loop {
        match connection.receive().await {
            Ok(message) => inbox.deliver(message),
            Err(e) if e.is_connection_closed() => {
                debug!(connection_id = %connection.id(), "Server connection closed");
                break;
            }
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "Receive failed");
                break;
            }
        }
    }

    connection.close();
    inbox.close();
}
