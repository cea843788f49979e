//! A live, framed TCP connection.

use std::fmt;
use std::future::Future;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ProtocolErrorKind, TransportError, TransportResult};
use crate::protocol::{Message, MessageCodec, DEFAULT_MAX_FRAME_SIZE};

type FrameReader = FramedRead<OwnedReadHalf, MessageCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, MessageCodec>;

/// Per-connection I/O limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub max_frame_size: usize,
    pub write_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_timeout: None,
            idle_timeout: None,
        }
    }
}

impl ConnectionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_frame_size: settings.limits.max_frame_size,
            write_timeout: settings.limits.write_timeout(),
            idle_timeout: settings.limits.idle_timeout(),
        }
    }
}

/// Handle to one open duplex stream.
///
/// Clones share the same socket. Reads and writes are each serialized by
/// their own lock, so a frame is never interleaved with another. Once
/// closed, every pending and future `send`/`receive` fails with
/// `ConnectionClosed`.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    peer_addr: SocketAddr,
    reader: Mutex<FrameReader>,
    writer: Mutex<FrameWriter>,
    closed: CancellationToken,
    /// Second handle on the socket, used to shut it down from `close`.
    socket: std::net::TcpStream,
    options: ConnectionOptions,
}

impl Connection {
    /// Wrap an accepted or dialed stream.
    pub fn new(stream: TcpStream, options: ConnectionOptions) -> TransportResult<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let stream = stream.into_std()?;
        let socket = stream.try_clone()?;
        let stream = TcpStream::from_std(stream)?;

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, MessageCodec::new(options.max_frame_size));
        let writer = FramedWrite::new(write_half, MessageCodec::new(options.max_frame_size));

        Ok(Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                peer_addr,
                reader: Mutex::new(reader),
                writer: Mutex::new(writer),
                closed: CancellationToken::new(),
                socket,
                options,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Write one frame.
    ///
    /// Encoding failures leave the connection open. A write error or write
    /// timeout closes it, since part of a frame may already be on the wire.
    pub async fn send(&self, message: Message) -> TransportResult<()> {
        let closed = &self.inner.closed;
        if closed.is_cancelled() {
            return Err(TransportError::connection_closed());
        }

        let mut writer = tokio::select! {
            _ = closed.cancelled() => return Err(TransportError::connection_closed()),
            guard = self.inner.writer.lock() => guard,
        };

        let result = tokio::select! {
            _ = closed.cancelled() => return Err(TransportError::connection_closed()),
            result = with_timeout(self.inner.options.write_timeout, writer.send(message)) => result,
        };

        if let Err(e) = &result {
            if matches!(
                e,
                TransportError::Io(_)
                    | TransportError::Protocol {
                        kind: ProtocolErrorKind::Timeout { .. }
                    }
            ) {
                debug!(connection_id = %self.inner.id, error = %e, "Write failed, closing connection");
                self.close();
            }
        }
        result
    }

    /// Read the next frame.
    ///
    /// Fails with `ConnectionClosed` on clean EOF. Any other failure
    /// (malformed frame, I/O error, idle timeout) also closes the
    /// connection because the stream cannot be resynchronized.
    pub async fn receive(&self) -> TransportResult<Message> {
        let closed = &self.inner.closed;
        if closed.is_cancelled() {
            return Err(TransportError::connection_closed());
        }

        let mut reader = tokio::select! {
            _ = closed.cancelled() => return Err(TransportError::connection_closed()),
            guard = self.inner.reader.lock() => guard,
        };

        let next = tokio::select! {
            _ = closed.cancelled() => return Err(TransportError::connection_closed()),
            next = with_timeout(self.inner.options.idle_timeout, async { Ok(reader.next().await) }) => next,
        };

        match next {
            Ok(Some(Ok(message))) => Ok(message),
            Ok(Some(Err(e))) | Err(e) => {
                debug!(connection_id = %self.inner.id, error = %e, "Read failed, closing connection");
                self.close();
                Err(e)
            }
            Ok(None) => {
                debug!(connection_id = %self.inner.id, "Peer closed the stream");
                self.close();
                Err(TransportError::connection_closed())
            }
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Wakes every task blocked in `send` or `receive` and shuts the socket
    /// down in both directions, so the peer sees end-of-stream even while
    /// other handles (e.g. a running handler's context) are still alive.
    pub fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        if let Err(e) = self.inner.socket.shutdown(Shutdown::Both) {
            // Already reset or shut down by the peer
            debug!(connection_id = %self.inner.id, error = %e, "Socket shutdown failed");
        }
        debug!(connection_id = %self.inner.id, peer = %self.inner.peer_addr, "Connection closed");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| TransportError::timeout(limit.as_millis() as u64))?,
        None => fut.await,
    }
}
