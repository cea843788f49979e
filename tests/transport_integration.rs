//! Integration tests for the finwire transport.
//!
//! These tests start a real server on a loopback port and talk to it with
//! the client connector (or a raw socket) to verify end-to-end behavior.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use finwire::client::ClientConnector;
use finwire::config::Settings;
use finwire::error::{ProtocolErrorKind, TransportError};
use finwire::handlers::system::{PING, SERVER_STATUS};
use finwire::handlers::{HandlerContext, HandlerRegistry, HandlerResult};
use finwire::protocol::{Message, Status};
use finwire::server::{Server, ServerMetrics};

/// Test server instance bound to an ephemeral port.
struct TestServer {
    server: Server,
    port: u16,
}

impl TestServer {
    /// Start a server with the built-ins plus the test handlers.
    async fn start() -> Self {
        Self::start_with(Settings::default()).await
    }

    async fn start_with(mut settings: Settings) -> Self {
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = 0;
        settings.limits.shutdown_timeout_seconds = 2;

        let metrics = Arc::new(ServerMetrics::new());
        let mut registry = HandlerRegistry::with_builtins(Some(Arc::clone(&metrics)));
        register_test_handlers(&mut registry);

        let server = Server::with_metrics(Arc::new(settings), registry, metrics);
        let addr = server.start_server().await.expect("Failed to start server");

        Self {
            server,
            port: addr.port(),
        }
    }

    async fn client(&self) -> ClientConnector {
        let client = ClientConnector::default();
        client
            .connect("127.0.0.1", self.port)
            .await
            .expect("Failed to connect");
        client
    }

    /// Wait until the server reports `expected` open connections.
    async fn wait_for_clients(&self, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.server.connected_clients_count() != expected {
            assert!(
                Instant::now() < deadline,
                "expected {} clients, server reports {}",
                expected,
                self.server.connected_clients_count()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn register_test_handlers(registry: &mut HandlerRegistry) {
    registry
        .register("ECHO", |_ctx: &HandlerContext, m: Message| -> HandlerResult {
            let text = m.get_str("text")?.to_string();
            Ok(Some(m.reply_success().with_content(text)))
        })
        .unwrap();

    registry
        .register("FAIL", |_ctx: &HandlerContext, _m: Message| -> HandlerResult {
            Err(TransportError::handler_failed(""))
        })
        .unwrap();

    registry
        .register("PANIC", |_ctx: &HandlerContext, _m: Message| -> HandlerResult {
            panic!("handler bug")
        })
        .unwrap();

    registry
        .register("NOTIFY", |_ctx: &HandlerContext, _m: Message| -> HandlerResult {
            Ok(None)
        })
        .unwrap();

    registry
        .register("SLOW", |_ctx: &HandlerContext, m: Message| -> HandlerResult {
            let delay = m.get_i64("delay_ms")?;
            std::thread::sleep(Duration::from_millis(delay as u64));
            Ok(Some(m.reply_success().with_data("delay_ms", delay)))
        })
        .unwrap();

    registry
        .register("PUSH", |ctx: &HandlerContext, m: Message| -> HandlerResult {
            ctx.send(Message::success("NOTICE").with_content("working"))?;
            Ok(Some(m.reply_success()))
        })
        .unwrap();

    // Wrong reply type is corrected by the server
    registry
        .register("SLOPPY", |_ctx: &HandlerContext, _m: Message| -> HandlerResult {
            Ok(Some(Message::request("SOMETHING_ELSE")))
        })
        .unwrap();
}

#[tokio::test]
async fn test_ping() {
    let server = TestServer::start().await;
    let client = server.client().await;

    client.send_message(Message::request(PING)).await.unwrap();
    let reply = client.wait_for_message(PING).await.unwrap();

    assert_eq!(reply.message_type, PING);
    assert_eq!(reply.status, Some(Status::Success));
    assert_eq!(reply.content(), Some("pong"));
    assert!(reply.get_i64("timestamp").is_ok());

    client.disconnect().await;
    server.server.stop_server().await.unwrap();
}

#[tokio::test]
async fn test_one_reply_per_request() {
    let server = TestServer::start().await;
    let client = server.client().await;

    for i in 0..5 {
        let text = format!("hello {}", i);
        client
            .send_message(Message::request("ECHO").with_data("text", text.as_str()))
            .await
            .unwrap();
        let reply = client.wait_for_message("ECHO").await.unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.content(), Some(text.as_str()));
    }

    // Nothing extra was queued
    let err = client
        .wait_for_message_timeout("ECHO", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Protocol {
            kind: ProtocolErrorKind::Timeout { .. }
        }
    ));
}

#[tokio::test]
async fn test_unknown_type_returns_error() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let reply = client.request(Message::request("BUDGET_DELETE")).await.unwrap();
    assert_eq!(reply.message_type, "BUDGET_DELETE");
    assert!(reply.is_error());
    assert!(reply.content().unwrap().contains("BUDGET_DELETE"));

    // Connection stays usable
    let reply = client.request(Message::request(PING)).await.unwrap();
    assert!(reply.is_success());
    assert_eq!(server.server.connected_clients_count(), 1);
}

#[tokio::test]
async fn test_failing_handler_returns_error() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let reply = client.request(Message::request("FAIL")).await.unwrap();
    assert!(reply.is_error());
    assert!(!reply.content().unwrap_or("").is_empty());

    // Missing payload key is a handler failure too
    let reply = client.request(Message::request("ECHO")).await.unwrap();
    assert!(reply.is_error());
    assert!(reply.content().unwrap().contains("text"));

    let reply = client.request(Message::request(PING)).await.unwrap();
    assert!(reply.is_success());
}

#[tokio::test]
async fn test_panicking_handler_returns_error() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let reply = client.request(Message::request("PANIC")).await.unwrap();
    assert!(reply.is_error());
    assert!(reply.content().unwrap().contains("PANIC"));

    let reply = client.request(Message::request(PING)).await.unwrap();
    assert!(reply.is_success());
}

#[tokio::test]
async fn test_handler_without_reply() {
    let server = TestServer::start().await;
    let client = server.client().await;

    client.send_message(Message::request("NOTIFY")).await.unwrap();
    assert!(client
        .wait_for_message_timeout("NOTIFY", Duration::from_millis(100))
        .await
        .is_err());

    let reply = client.request(Message::request(PING)).await.unwrap();
    assert!(reply.is_success());
}

#[tokio::test]
async fn test_reply_is_normalized() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let pending = client.send_request(Message::request("SLOPPY")).await.unwrap();
    let id = pending.id();
    let reply = pending.wait().await.unwrap();

    assert_eq!(reply.message_type, "SLOPPY");
    assert_eq!(reply.status, Some(Status::Success));
    assert_eq!(reply.id, Some(id));
}

#[tokio::test]
async fn test_handler_can_push_messages() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let reply = client.request(Message::request("PUSH")).await.unwrap();
    assert!(reply.is_success());

    let notice = client.wait_for_message("NOTICE").await.unwrap();
    assert_eq!(notice.content(), Some("working"));
}

#[tokio::test]
async fn test_connected_clients_count() {
    let server = TestServer::start().await;
    assert_eq!(server.server.connected_clients_count(), 0);

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(server.client().await);
    }
    server.wait_for_clients(3).await;

    clients.pop().unwrap().disconnect().await;
    server.wait_for_clients(2).await;

    for client in clients {
        client.disconnect().await;
    }
    server.wait_for_clients(0).await;
}

#[tokio::test]
async fn test_concurrent_clients_get_their_own_replies() {
    let server = TestServer::start().await;

    let mut tasks = Vec::new();
    for name in ["alice", "bob"] {
        let client = server.client().await;
        tasks.push(tokio::spawn(async move {
            for i in 0..20 {
                let text = format!("{}-{}", name, i);
                client
                    .send_message(Message::request("ECHO").with_data("text", text.as_str()))
                    .await
                    .unwrap();
                let reply = client.wait_for_message("ECHO").await.unwrap();
                assert_eq!(reply.content(), Some(text.as_str()));
            }
            client.disconnect().await;
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    server.wait_for_clients(0).await;
}

#[tokio::test]
async fn test_same_type_requests_correlated_by_id() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let slow = client
        .send_request(Message::request("SLOW").with_data("delay_ms", 100))
        .await
        .unwrap();
    let fast = client
        .send_request(Message::request("SLOW").with_data("delay_ms", 1))
        .await
        .unwrap();

    // Await in the opposite order of arrival
    let fast_reply = fast.wait().await.unwrap();
    let slow_reply = slow.wait().await.unwrap();

    assert_eq!(fast_reply.get_i64("delay_ms").unwrap(), 1);
    assert_eq!(slow_reply.get_i64("delay_ms").unwrap(), 100);
    assert_ne!(fast_reply.id, slow_reply.id);
}

#[tokio::test]
async fn test_stop_releases_waiting_client() {
    let server = TestServer::start().await;
    let client = Arc::new(server.client().await);
    server.wait_for_clients(1).await;

    let waiter = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.wait_for_message("NEVER_SENT").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.server.stop_server().await.unwrap();
    assert!(!server.server.is_server_running());
    assert_eq!(server.server.connected_clients_count(), 0);

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter was not released")
        .unwrap();
    assert!(result.unwrap_err().is_connection_closed());
}

#[tokio::test]
async fn test_stop_during_running_handler() {
    let server = TestServer::start().await;
    let client = Arc::new(server.client().await);
    server.wait_for_clients(1).await;

    client
        .send_message(Message::request("SLOW").with_data("delay_ms", 2000))
        .await
        .unwrap();
    let waiter = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.wait_for_message("SLOW").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopping = Instant::now();
    server.server.stop_server().await.unwrap();
    assert!(
        stopping.elapsed() < Duration::from_secs(1),
        "stop waited {:?} for the handler",
        stopping.elapsed()
    );
    assert_eq!(server.server.connected_clients_count(), 0);
    assert_eq!(server.server.metrics().active(), 0);

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("client stayed parked until the handler returned")
        .unwrap();
    assert!(result.unwrap_err().is_connection_closed());
}

#[tokio::test]
async fn test_restart_accepts_new_clients() {
    let server = TestServer::start().await;
    let client = server.client().await;
    assert!(client.request(Message::request(PING)).await.unwrap().is_success());

    let addr = server.server.restart_server().await.unwrap();
    assert!(server.server.is_server_running());

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.is_connected() {
        assert!(Instant::now() < deadline, "old connection survived restart");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let client = ClientConnector::default();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    assert!(client.request(Message::request(PING)).await.unwrap().is_success());
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
    server.wait_for_clients(1).await;

    stream.write_all(b"this is not json\n").await.unwrap();

    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("server did not close the connection");
    assert!(matches!(read, Ok(0) | Err(_)));
    server.wait_for_clients(0).await;
}

#[tokio::test]
async fn test_raw_wire_format() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();

    stream.write_all(b"{\"type\":\"PING\"}\n").await.unwrap();

    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while byte[0] != b'\n' {
        stream.read_exact(&mut byte).await.unwrap();
        line.push(byte[0]);
    }

    let reply = finwire::protocol::decode(&line).unwrap();
    assert_eq!(reply.message_type, PING);
    assert_eq!(reply.status, Some(Status::Success));
    assert_eq!(reply.content(), Some("pong"));
    assert_eq!(reply.id, None);
}

#[tokio::test]
async fn test_connection_limit() {
    let mut settings = Settings::default();
    settings.limits.max_connections = 1;
    let server = TestServer::start_with(settings).await;

    let client = server.client().await;
    server.wait_for_clients(1).await;

    let mut extra = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), extra.read(&mut buf))
        .await
        .expect("rejected socket was not closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    let metrics = server.server.metrics();
    assert_eq!(metrics.connections_rejected.load(Ordering::Relaxed), 1);
    assert!(client.request(Message::request(PING)).await.unwrap().is_success());
}

#[tokio::test]
async fn test_server_status() {
    let server = TestServer::start().await;
    let client = server.client().await;

    client.request(Message::request(PING)).await.unwrap();
    client.request(Message::request("FAIL")).await.unwrap();

    let reply = client.request(Message::request(SERVER_STATUS)).await.unwrap();
    let status = reply.get("status").unwrap();

    assert_eq!(status.get("connected_clients").unwrap().as_i64().unwrap(), 1);
    assert_eq!(status.get("requests_total").unwrap().as_i64().unwrap(), 2);
    assert_eq!(status.get("requests_failed").unwrap().as_i64().unwrap(), 1);
    assert!(status.get("started_at").unwrap().as_str().is_ok());
}

#[tokio::test]
async fn test_register_after_start_rejected() {
    let mut server = TestServer::start().await;
    let result = server.server.register(
        "LATE",
        |_ctx: &HandlerContext, _m: Message| -> HandlerResult { Ok(None) },
    );
    assert!(matches!(result, Err(TransportError::AlreadyRunning)));
}
