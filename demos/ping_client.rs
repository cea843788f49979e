//! Connects to a running finwire-server, sends PING and SERVER_STATUS and
//! prints the replies.
//!
//! ```text
//! cargo run --example ping_client -- [host] [port]
//! ```

use std::env;

use finwire::client::ClientConnector;
use finwire::config::ClientConfig;
use finwire::handlers::system::{PING, SERVER_STATUS};
use finwire::protocol::{Message, Value};
use finwire::TransportResult;

#[tokio::main]
async fn main() -> TransportResult<()> {
    let args: Vec<String> = env::args().collect();
    let host = args.get(1).map(String::as_str).unwrap_or("127.0.0.1");
    let port = args.get(2).and_then(|p| p.parse().ok()).unwrap_or(5050);

    let client = ClientConnector::new(ClientConfig::default());
    client.connect(host, port).await?;
    println!("Connected to {}:{}", host, port);

    let pong = client.request(Message::request(PING)).await?;
    println!(
        "{} -> {:?} {} (server time {})",
        PING,
        pong.status,
        pong.content().unwrap_or(""),
        pong.get_i64("timestamp")?
    );

    let status = client.request(Message::request(SERVER_STATUS)).await?;
    let snapshot: Value = status.get("status")?.clone();
    println!(
        "{} -> {}",
        SERVER_STATUS,
        serde_json::to_string_pretty(&snapshot)?
    );

    client.disconnect().await;
    Ok(())
}
