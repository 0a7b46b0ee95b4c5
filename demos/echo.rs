//! Connects to a WebSocket echo endpoint, sends a few messages and logs everything that
//! comes back, including reconnect attempts.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example echo -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use managed_socket::{ConnectOptions, ConnectionManager, Handlers};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let handlers = Handlers::new()
        .on_message(|message| info!(?message, "received"))
        .on_error(|error| warn!(%error, "socket error"))
        .on_retries_exhausted(|attempts| warn!(attempts, "giving up"));

    let options = ConnectOptions::builder()
        .handlers(handlers)
        .max_reconnect_attempts(3)
        .reconnect_interval(Duration::from_secs(2))
        .build();

    let socket = ConnectionManager::new();
    if !socket.connect(&url, options) {
        anyhow::bail!("unable to start connection to {url}");
    }

    let mut state = socket.state_receiver();
    timeout(
        Duration::from_secs(10),
        state.wait_for(|state| state.is_connected()),
    )
    .await??;
    info!(state = ?socket.connection_state(), "connected");

    for n in 0..3 {
        socket.send(format!("hello {n}"));
        socket.send_json(&json!({ "type": "ping", "n": n }));
        sleep(Duration::from_millis(500)).await;
    }

    socket.close();
    info!(state = %socket.socket_state(), "closed");

    Ok(())
}
