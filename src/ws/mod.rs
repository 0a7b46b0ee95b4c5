//! Managed WebSocket connection.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns one connection at a time, forwards inbound traffic to
//!   [`Handlers`] and reconnects after abnormal closures
//! - [`Connector`] / [`Transport`]: the seam to the socket implementation, with
//!   [`WebSocketConnector`] as the default
//!
//! # Example
//!
//! ```ignore
//! let socket = ConnectionManager::new();
//! socket.connect("wss://example.com/feed", ConnectOptions::default());
//! socket.send_json(&json!({ "type": "subscribe" }));
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod traits;
pub mod transport;

pub use config::{ConnectOptions, ConnectParams, RetryPolicy};
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use handler::Handlers;
pub use message::{Message, Payload};
pub use traits::*;
pub use transport::WebSocketConnector;
