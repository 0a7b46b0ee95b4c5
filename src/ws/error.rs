#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use super::traits::SocketState;
use crate::error::{Error, Kind};

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The endpoint could not be parsed as a URL
    InvalidUrl(url::ParseError),
    /// The endpoint uses a scheme other than `ws` or `wss`
    UnsupportedScheme(String),
    /// The credential token cannot be carried in a handshake header
    InvalidToken,
    /// No async runtime is available to drive the socket
    UnsupportedEnvironment,
    /// `send` was called before any connection was made
    NotInitialized,
    /// `send` was called while the socket was not open
    NotOpen {
        /// State of the socket at the time of the call
        state: SocketState,
    },
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Outbound payload could not be serialized
    Serialize(serde_json::Error),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::InvalidUrl(e) => write!(f, "Invalid WebSocket URL: {e}"),
            Self::UnsupportedScheme(scheme) => {
                write!(f, "Unsupported WebSocket URL scheme: {scheme}")
            }
            Self::InvalidToken => write!(f, "Token is not a valid handshake header value"),
            Self::UnsupportedEnvironment => {
                write!(f, "WebSocket requires a running tokio runtime")
            }
            Self::NotInitialized => write!(f, "WebSocket not initialized"),
            Self::NotOpen { state } => write!(f, "WebSocket is not open (state: {state})"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Serialize(e) => write!(f, "Failed to serialize WebSocket message: {e}"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::InvalidUrl(e) => Some(e),
            Self::Serialize(e) => Some(e),
            _ => None,
        }
    }
}

impl WsError {
    /// The [`Kind`] this error is reported under.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        match self {
            Self::Connection(_) => Kind::Transport,
            Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::InvalidToken
            | Self::UnsupportedEnvironment => Kind::Construction,
            Self::NotInitialized
            | Self::NotOpen { .. }
            | Self::ConnectionClosed
            | Self::Serialize(_) => Kind::Send,
        }
    }
}

// Integration with main Error type
impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Error::with_source(e.kind(), e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::Transport, WsError::Connection(e))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        WsError::InvalidUrl(e).into()
    }
}
