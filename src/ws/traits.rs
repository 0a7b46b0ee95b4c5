//! Transport seam between [`ConnectionManager`](super::ConnectionManager) and the socket
//! implementation.
//!
//! A [`Connector`] builds one [`Transport`] handle per connection attempt. The handle reports
//! its lifecycle back through the [`EventSink`] it was created with.

use std::sync::Weak;

use super::config::ConnectParams;
use super::message::Message;
use crate::Result;
use crate::error::Error;

/// Ready state of a transport handle, as seen by callers.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
    /// The transport reported a ready state outside the four lifecycle values
    Unknown,
}

impl SocketState {
    /// Decode a WebSocket `readyState` value (0 through 3).
    #[must_use]
    pub const fn from_ready_state(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            3 => Self::Closed,
            _ => Self::Unknown,
        }
    }

    /// Encode as a WebSocket `readyState` value.
    #[must_use]
    pub const fn ready_state(self) -> Option<u8> {
        match self {
            Self::Connecting => Some(0),
            Self::Open => Some(1),
            Self::Closing => Some(2),
            Self::Closed => Some(3),
            Self::Unknown => None,
        }
    }
}

/// Lifecycle notification emitted by a transport handle.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and ready to send
    Open,
    /// An inbound frame arrived
    Message(Message),
    /// The connection reported an error; a `Close` usually follows
    Error(Error),
    /// The connection is gone
    Close {
        /// Close code (1006 when the connection dropped without a close frame)
        code: u16,
        reason: String,
    },
}

/// Close code used when a connection ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code sent on a caller-initiated close.
pub const NORMAL_CLOSURE: u16 = 1000;

pub(crate) trait Dispatch: Send + Sync {
    fn dispatch(&self, generation: u64, event: TransportEvent);
}

/// Delivery point for the events of one transport handle.
///
/// Each sink is bound to the attempt that created it. Once the manager has moved on to a newer
/// attempt, or has been dropped, emitted events are discarded.
#[derive(Clone)]
pub struct EventSink {
    target: Weak<dyn Dispatch>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(target: Weak<dyn Dispatch>, generation: u64) -> Self {
        Self { target, generation }
    }

    /// Deliver an event to the owning manager.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(target) = self.target.upgrade() {
            target.dispatch(self.generation, event);
        }
    }

    /// The attempt this sink belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .field("attached", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// A live connection handle.
///
/// Implementations must not call back into the [`EventSink`] from inside these methods; the
/// manager holds its state lock while calling them.
pub trait Transport: Send + Sync {
    /// Current ready state. Must not block.
    fn state(&self) -> SocketState;

    /// Transmit one text frame. Fails when the handle is not open.
    fn send(&self, text: String) -> Result<()>;

    /// Request an orderly close. The `Close` event is emitted once the transport is done.
    fn close(&self);
}

/// Factory for transport handles.
pub trait Connector: Send + Sync + 'static {
    /// Construct a handle and start opening it.
    ///
    /// Errors returned here are construction failures (malformed URL, unsupported environment)
    /// and are never retried. Failures that happen after construction must be reported through
    /// `events` instead, and never from within this call.
    fn connect(&self, params: &ConnectParams, events: EventSink) -> Result<Box<dyn Transport>>;
}
