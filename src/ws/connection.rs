#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use backoff::backoff::{Backoff as _, Constant};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::sleep;

use super::config::{ConnectOptions, ConnectParams, RetryPolicy};
use super::error::WsError;
use super::handler::{ErrorCallback, ExhaustedCallback, Handlers, MessageCallback};
use super::message::{Message, Payload};
use super::traits::{Connector, Dispatch, EventSink, SocketState, Transport, TransportEvent};
use super::transport::WebSocketConnector;
use crate::Result;
use crate::error::Error;

/// Connection lifecycle as tracked by the manager.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect` has never been called
    Idle,
    /// A transport handle exists and is opening
    Connecting,
    /// Successfully connected
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// A caller-initiated close is in flight
    Closing,
    /// No connection and nothing scheduled
    Closed,
    /// Waiting for the retry timer after an abnormal closure
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Manages one WebSocket connection: establishment, delivery, sending and reconnection.
///
/// The manager owns at most one transport handle at a time. Inbound frames and transport
/// errors are forwarded to the registered [`Handlers`]. When the connection closes without a
/// preceding [`close`](Self::close), the manager reconnects with the parameters of the last
/// [`connect`](Self::connect) call, up to the configured number of attempts, waiting the
/// configured interval before each one. Every successful open restores the full budget.
///
/// None of the methods block. `connect` only starts an attempt; whether it succeeded is
/// observed through [`connection_state`](Self::connection_state) or
/// [`state_receiver`](Self::state_receiver).
///
/// # Example
///
/// ```no_run
/// use managed_socket::ws::{ConnectOptions, ConnectionManager, Handlers};
///
/// #[tokio::main]
/// async fn main() {
///     let socket = ConnectionManager::new();
///     let options = ConnectOptions::builder()
///         .token("session-token")
///         .handlers(Handlers::new().on_message(|message| {
///             println!("received: {message:?}");
///         }))
///         .build();
///
///     assert!(socket.connect("wss://example.com/feed", options));
///
///     let mut state = socket.state_receiver();
///     while !state.borrow_and_update().is_connected() {
///         state.changed().await.unwrap();
///     }
///     socket.send("ping");
///     socket.close();
/// }
/// ```
pub struct ConnectionManager<C: Connector = WebSocketConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.connection_state())
            .field("socket_state", &self.socket_state())
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionManager<WebSocketConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager<WebSocketConnector> {
    /// Create a manager that opens real WebSocket connections.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(WebSocketConnector)
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager on top of a custom transport.
    #[must_use]
    pub fn with_connector(connector: C) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        let inner = Arc::new_cyclic(|me| Inner {
            me: Weak::clone(me),
            connector,
            shared: Mutex::new(Shared::default()),
            state_tx,
        });

        Self { inner }
    }

    /// Start connecting to `url`.
    ///
    /// Returns `true` when the attempt was initiated. An empty URL or a transport that cannot
    /// be constructed yields `false`; the reason is logged.
    pub fn connect(&self, url: &str, options: ConnectOptions) -> bool {
        match self.try_connect(url, options) {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(url, error = %e, "Unable to start WebSocket connection");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Same as [`connect`](Self::connect), returning the reason for a failure.
    ///
    /// A new call is always honored immediately: any existing handle is closed and replaced,
    /// and a pending reconnect is cancelled. Handlers in `options` replace the registered ones
    /// slot by slot.
    pub fn try_connect(&self, url: &str, options: ConnectOptions) -> Result<()> {
        if url.trim().is_empty() {
            return Err(Error::validation("WebSocket URL must not be empty"));
        }

        let policy = options.retry_policy();
        let params = ConnectParams::new(url.to_owned(), options.token);

        let mut shared = self.inner.lock();
        shared.cancel_retry();
        shared.policy = policy;
        shared.params = Some(params.clone());
        shared.handlers.merge(options.handlers);
        shared.retry_count = 0;
        shared.manual_close = false;

        #[cfg(feature = "tracing")]
        tracing::info!(
            url,
            max_attempts = policy.max_attempts,
            interval = ?policy.interval,
            "Connecting WebSocket"
        );

        self.inner.attempt(&mut shared, &params)
    }

    /// Close the connection and suppress reconnection.
    ///
    /// Does nothing when no connection exists.
    pub fn close(&self) {
        let mut shared = self.inner.lock();
        let Some(transport) = shared.transport.take() else {
            return;
        };

        shared.manual_close = true;
        shared.cancel_retry();

        let already_closed = transport.state() == SocketState::Closed;
        transport.close();

        #[cfg(feature = "tracing")]
        tracing::info!("Closing WebSocket");

        // A closed handle will not report again, so there is nothing left to wait for.
        self.inner.publish(if already_closed {
            ConnectionState::Closed
        } else {
            ConnectionState::Closing
        });
    }

    /// Send a text payload, or a JSON value encoded as text.
    ///
    /// Returns `false` without sending when the socket is missing or not open, or when the
    /// transport rejects the frame. The reason is logged.
    pub fn send<D: Into<Payload>>(&self, data: D) -> bool {
        Self::report_send(self.try_send(data))
    }

    /// Serialize `value` as JSON and send it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        Self::report_send(Payload::json(value).and_then(|payload| self.try_send(payload)))
    }

    /// Same as [`send`](Self::send), returning the reason for a failure.
    pub fn try_send<D: Into<Payload>>(&self, data: D) -> Result<()> {
        let shared = self.inner.lock();
        let transport = shared.transport.as_ref().ok_or(WsError::NotInitialized)?;

        let state = transport.state();
        if state != SocketState::Open {
            return Err(WsError::NotOpen { state }.into());
        }

        let payload: Payload = data.into();
        let text = payload.into_text()?;

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Sending WebSocket message");

        transport.send(text)
    }

    fn report_send(result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "WebSocket send failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Ready state of the current handle, [`SocketState::Closed`] when there is none.
    #[must_use]
    pub fn socket_state(&self) -> SocketState {
        self.inner
            .lock()
            .transport
            .as_ref()
            .map_or(SocketState::Closed, |transport| transport.state())
    }

    /// Whether the current handle is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.socket_state() == SocketState::Open
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to lifecycle state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnect attempts made since the last successful open.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    /// Retry policy set by the last `connect` call.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.lock().policy
    }
}

struct Inner<C: Connector> {
    me: Weak<Inner<C>>,
    connector: C,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Everything the event handlers and public methods mutate, guarded by one lock.
#[derive(Default)]
struct Shared {
    transport: Option<Box<dyn Transport>>,
    /// Identifies the current handle; events tagged with another value are stale
    generation: u64,
    params: Option<ConnectParams>,
    policy: RetryPolicy,
    retry_count: u32,
    manual_close: bool,
    handlers: Handlers,
    retry_timer: Option<AbortHandle>,
}

impl Shared {
    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel_retry();
    }
}

/// Handler call to make once the state lock is released.
enum Notification {
    Message(MessageCallback, Message),
    Error(ErrorCallback, Error),
    Exhausted(ExhaustedCallback, u32),
}

impl Notification {
    fn deliver(self) {
        match self {
            Self::Message(f, message) => f(message),
            Self::Error(f, error) => f(&error),
            Self::Exhausted(f, attempts) => f(attempts),
        }
    }
}

impl<C: Connector> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Replace the current handle with a fresh one for `params`.
    fn attempt(&self, shared: &mut Shared, params: &ConnectParams) -> Result<()> {
        shared.generation = shared.generation.wrapping_add(1);
        if let Some(previous) = shared.transport.take() {
            previous.close();
        }

        let me: Weak<dyn Dispatch> = Weak::clone(&self.me) as Weak<dyn Dispatch>;
        let events = EventSink::new(me, shared.generation);

        self.publish(ConnectionState::Connecting);
        match self.connector.connect(params, events) {
            Ok(transport) => {
                shared.transport = Some(transport);
                Ok(())
            }
            Err(e) => {
                self.publish(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) -> Option<Notification> {
        let mut shared = self.lock();
        if generation != shared.generation {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                generation,
                current = shared.generation,
                ?event,
                "Ignoring event from replaced connection"
            );
            return None;
        }

        match event {
            TransportEvent::Open => {
                if shared.manual_close {
                    // Opened after close() released the handle.
                    return None;
                }
                shared.retry_count = 0;
                shared.manual_close = false;

                #[cfg(feature = "tracing")]
                tracing::info!("WebSocket connected");

                self.publish(ConnectionState::Open {
                    since: Instant::now(),
                });
                None
            }
            TransportEvent::Message(message) => {
                if shared.manual_close {
                    return None;
                }
                let Some(f) = shared.handlers.on_message.clone() else {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "No message handler registered, dropping message");
                    return None;
                };
                Some(Notification::Message(f, message))
            }
            TransportEvent::Error(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %error, "WebSocket error");

                shared
                    .handlers
                    .on_error
                    .clone()
                    .map(|f| Notification::Error(f, error))
            }
            TransportEvent::Close { code, reason } => {
                if shared.manual_close {
                    #[cfg(feature = "tracing")]
                    tracing::info!(code, %reason, "WebSocket closed");
                    self.publish(ConnectionState::Closed);
                    return None;
                }

                #[cfg(feature = "tracing")]
                tracing::warn!(code, %reason, "WebSocket closed unexpectedly");
                #[cfg(not(feature = "tracing"))]
                let _ = (code, reason);

                self.on_abnormal_close(&mut shared)
            }
        }
    }

    fn on_abnormal_close(&self, shared: &mut Shared) -> Option<Notification> {
        let max_attempts = shared.policy.max_attempts;
        if shared.retry_count >= max_attempts {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                attempts = shared.retry_count,
                "Reconnect attempts exhausted, staying closed"
            );
            self.publish(ConnectionState::Closed);
            return shared
                .handlers
                .on_retries_exhausted
                .clone()
                .map(|f| Notification::Exhausted(f, shared.retry_count));
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            #[cfg(feature = "tracing")]
            tracing::warn!("No tokio runtime available to schedule a reconnect");
            self.publish(ConnectionState::Closed);
            return None;
        };

        shared.retry_count += 1;
        let attempt = shared.retry_count;

        let mut backoff: Constant = shared.policy.into();
        let delay = backoff.next_backoff().unwrap_or(shared.policy.interval);
        let generation = shared.generation;
        let me = Weak::clone(&self.me);

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, max_attempts, ?delay, "Scheduling reconnect");

        shared.cancel_retry();
        let timer = runtime.spawn(async move {
            sleep(delay).await;
            if let Some(inner) = me.upgrade() {
                inner.retry(generation);
            }
        });
        shared.retry_timer = Some(timer.abort_handle());

        self.publish(ConnectionState::Reconnecting { attempt });
        None
    }

    /// Timer callback: reconnect with the saved parameters if nothing superseded this timer.
    fn retry(&self, generation: u64) {
        let mut shared = self.lock();
        if generation != shared.generation || shared.manual_close {
            return;
        }
        shared.retry_timer = None;

        let Some(params) = shared.params.clone() else {
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            attempt = shared.retry_count,
            max_attempts = shared.policy.max_attempts,
            url = %params.url,
            "Reconnecting WebSocket"
        );

        if let Err(e) = self.attempt(&mut shared, &params) {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "Unable to construct WebSocket for reconnect");

            let on_error = shared.handlers.on_error.clone();
            drop(shared);
            if let Some(f) = on_error {
                f(&e);
            }
        }
    }
}

impl<C: Connector> Dispatch for Inner<C> {
    fn dispatch(&self, generation: u64, event: TransportEvent) {
        if let Some(notification) = self.handle_event(generation, event) {
            notification.deliver();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refuse;

    impl Connector for Refuse {
        fn connect(
            &self,
            _params: &ConnectParams,
            _events: EventSink,
        ) -> Result<Box<dyn Transport>> {
            Err(WsError::UnsupportedEnvironment.into())
        }
    }

    #[test]
    fn starts_idle_and_closed() {
        let manager = ConnectionManager::with_connector(Refuse);

        assert_eq!(manager.connection_state(), ConnectionState::Idle);
        assert_eq!(manager.socket_state(), SocketState::Closed);
        assert!(!manager.is_connected());
        assert_eq!(manager.retry_count(), 0);
    }

    #[test]
    fn empty_url_is_a_configuration_error() {
        let manager = ConnectionManager::with_connector(Refuse);

        let err = manager.try_connect("  ", ConnectOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Configuration);
        assert_eq!(
            manager.connection_state(),
            ConnectionState::Idle,
            "nothing should be attempted"
        );
    }

    #[test]
    fn construction_failure_reports_false_and_closed() {
        let manager = ConnectionManager::with_connector(Refuse);

        assert!(!manager.connect("ws://localhost", ConnectOptions::default()));
        assert_eq!(manager.connection_state(), ConnectionState::Closed);
        assert_eq!(manager.socket_state(), SocketState::Closed);
    }

    #[test]
    fn connect_stores_retry_policy() {
        let manager = ConnectionManager::with_connector(Refuse);
        let options = ConnectOptions::builder()
            .max_reconnect_attempts(2)
            .reconnect_interval(std::time::Duration::from_millis(10))
            .build();

        assert!(!manager.connect("ws://localhost", options));

        assert_eq!(
            manager.retry_policy(),
            RetryPolicy::new(2, std::time::Duration::from_millis(10))
        );
    }

    #[test]
    fn send_and_close_without_connect() {
        let manager = ConnectionManager::with_connector(Refuse);

        manager.close();
        assert!(!manager.send("ping"));
        let err = manager.try_send("ping").unwrap_err();
        assert!(
            matches!(err.downcast_ref::<WsError>(), Some(WsError::NotInitialized)),
            "unexpected error: {err}"
        );
        assert_eq!(manager.connection_state(), ConnectionState::Idle);
    }
}
