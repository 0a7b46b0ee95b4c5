#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(unused, reason = "Not every test binary uses every helper")]

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use managed_socket::Result;
use managed_socket::ws::{
    ABNORMAL_CLOSURE, ConnectParams, Connector, EventSink, Message, NORMAL_CLOSURE, SocketState,
    Transport, TransportEvent, WsError,
};
use secrecy::ExposeSecret as _;

/// In-memory [`Connector`] whose handles are driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    handles: Arc<Mutex<Vec<Arc<ScriptedSocket>>>>,
    refuse: Arc<AtomicBool>,
}

impl ScriptedConnector {
    /// Number of handles constructed so far.
    pub fn attempts(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn socket(&self, index: usize) -> Arc<ScriptedSocket> {
        Arc::clone(&self.handles.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<ScriptedSocket> {
        Arc::clone(self.handles.lock().unwrap().last().unwrap())
    }

    /// Make subsequent constructions fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, params: &ConnectParams, events: EventSink) -> Result<Box<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(WsError::UnsupportedEnvironment.into());
        }

        let socket = Arc::new(ScriptedSocket {
            url: params.url.clone(),
            token: params
                .token
                .as_ref()
                .map(|token| token.expose_secret().to_owned()),
            events,
            ready_state: AtomicU8::new(0),
            sent: Mutex::new(Vec::new()),
            close_requested: AtomicBool::new(false),
        });
        self.handles.lock().unwrap().push(Arc::clone(&socket));

        Ok(Box::new(ScriptedTransport(socket)))
    }
}

/// One scripted connection.
pub struct ScriptedSocket {
    pub url: String,
    pub token: Option<String>,
    events: EventSink,
    ready_state: AtomicU8,
    sent: Mutex<Vec<String>>,
    close_requested: AtomicBool,
}

impl ScriptedSocket {
    fn set_state(&self, state: SocketState) {
        self.ready_state
            .store(state.ready_state().unwrap(), Ordering::SeqCst);
    }

    pub fn state(&self) -> SocketState {
        SocketState::from_ready_state(self.ready_state.load(Ordering::SeqCst))
    }

    /// Complete the handshake.
    pub fn open(&self) {
        self.set_state(SocketState::Open);
        self.events.emit(TransportEvent::Open);
    }

    pub fn receive(&self, text: &str) {
        self.events
            .emit(TransportEvent::Message(Message::Text(text.to_owned())));
    }

    pub fn error(&self) {
        self.events
            .emit(TransportEvent::Error(WsError::ConnectionClosed.into()));
    }

    /// Lose the connection without a close handshake, as a network failure would.
    pub fn drop_connection(&self) {
        self.set_state(SocketState::Closed);
        self.events.emit(TransportEvent::Close {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        });
    }

    /// Report the end of an orderly close.
    pub fn finish_close(&self) {
        self.set_state(SocketState::Closed);
        self.events.emit(TransportEvent::Close {
            code: NORMAL_CLOSURE,
            reason: String::new(),
        });
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }
}

struct ScriptedTransport(Arc<ScriptedSocket>);

impl Transport for ScriptedTransport {
    fn state(&self) -> SocketState {
        self.0.state()
    }

    fn send(&self, text: String) -> Result<()> {
        let state = self.0.state();
        if state != SocketState::Open {
            return Err(WsError::NotOpen { state }.into());
        }
        self.0.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.0.close_requested.store(true, Ordering::SeqCst);
        if self.0.state() != SocketState::Closed {
            self.0.set_state(SocketState::Closing);
        }
    }
}
