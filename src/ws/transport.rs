//! Default [`Connector`] backed by `tokio-tungstenite`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use secrecy::ExposeSecret as _;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::config::ConnectParams;
use super::error::WsError;
use super::message::Message;
use super::traits::{
    ABNORMAL_CLOSURE, Connector, EventSink, NORMAL_CLOSURE, SocketState, Transport,
    TransportEvent,
};
use crate::Result;
use crate::error::{Error, Kind};

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// How long to wait for the peer to finish the closing handshake before dropping the socket.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

enum Command {
    Send(String),
    Close,
}

/// Opens WebSocket connections on the ambient tokio runtime.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, params: &ConnectParams, events: EventSink) -> Result<Box<dyn Transport>> {
        let request = build_request(params)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_e| WsError::UnsupportedEnvironment)?;

        let ready_state = Arc::new(AtomicU8::new(CONNECTING));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        runtime.spawn(run(request, Arc::clone(&ready_state), command_rx, events));

        Ok(Box::new(WebSocketTransport {
            ready_state,
            command_tx,
        }))
    }
}

/// Validate the endpoint and attach the token as the requested sub-protocol.
fn build_request(params: &ConnectParams) -> Result<Request> {
    let url = Url::parse(&params.url)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(WsError::UnsupportedScheme(url.scheme().to_owned()).into());
    }

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::with_source(Kind::Construction, WsError::Connection(e)))?;

    if let Some(token) = params
        .token
        .as_ref()
        .filter(|token| !token.expose_secret().is_empty())
    {
        let value =
            HeaderValue::from_str(token.expose_secret()).map_err(|_e| WsError::InvalidToken)?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

/// Handle to a socket driven by [`run`].
struct WebSocketTransport {
    ready_state: Arc<AtomicU8>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl Transport for WebSocketTransport {
    fn state(&self) -> SocketState {
        SocketState::from_ready_state(self.ready_state.load(Ordering::Acquire))
    }

    fn send(&self, text: String) -> Result<()> {
        let state = self.state();
        if state != SocketState::Open {
            return Err(WsError::NotOpen { state }.into());
        }

        self.command_tx
            .send(Command::Send(text))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    fn close(&self) {
        // The socket task treats a dropped sender the same way.
        _ = self.command_tx.send(Command::Close);
    }
}

/// Drive one socket from handshake to teardown, reporting through `events`.
async fn run(
    request: Request,
    ready_state: Arc<AtomicU8>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSink,
) {
    let connect = connect_async(request);
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws_stream, _)) => break ws_stream,
                Err(e) => {
                    ready_state.store(CLOSED, Ordering::Release);
                    events.emit(TransportEvent::Error(e.into()));
                    events.emit(TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                    return;
                }
            },

            command = commands.recv() => match command {
                // The handle rejects sends until open.
                Some(Command::Send(_)) => {}
                Some(Command::Close) | None => {
                    ready_state.store(CLOSED, Ordering::Release);
                    events.emit(TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: "closed before the connection was established".to_owned(),
                    });
                    return;
                }
            },
        }
    };

    ready_state.store(OPEN, Ordering::Release);
    events.emit(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();
    let mut close_status: Option<(u16, String)> = None;
    let mut accepting_commands = true;
    // Armed once we stop accepting commands.
    let close_deadline = sleep(CLOSE_HANDSHAKE_TIMEOUT);
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Received WebSocket text message");
                    events.emit(TransportEvent::Message(Message::Text(text.as_str().to_owned())));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    events.emit(TransportEvent::Message(Message::Binary(bytes.to_vec())));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    ready_state.store(CLOSING, Ordering::Release);
                    // Keep the status from our own close request if we sent one first.
                    if close_status.is_none() {
                        close_status = Some(frame.map_or_else(
                            || (NO_STATUS_RECEIVED, String::new()),
                            |frame| (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        ));
                    }
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite.
                }
                Some(Err(e)) => {
                    events.emit(TransportEvent::Error(e.into()));
                    break;
                }
                None => break,
            },

            command = commands.recv(), if accepting_commands => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        events.emit(TransportEvent::Error(e.into()));
                    }
                }
                Some(Command::Close) | None => {
                    accepting_commands = false;
                    close_deadline
                        .as_mut()
                        .reset(Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                    if ready_state.swap(CLOSING, Ordering::AcqRel) == OPEN {
                        close_status = Some((NORMAL_CLOSURE, String::new()));
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        if write.send(WsMessage::Close(Some(frame))).await.is_err() {
                            break;
                        }
                    }
                }
            },

            () = &mut close_deadline, if !accepting_commands => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Peer did not complete the closing handshake, dropping socket");
                break;
            }
        }
    }

    ready_state.store(CLOSED, Ordering::Release);
    let (code, reason) = close_status.unwrap_or((ABNORMAL_CLOSURE, String::new()));
    events.emit(TransportEvent::Close { code, reason });
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use secrecy::SecretString;

    use super::*;
    use crate::ws::traits::Dispatch;

    struct Ignore;

    impl Dispatch for Ignore {
        fn dispatch(&self, _generation: u64, _event: TransportEvent) {}
    }

    fn detached_sink() -> EventSink {
        let target: Weak<dyn Dispatch> = Weak::<Ignore>::new();
        EventSink::new(target, 0)
    }

    fn params(url: &str, token: Option<&str>) -> ConnectParams {
        ConnectParams::new(url.to_owned(), token.map(SecretString::from))
    }

    #[test]
    fn token_becomes_subprotocol_header() {
        let request = build_request(&params("wss://example.com/feed", Some("abc123"))).unwrap();

        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "abc123"
        );
        assert_eq!(request.uri().to_string(), "wss://example.com/feed");
    }

    #[test]
    fn no_token_no_subprotocol_header() {
        let request = build_request(&params("ws://127.0.0.1:9000", None)).unwrap();
        assert!(request.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());

        let request = build_request(&params("ws://127.0.0.1:9000", Some(""))).unwrap();
        assert!(request.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        let err = build_request(&params("https://example.com", None)).unwrap_err();

        assert_eq!(err.kind(), Kind::Construction);
        assert!(
            matches!(
                err.downcast_ref::<WsError>(),
                Some(WsError::UnsupportedScheme(scheme)) if scheme == "https"
            ),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_malformed_url() {
        let err = build_request(&params("not a url", None)).unwrap_err();
        assert_eq!(err.kind(), Kind::Construction);
    }

    #[test]
    fn rejects_token_that_is_not_a_header_value() {
        let err = build_request(&params("ws://localhost", Some("line\nbreak"))).unwrap_err();
        assert!(
            matches!(err.downcast_ref::<WsError>(), Some(WsError::InvalidToken)),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn construction_fails_without_runtime() {
        let result = WebSocketConnector.connect(&params("ws://localhost", None), detached_sink());

        let err = result.err().unwrap();
        assert_eq!(err.kind(), Kind::Construction);
        assert!(
            matches!(
                err.downcast_ref::<WsError>(),
                Some(WsError::UnsupportedEnvironment)
            ),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn handle_rejects_send_until_open() {
        // Nothing listens on port 9, so the handshake never completes successfully.
        let transport = WebSocketConnector
            .connect(&params("ws://127.0.0.1:9", None), detached_sink())
            .unwrap();

        assert_ne!(transport.state(), SocketState::Open);
        let err = transport.send("ping".to_owned()).unwrap_err();
        assert_eq!(err.kind(), Kind::Send);
        transport.close();
    }
}
