//! Streaming session over the instance WebSocket
//!
//! One [`StreamingApi`] owns one physical socket. Logical channels are
//! multiplexed over it: outbound control frames open and close them, inbound
//! `channel` frames are routed by id against the registry. The session moves
//! through `Disconnected -> Connecting -> Connected -> Closing -> Closed`, with
//! `Faulted` absorbing unrecoverable transport failure from any connected
//! state.
//!
//! Reconnection is deliberately not provided. A dropped socket surfaces as a
//! failed [`StreamingApi::receive`]; server-side channel membership dies with
//! the socket, so the caller reconnects and re-opens its channels.

use crate::channels::{ChannelConnection, ChannelKind, ChannelRegistry};
use crate::error::{NotebusError, Result};
use crate::http::{Credential, HttpApi};
use crate::messages::{FrameKind, OutboundMessage, StreamMessage};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsReader = SplitStream<WsStream>;
type WsWriter = SplitSink<WsStream, Message>;

/// Lifecycle state of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected; the initial state
    Disconnected,
    /// WebSocket handshake in progress
    Connecting,
    /// Socket open; receive/send/channel operations available
    Connected,
    /// Voluntary teardown in progress
    Closing,
    /// Torn down by [`StreamingApi::disconnect`]
    Closed,
    /// Torn down by an unrecoverable transport failure
    Faulted,
}

struct StreamingInner {
    host: String,
    ws_scheme: &'static str,
    credential: Arc<RwLock<Option<Credential>>>,
    state: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    registry: ChannelRegistry,
    reader: AsyncMutex<Option<WsReader>>,
    writer: AsyncMutex<Option<WsWriter>>,
}

/// Streaming session for one instance
///
/// Cheaply cloneable (internal `Arc`); clones share the socket, the state,
/// and the channel registry. Channel operations and [`StreamingApi::send`]
/// may be called concurrently from many tasks; writes are serialized on an
/// internal lock. [`StreamingApi::receive`] is single-consumer: exactly one
/// task should drive the pull loop.
#[derive(Clone)]
pub struct StreamingApi {
    inner: Arc<StreamingInner>,
}

impl StreamingApi {
    /// Create a streaming session sharing the HTTP client's host and
    /// credential. Starts `Disconnected`.
    pub fn new(http: &HttpApi) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        Self {
            inner: Arc::new(StreamingInner {
                host: http.config().host.clone(),
                ws_scheme: http.config().ws_scheme(),
                credential: http.credential_cell(),
                state: state_tx,
                state_rx,
                registry: ChannelRegistry::new(),
                reader: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
            }),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.inner.state_rx.borrow()
    }

    /// Receiver for session state changes
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.inner.state.send(state);
    }

    /// Degrade to `to`, but only from a live state. Keeps a voluntary
    /// `Closed` from being overwritten by the trailing read on a socket we
    /// closed ourselves.
    fn degrade(&self, to: SessionState) {
        self.inner.state.send_if_modified(|state| match *state {
            SessionState::Connected | SessionState::Closing => {
                *state = to;
                true
            }
            _ => false,
        });
    }

    fn not_connected(&self, op: &str) -> NotebusError {
        NotebusError::Protocol(format!(
            "{op} on a session that is not connected (state {:?})",
            self.state()
        ))
    }

    fn streaming_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}/streaming",
            self.inner.ws_scheme, self.inner.host
        ))
        .map_err(|e| NotebusError::Protocol(format!("invalid instance host: {e}")))?;

        // Unauthenticated sessions connect without the token parameter
        if let Some(credential) = self.inner.credential.read().as_ref() {
            url.query_pairs_mut().append_pair("i", credential.token());
        }
        Ok(url)
    }

    /// Open the WebSocket: `Disconnected -> Connecting -> Connected`.
    ///
    /// Fails with [`NotebusError::Connection`] on handshake failure (state
    /// returns to `Disconnected`), and with [`NotebusError::Protocol`] when
    /// the session is not `Disconnected` (connect once per session).
    pub async fn connect_streaming(&self) -> Result<()> {
        let entered = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Disconnected {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !entered {
            return Err(NotebusError::Protocol(format!(
                "connect_streaming on a session in state {:?}",
                self.state()
            )));
        }

        let url = match self.streaming_url() {
            Ok(url) => url,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                let (writer, reader) = socket.split();
                *self.inner.writer.lock().await = Some(writer);
                *self.inner.reader.lock().await = Some(reader);
                self.set_state(SessionState::Connected);
                info!(host = %self.inner.host, "streaming connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                Err(NotebusError::Connection(e.to_string()))
            }
        }
    }

    /// Receive the next decoded message.
    ///
    /// Suspends until one full frame arrives. `channel` frames whose id is
    /// not registered are dropped (a disconnect racing an in-flight frame is
    /// expected) and the wait continues; transport pings are answered
    /// transparently. Transport failure or end-of-stream faults the session
    /// and returns [`NotebusError::Connection`].
    ///
    /// Single-consumer: one task drives the pull loop; callers demultiplex
    /// by channel id. Cancel-safe: dropping the future (e.g. inside
    /// `tokio::select!` or `tokio::time::timeout`) abandons only this wait,
    /// and a later `receive` picks up where the socket left off.
    pub async fn receive(&self) -> Result<StreamMessage> {
        let mut guard = self.inner.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(|| self.not_connected("receive"))?;

        loop {
            match reader.next().await {
                None => {
                    *guard = None;
                    self.teardown(SessionState::Faulted).await;
                    return Err(NotebusError::Connection("connection closed".into()));
                }
                Some(Err(e)) => {
                    *guard = None;
                    self.teardown(SessionState::Faulted).await;
                    return Err(NotebusError::Connection(e.to_string()));
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(message) = self.route(text.as_str())? {
                        return Ok(message);
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8(bytes.to_vec())
                        .map_err(|e| NotebusError::Decode(format!("binary frame not utf-8: {e}")))?;
                    if let Some(message) = self.route(&text)? {
                        return Ok(message);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let mut writer = self.inner.writer.lock().await;
                    if let Some(writer) = writer.as_mut() {
                        if let Err(e) = writer.send(Message::Pong(payload)).await {
                            debug!(error = %e, "pong failed");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    *guard = None;
                    self.teardown(SessionState::Closed).await;
                    return Err(NotebusError::Connection("closed by server".into()));
                }
                Some(Ok(_)) => {} // Pong and raw frames carry nothing for us
            }
        }
    }

    /// Decode a frame and route it against the registry. `None` means the
    /// frame was dropped and the read loop should continue.
    fn route(&self, frame: &str) -> Result<Option<StreamMessage>> {
        let message = StreamMessage::decode(frame)?;
        if let StreamMessage::Channel { id, .. } = &message {
            if !self.inner.registry.contains(id) {
                debug!(channel = %id, "dropping frame for unknown channel");
                return Ok(None);
            }
        }
        Ok(Some(message))
    }

    /// Serialize and write one control frame.
    ///
    /// Concurrent senders are serialized on the internal write lock: one
    /// writer at a time on the socket.
    pub async fn send(&self, message: &OutboundMessage, kind: FrameKind) -> Result<()> {
        let text = message.to_json()?;
        self.write_frame(text, kind).await
    }

    /// Write one frame of caller-assembled JSON. Escape hatch for frame
    /// types this crate has no [`OutboundMessage`] variant for.
    pub async fn send_json(&self, message: &serde_json::Value, kind: FrameKind) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.write_frame(text, kind).await
    }

    async fn write_frame(&self, text: String, kind: FrameKind) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| self.not_connected("send"))?;

        let frame = match kind {
            FrameKind::Text => Message::Text(text.into()),
            FrameKind::Binary => Message::Binary(text.into_bytes().into()),
        };

        match writer.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *guard = None;
                self.inner.registry.clear();
                self.degrade(SessionState::Faulted);
                Err(NotebusError::Connection(e.to_string()))
            }
        }
    }

    /// Open a logical channel of the given kind.
    ///
    /// Allocates a fresh id, registers it, and sends the `connect` frame
    /// (for a [`ChannelKind::NoteSubscription`], the `subNote` frame, where
    /// the note id is the channel id). Registration happens before the frame is
    /// written so a frame arriving immediately after still routes. Safe to
    /// call concurrently, duplicate kinds included: every call gets its own
    /// id and is routed independently.
    pub async fn connect_channel(&self, kind: ChannelKind) -> Result<ChannelConnection> {
        let (id, frame) = match &kind {
            ChannelKind::NoteSubscription { note_id } => (
                note_id.clone(),
                OutboundMessage::SubNote {
                    id: note_id.clone(),
                },
            ),
            _ => {
                let id = Uuid::new_v4().to_string();
                let frame = OutboundMessage::Connect {
                    channel: kind.name().to_string(),
                    id: id.clone(),
                    params: None,
                };
                (id, frame)
            }
        };

        self.inner.registry.register(id.clone(), kind.clone());
        if let Err(e) = self.send(&frame, FrameKind::Text).await {
            self.inner.registry.remove(&id);
            return Err(e);
        }

        debug!(channel = %id, kind = %kind, "channel connected");
        Ok(ChannelConnection::new(id, kind))
    }

    /// Close a logical channel.
    ///
    /// Removes the id from the registry and sends the `disconnect` (or
    /// `unsubNote`) frame. A connection that is no longer registered (the
    /// socket may already be gone) is a no-op, not an error. The id is
    /// never reused: frames still in flight for it are dropped on arrival.
    pub async fn disconnect_channel(&self, conn: &ChannelConnection) -> Result<()> {
        if !self.inner.registry.remove(conn.id()) {
            debug!(channel = %conn.id(), "disconnect for unregistered channel");
            return Ok(());
        }

        let frame = match conn.kind() {
            ChannelKind::NoteSubscription { note_id } => OutboundMessage::UnsubNote {
                id: note_id.clone(),
            },
            _ => OutboundMessage::Disconnect {
                id: conn.id().to_string(),
            },
        };
        self.send(&frame, FrameKind::Text).await
    }

    /// Subscribe to updates for one note. The note id doubles as the
    /// channel id of the returned connection.
    pub async fn subscribe_note(&self, note_id: impl Into<String>) -> Result<ChannelConnection> {
        self.connect_channel(ChannelKind::NoteSubscription {
            note_id: note_id.into(),
        })
        .await
    }

    /// Unsubscribe from a note. Unknown note ids are a no-op.
    pub async fn unsubscribe_note(&self, note_id: &str) -> Result<()> {
        let conn = ChannelConnection::new(
            note_id.to_string(),
            ChannelKind::NoteSubscription {
                note_id: note_id.to_string(),
            },
        );
        self.disconnect_channel(&conn).await
    }

    /// Tear the session down: `Closing -> Closed`.
    ///
    /// Sends the close frame, releases the socket, and clears the registry;
    /// server-side channel membership does not survive the socket. Calling
    /// this on a session that is not connected is a no-op. A concurrently
    /// pending `receive` completes with an error once the peer closes.
    pub async fn disconnect(&self) -> Result<()> {
        let closing = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Connected {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if !closing {
            return Ok(());
        }

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "close handshake failed");
            }
        }
        self.inner.registry.clear();
        self.set_state(SessionState::Closed);
        info!(host = %self.inner.host, "streaming disconnected");
        Ok(())
    }

    /// Release both halves and degrade the state. The reader half is
    /// released by the caller, which holds its lock.
    async fn teardown(&self, to: SessionState) {
        *self.inner.writer.lock().await = None;
        self.inner.registry.clear();
        self.degrade(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotebusConfig;

    fn session(host: &str) -> StreamingApi {
        StreamingApi::new(&HttpApi::new(NotebusConfig::new(host).insecure()))
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(session("127.0.0.1:1").state(), SessionState::Disconnected);
    }

    #[test]
    fn test_streaming_url_without_token() {
        let api = session("misskey.example");
        assert_eq!(
            api.streaming_url().unwrap().as_str(),
            "ws://misskey.example/streaming"
        );
    }

    #[test]
    fn test_streaming_url_with_token() {
        let http = HttpApi::new(NotebusConfig::new("misskey.example").with_token("T"));
        let api = StreamingApi::new(&http);
        assert_eq!(
            api.streaming_url().unwrap().as_str(),
            "wss://misskey.example/streaming?i=T"
        );
    }

    #[tokio::test]
    async fn test_receive_before_connect() {
        let result = session("127.0.0.1:1").receive().await;
        assert!(matches!(result, Err(NotebusError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let result = session("127.0.0.1:1")
            .send(
                &OutboundMessage::Disconnect { id: "x".into() },
                FrameKind::Text,
            )
            .await;
        assert!(matches!(result, Err(NotebusError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let api = session("127.0.0.1:1");
        let result = api.connect_streaming().await;
        assert!(matches!(result, Err(NotebusError::Connection(_))));
        assert_eq!(api.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected_is_noop() {
        let api = session("127.0.0.1:1");
        api.disconnect().await.unwrap();
        assert_eq!(api.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_note_is_noop() {
        let api = session("127.0.0.1:1");
        api.unsubscribe_note("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_channel_before_connect_unregisters() {
        let api = session("127.0.0.1:1");
        let result = api.connect_channel(ChannelKind::GlobalTimeline).await;
        assert!(matches!(result, Err(NotebusError::Protocol(_))));
        // The failed connect must not leave a stale routing entry behind
        assert_eq!(api.inner.registry.len(), 0);
    }
}
