//! The duplex session transport.
//!
//! Owns the WebSocket connection to the live endpoint. Messages sent
//! before the connection opens queue in FIFO order and flush on open,
//! after the one-time setup envelope; messages sent after close are
//! dropped. Inbound frames are demultiplexed into [`ServerEvent`]s
//! delivered one at a time, exactly once, in arrival order.

use crate::audio::AudioFormat;
use crate::config::{LiveBackend, SessionConfig};
use crate::error::{LiveError, Result};
use crate::events::{CloseCause, ServerEvent, ToolResponse};
use crate::protocol::{self, ClientMessage};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// Close code used when the connection dropped without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;
/// Close code used when a close frame carried no status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not yet connected.
    Idle,
    /// Connection in progress; sends are queued.
    Connecting,
    /// Connected; sends transmit immediately.
    Open,
    /// Closed; sends are dropped. A closed transport is never reused.
    Closed,
}

/// Where a send went.
#[derive(Debug, PartialEq, Eq)]
enum SendAction {
    /// Transmit on the socket now.
    Transmit(String),
    /// Held in the outbound queue until open.
    Queued,
    /// Dropped: the transport is closed.
    Dropped,
}

/// State machine plus outbound queue, under one lock so an enqueue can
/// never race the drain-on-open.
struct Outbox {
    state: TransportState,
    queue: VecDeque<String>,
}

impl Outbox {
    fn new() -> Self {
        Self { state: TransportState::Idle, queue: VecDeque::new() }
    }

    fn route(&mut self, text: String) -> SendAction {
        match self.state {
            TransportState::Open => SendAction::Transmit(text),
            TransportState::Idle | TransportState::Connecting => {
                self.queue.push_back(text);
                SendAction::Queued
            }
            TransportState::Closed => SendAction::Dropped,
        }
    }

    fn begin_connect(&mut self) -> Result<()> {
        match self.state {
            TransportState::Idle => {
                self.state = TransportState::Connecting;
                Ok(())
            }
            _ => Err(LiveError::connection(
                "transport already used; a new session needs a fresh transport",
            )),
        }
    }

    /// Transition to Open, handing back every queued message in FIFO order.
    fn open(&mut self) -> Vec<String> {
        self.state = TransportState::Open;
        self.queue.drain(..).collect()
    }

    /// Transition to Closed, clearing the queue. Returns whether this call
    /// performed the transition.
    fn close(&mut self) -> bool {
        let transitioned = self.state != TransportState::Closed;
        self.state = TransportState::Closed;
        self.queue.clear();
        transitioned
    }
}

/// A single-use duplex connection to the live endpoint.
pub struct SessionTransport {
    session_id: String,
    outbox: Mutex<Outbox>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    source: tokio::sync::Mutex<Option<WsSource>>,
    /// Demuxed events not yet handed out (one envelope can carry several).
    pending: Mutex<VecDeque<ServerEvent>>,
}

impl SessionTransport {
    /// Create an idle transport.
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            outbox: Mutex::new(Outbox::new()),
            sink: tokio::sync::Mutex::new(None),
            source: tokio::sync::Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// The session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current connection state.
    pub fn state(&self) -> TransportState {
        self.outbox.lock().state
    }

    /// Number of messages waiting for the connection to open.
    pub fn queued_len(&self) -> usize {
        self.outbox.lock().queue.len()
    }

    /// Connect and negotiate the session.
    ///
    /// Suspends until the connection opens or fails; there is no built-in
    /// timeout — callers wanting a bound wrap this in one and disconnect
    /// on expiry. On open, exactly one setup envelope goes out first, then
    /// the outbound queue flushes in FIFO order; both happen while the
    /// writer half is locked, so nothing sent after open can overtake.
    pub async fn connect(
        &self,
        backend: &LiveBackend,
        model: &str,
        config: &SessionConfig,
    ) -> Result<()> {
        self.outbox.lock().begin_connect()?;

        let result = self.connect_inner(backend, model, config).await;
        if result.is_err() {
            self.outbox.lock().close();
        }
        result
    }

    async fn connect_inner(
        &self,
        backend: &LiveBackend,
        model: &str,
        config: &SessionConfig,
    ) -> Result<()> {
        let url = backend.build_url()?;
        let (stream, _response) = connect_async(&url)
            .await
            .map_err(|e| LiveError::connection(format!("WebSocket connect error: {}", e)))?;
        let (mut sink, ws_source) = stream.split();

        *self.source.lock().await = Some(ws_source);

        // Hold the writer lock through setup + flush; the sink is only
        // published once both are done, so post-open senders wait here.
        let mut sink_guard = self.sink.lock().await;

        // Setup always goes out first, before any queued traffic.
        let setup = ClientMessage::setup(model, config).to_json()?;
        tracing::debug!(session_id = %self.session_id, model_id = %model, "sending setup");
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| LiveError::connection(format!("setup send error: {}", e)))?;

        // Flip to Open and drain the queue while still holding the writer
        // lock: post-open senders block on the lock until the flush ends.
        let queued = self.outbox.lock().open();
        let flushed = queued.len();
        for text in queued {
            sink.send(Message::Text(text.into()))
                .await
                .map_err(|e| LiveError::connection(format!("queue flush error: {}", e)))?;
        }
        *sink_guard = Some(sink);
        drop(sink_guard);

        tracing::info!(session_id = %self.session_id, flushed, "session open");
        Ok(())
    }

    /// Send a message.
    ///
    /// Open: serialize and transmit now. Idle/Connecting: enqueue for the
    /// flush-on-open. Closed: drop — a closed session cannot be resumed,
    /// the caller reconnects with a fresh transport.
    pub async fn send(&self, msg: &ClientMessage) -> Result<()> {
        let text = msg.to_json()?;
        let action = self.outbox.lock().route(text);
        match action {
            SendAction::Queued => {
                tracing::debug!(session_id = %self.session_id, "queued pre-open send");
                Ok(())
            }
            SendAction::Dropped => {
                tracing::debug!(session_id = %self.session_id, "dropped send on closed transport");
                Ok(())
            }
            SendAction::Transmit(text) => {
                let mut guard = self.sink.lock().await;
                match guard.as_mut() {
                    Some(sink) => match sink.send(Message::Text(text.into())).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            *guard = None;
                            drop(guard);
                            // The session is over; the caller gets the error
                            // and the event loop still gets its close event.
                            if let Some(event) =
                                self.closed_event(CLOSE_ABNORMAL, e.to_string())
                            {
                                self.pending.lock().push_back(event);
                            }
                            Err(LiveError::connection(format!("send error: {}", e)))
                        }
                    },
                    // Disconnected between routing and locking the writer.
                    None => Ok(()),
                }
            }
        }
    }

    /// Send one transport-encoded audio frame.
    pub async fn send_audio(&self, encoded: &str, format: &AudioFormat) -> Result<()> {
        self.send(&ClientMessage::realtime_audio(encoded, format)).await
    }

    /// Send a complete user text turn.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(&ClientMessage::user_text(text)).await
    }

    /// Send a tool result correlated by call id.
    pub async fn send_tool_response(&self, response: &ToolResponse) -> Result<()> {
        self.send(&ClientMessage::tool_response(response)).await
    }

    /// Next inbound event, in arrival order, each delivered exactly once.
    ///
    /// Malformed envelopes are logged and skipped. A remote close or
    /// transport failure yields a single [`ServerEvent::ConnectionClosed`]
    /// with a classified cause — the only retry signal this layer emits —
    /// after which this returns `None`.
    pub async fn next_event(&self) -> Option<ServerEvent> {
        loop {
            if let Some(event) = self.pending.lock().pop_front() {
                return Some(event);
            }

            let mut guard = self.source.lock().await;
            let source = guard.as_mut()?;

            match source.next().await {
                Some(Ok(Message::Text(text))) => self.demux(text.as_ref()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.demux(text),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping non-UTF-8 binary message");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    *guard = None;
                    drop(guard);
                    // Reply to the peer's close frame and release the
                    // socket before handing the event out.
                    self.shutdown_sink().await;
                    return self.closed_event(code, reason);
                }
                Some(Ok(_)) => {
                    // Ping/pong and raw frames carry no session data.
                }
                Some(Err(e)) => {
                    *guard = None;
                    drop(guard);
                    self.shutdown_sink().await;
                    return self.closed_event(CLOSE_ABNORMAL, e.to_string());
                }
                None => {
                    *guard = None;
                    drop(guard);
                    self.shutdown_sink().await;
                    return self.closed_event(CLOSE_ABNORMAL, "connection dropped".to_string());
                }
            }
        }
    }

    fn demux(&self, text: &str) {
        match protocol::parse_server_events(text) {
            Ok(events) => self.pending.lock().extend(events),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e,
                    "skipping malformed message");
            }
        }
    }

    /// Take and close the writer half. Closing sends the close frame (the
    /// handshake reply, when the peer closed first) and releases the
    /// socket.
    async fn shutdown_sink(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    /// Transition to Closed and emit the close event once.
    fn closed_event(&self, code: u16, reason: String) -> Option<ServerEvent> {
        if !self.outbox.lock().close() {
            return None;
        }
        let cause = CloseCause::classify(code, &reason);
        tracing::info!(session_id = %self.session_id, code, %reason, ?cause, "session closed");
        Some(ServerEvent::ConnectionClosed { code, reason, cause })
    }

    /// Close the connection and clear all queued traffic. Idempotent;
    /// safe to call from any state, including concurrently with a task
    /// parked in [`next_event`](Self::next_event): the writer half is
    /// closed first, which completes the close handshake and wakes a
    /// reader blocked on the socket, so taking the reader half below
    /// never waits on live traffic.
    pub async fn disconnect(&self) {
        let transitioned = self.outbox.lock().close();

        self.shutdown_sink().await;
        *self.source.lock().await = None;
        self.pending.lock().clear();

        if transitioned {
            tracing::info!(session_id = %self.session_id, "disconnected");
        }
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_open_sends_queue_fifo() {
        let mut outbox = Outbox::new();
        assert_eq!(outbox.route("a".into()), SendAction::Queued);
        outbox.begin_connect().unwrap();
        assert_eq!(outbox.route("b".into()), SendAction::Queued);
        assert_eq!(outbox.route("c".into()), SendAction::Queued);

        let drained = outbox.open();
        assert_eq!(drained, vec!["a", "b", "c"]);

        // A send after the transition transmits directly, never jumping
        // the (now empty) queue.
        assert_eq!(outbox.route("d".into()), SendAction::Transmit("d".into()));
        assert!(outbox.queue.is_empty());
    }

    #[test]
    fn test_closed_sends_are_dropped() {
        let mut outbox = Outbox::new();
        outbox.begin_connect().unwrap();
        outbox.open();
        outbox.close();
        assert_eq!(outbox.route("late".into()), SendAction::Dropped);
        assert!(outbox.queue.is_empty());
    }

    #[test]
    fn test_close_clears_queue_and_is_idempotent() {
        let mut outbox = Outbox::new();
        outbox.route("queued".into());
        assert!(outbox.close());
        assert_eq!(outbox.queue.len(), 0);
        assert!(!outbox.close());
        assert_eq!(outbox.queue.len(), 0);
    }

    #[test]
    fn test_transport_is_single_use() {
        let mut outbox = Outbox::new();
        outbox.begin_connect().unwrap();
        assert!(outbox.begin_connect().is_err());
        outbox.close();
        assert!(outbox.begin_connect().is_err());
    }

    #[tokio::test]
    async fn test_send_on_fresh_transport_queues() {
        let transport = SessionTransport::new();
        transport.send_text("hello").await.unwrap();
        assert_eq!(transport.queued_len(), 1);
        assert_eq!(transport.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_twice_leaves_nothing_queued() {
        let transport = SessionTransport::new();
        transport.send_text("queued").await.unwrap();
        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(transport.queued_len(), 0);
        assert_eq!(transport.state(), TransportState::Closed);
        // Post-close sends are silent no-ops.
        transport.send_text("late").await.unwrap();
        assert_eq!(transport.queued_len(), 0);
    }
}
