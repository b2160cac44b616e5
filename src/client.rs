//! High-level live client: transport + audio engine + application events.

use crate::config::{LiveBackend, SessionConfig};
use crate::engine::AudioEngine;
use crate::error::{LiveError, Result};
use crate::events::{CloseCause, ServerEvent, ToolCall, ToolResponse};
use crate::transport::SessionTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Application callbacks for structured session events.
///
/// Audio never reaches this trait — it flows straight to the playback
/// path. All methods default to no-ops.
#[async_trait]
pub trait LiveEventHandler: Send + Sync {
    /// A chunk of output text.
    async fn on_text(&self, _text: &str) {}

    /// The model invoked a client-side tool. The application decides
    /// whether to act; every acted-on call must produce exactly one
    /// [`LiveClient::send_tool_response`] with the matching id.
    async fn on_tool_call(&self, _call: &ToolCall) {}

    /// The current model turn is complete.
    async fn on_turn_complete(&self) {}

    /// The connection closed. Emitted once; the session is over and the
    /// application owns any retry policy.
    async fn on_closed(&self, _code: u16, _reason: &str, _cause: CloseCause) {}

    /// A message shape this client does not recognize.
    async fn on_unhandled(&self, _raw: &Value) {}

    /// A recoverable error the session absorbed (e.g. the microphone was
    /// unavailable at start).
    async fn on_error(&self, _error: &LiveError) {}
}

/// Default no-op handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHandler;

#[async_trait]
impl LiveEventHandler for NoOpHandler {}

/// One live voice session: connects the transport, streams the
/// microphone, plays inbound audio and routes structured events.
///
/// Single-use, like its parts: `stop` tears everything down and a new
/// session gets a fresh client.
pub struct LiveClient {
    backend: LiveBackend,
    model: String,
    config: SessionConfig,
    handler: Arc<dyn LiveEventHandler>,
    transport: Arc<SessionTransport>,
    engine: AudioEngine,
    forward: Option<tokio::task::JoinHandle<()>>,
}

impl LiveClient {
    /// Create a client for the given backend and configuration.
    pub fn new(
        backend: LiveBackend,
        config: SessionConfig,
        handler: Arc<dyn LiveEventHandler>,
    ) -> Self {
        let engine = AudioEngine::new(&config);
        Self {
            backend,
            model: crate::config::DEFAULT_MODEL.to_string(),
            config,
            handler,
            transport: Arc::new(SessionTransport::new()),
            engine,
            forward: None,
        }
    }

    /// Override the model identity sent in setup.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The transport session id.
    pub fn session_id(&self) -> &str {
        self.transport.session_id()
    }

    /// Connect, negotiate setup, then start the audio engine.
    ///
    /// Capture starts only after the connection opens, so setup is never
    /// delayed behind queued audio. A microphone that cannot be acquired
    /// is reported through [`LiveEventHandler::on_error`] and leaves the
    /// session running output-only; any other failure tears down.
    pub async fn start(&mut self) -> Result<()> {
        self.transport.connect(&self.backend, &self.model, &self.config).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let sink = Box::new(move |encoded: String| {
            // The capture thread outlives nothing: a send after teardown
            // just fails and the frame is discarded.
            let _ = tx.send(encoded);
        });

        match self.engine.start(sink) {
            Ok(()) => {}
            Err(err @ LiveError::CaptureUnavailable(_)) => {
                tracing::warn!(error = %err, "continuing without microphone");
                self.handler.on_error(&err).await;
            }
            Err(err) => {
                self.transport.disconnect().await;
                return Err(err);
            }
        }

        let transport = Arc::clone(&self.transport);
        let format = self.config.capture_format;
        self.forward = Some(tokio::spawn(async move {
            while let Some(encoded) = rx.recv().await {
                if let Err(e) = transport.send_audio(&encoded, &format).await {
                    tracing::warn!(error = %e, "stopping audio forwarding");
                    break;
                }
            }
        }));

        Ok(())
    }

    /// Process inbound events until the session ends.
    ///
    /// Audio is scheduled for playback in arrival order; everything else
    /// goes to the handler. Returns when the transport emits its close
    /// event (already forwarded to [`LiveEventHandler::on_closed`]).
    pub async fn run(&self) -> Result<()> {
        while let Some(event) = self.transport.next_event().await {
            match event {
                ServerEvent::AudioDelta { data } => {
                    if let Err(e) = self.engine.play(&data) {
                        // A single bad chunk is not fatal to the session.
                        tracing::warn!(error = %e, "skipping unplayable audio chunk");
                    }
                }
                ServerEvent::TextDelta { text } => self.handler.on_text(&text).await,
                ServerEvent::ToolCall(call) => self.handler.on_tool_call(&call).await,
                ServerEvent::TurnComplete => self.handler.on_turn_complete().await,
                ServerEvent::SetupComplete => {
                    tracing::debug!(session_id = %self.session_id(), "setup complete");
                }
                ServerEvent::ConnectionClosed { code, reason, cause } => {
                    self.handler.on_closed(code, &reason, cause).await;
                }
                ServerEvent::Unhandled { raw } => self.handler.on_unhandled(&raw).await,
            }
        }
        Ok(())
    }

    /// Send a complete user text turn.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.transport.send_text(text).await
    }

    /// Send a tool result back to the model, correlated by call id.
    pub async fn send_tool_response(&self, response: ToolResponse) -> Result<()> {
        self.transport.send_tool_response(&response).await
    }

    /// Tear the session down: release the devices, close the connection.
    ///
    /// Idempotent and safe mid-stream; after it returns no further frames
    /// are sent and no further playback is scheduled.
    pub async fn stop(&mut self) {
        self.engine.stop();
        self.transport.disconnect().await;
        if let Some(forward) = self.forward.take() {
            // The sink closure died with the capture thread, so the
            // channel is closed and the task ends on its own.
            let _ = forward.await;
        }
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("model", &self.model)
            .field("session_id", &self.session_id())
            .finish()
    }
}
