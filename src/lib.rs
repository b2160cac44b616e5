//! # oracle-live
//!
//! Bidirectional real-time audio streaming client for a voice-driven
//! product-discovery assistant.
//!
//! The crate owns the hard part of a voice session: microphone capture and
//! transport framing, a persistent duplex connection with
//! queue-while-connecting send semantics, gapless playback scheduling
//! against the output device clock, and demultiplexing of inbound
//! envelopes into audio, text and tool-call events delivered exactly once
//! and in order. Presentation, prompts and retry policy live in the
//! application layer.
//!
//! ```text
//!   microphone ─► CapturePipeline ─► base64 frames ─┐
//!                                                   ▼
//!                                          SessionTransport ◄─► endpoint
//!                                                   │
//!                         ┌─ demux ────────────────┘
//!                         ▼                 ▼
//!                  PlaybackSink      LiveEventHandler
//!                  (speakers)        (text / tool calls / close)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use oracle_live::{LiveBackend, LiveClient, SessionConfig, ToolDefinition};
//!
//! let config = SessionConfig::new()
//!     .with_instruction("You are a product discovery assistant.")
//!     .with_voice("Puck")
//!     .with_audio_only()
//!     .with_tool(ToolDefinition::new("updateSpec"));
//!
//! let mut client = LiveClient::new(
//!     LiveBackend::studio(api_key),
//!     config,
//!     handler,
//! );
//! client.start().await?;
//! client.run().await?;
//! client.stop().await;
//! ```
//!
//! Sessions are single-use end to end: once a transport closes — locally
//! or by the remote — the application starts over with fresh instances.
//! The core never reconnects on its own.

pub mod audio;
pub mod capture;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod playback;
pub mod protocol;
pub mod transport;

pub use audio::{AudioChunk, AudioFormat, FrameChunker};
pub use capture::{CapturePipeline, FrameSink};
pub use client::{LiveClient, LiveEventHandler, NoOpHandler};
pub use config::{DEFAULT_MODEL, LiveBackend, SessionConfig, ToolDefinition, VOICES};
pub use engine::AudioEngine;
pub use error::{LiveError, Result};
pub use events::{CloseCause, ServerEvent, ToolCall, ToolResponse};
pub use playback::{PlaybackCursor, PlaybackSink};
pub use transport::{SessionTransport, TransportState};
