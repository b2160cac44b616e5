//! The audio engine: one capture/playback session bound to the host's
//! audio devices.

use crate::audio::AudioChunk;
use crate::capture::{CapturePipeline, FrameSink};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::playback::PlaybackSink;

/// Composes the capture pipeline and playback sink into a single session.
///
/// The engine exclusively owns both hardware handles between `start` and
/// `stop`. Instances are single-session: after teardown, a new session
/// gets a fresh engine.
pub struct AudioEngine {
    capture: CapturePipeline,
    playback: PlaybackSink,
}

impl AudioEngine {
    /// Create an engine from the session's audio formats.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            capture: CapturePipeline::new(config.capture_format),
            playback: PlaybackSink::new(config.playback_format),
        }
    }

    /// Acquire both devices and begin streaming.
    ///
    /// Playback starts first so inbound audio is never dropped while the
    /// microphone is negotiating. A [`crate::error::LiveError::CaptureUnavailable`]
    /// from the microphone leaves playback running — the session can
    /// continue output-only, and the caller decides how to surface it.
    pub fn start(&mut self, sink: FrameSink) -> Result<()> {
        self.playback.start()?;
        self.capture.start(sink)
    }

    /// Schedule inbound PCM for gapless playback. Fire-and-forget.
    pub fn play(&self, data: &[u8]) -> Result<()> {
        let chunk = AudioChunk::new(data.to_vec(), self.playback.format());
        self.playback.enqueue(&chunk)?;
        Ok(())
    }

    /// Seconds of audio queued ahead of the output clock.
    pub fn buffered_secs(&self) -> f64 {
        self.playback.buffered_secs()
    }

    /// Whether the microphone is currently capturing.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    /// Release both devices. Idempotent; safe mid-capture and
    /// mid-playback. No frames are emitted and no chunks are scheduled
    /// after this returns.
    pub fn stop(&mut self) {
        self.capture.stop();
        self.playback.stop();
    }
}
