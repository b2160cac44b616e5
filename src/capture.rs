//! Microphone capture pipeline.

use crate::audio::{AudioChunk, AudioFormat, FrameChunker};
use crate::error::{LiveError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Receives each captured frame, already transport-encoded (base64 PCM16).
pub type FrameSink = Box<dyn FnMut(String) + Send>;

/// Default frame size in samples (64ms at 16kHz).
pub const DEFAULT_FRAME_SAMPLES: usize = 1024;

/// Chunker + sink, shared between the device callback and the teardown
/// path so the trailing partial frame can be flushed after the stream is
/// dropped.
struct CaptureShared {
    format: AudioFormat,
    chunker: FrameChunker,
    sink: FrameSink,
}

impl CaptureShared {
    fn push(&mut self, samples: &[f32]) {
        for frame in self.chunker.push(samples) {
            self.emit(&frame);
        }
    }

    fn flush(&mut self) {
        if let Some(frame) = self.chunker.flush_remaining() {
            self.emit(&frame);
        }
    }

    fn emit(&mut self, frame: &[f32]) {
        let chunk = AudioChunk::from_f32_samples(frame, self.format);
        (self.sink)(chunk.to_base64());
    }
}

/// Owns the input device and emits fixed-size encoded frames.
///
/// The cpal stream lives on a dedicated thread; frames are delivered to
/// the sink from the device callback in capture order. Device acquisition
/// failure is reported from `start`, never mid-stream.
pub struct CapturePipeline {
    format: AudioFormat,
    frame_samples: usize,
    worker: Option<(JoinHandle<()>, std::sync::mpsc::Sender<()>)>,
}

impl CapturePipeline {
    /// Create a pipeline for the given capture format.
    pub fn new(format: AudioFormat) -> Self {
        Self { format, frame_samples: DEFAULT_FRAME_SAMPLES, worker: None }
    }

    /// Override the frame size in samples.
    pub fn with_frame_samples(mut self, frame_samples: usize) -> Self {
        self.frame_samples = frame_samples;
        self
    }

    /// Whether the pipeline is currently capturing.
    pub fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    /// Acquire the microphone and begin delivering frames to `sink`.
    ///
    /// Suspends until the device grants or denies access; a missing
    /// device or denied permission surfaces as
    /// [`LiveError::CaptureUnavailable`]. Calling start while already
    /// capturing is a no-op.
    pub fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let format = self.format;
        let frame_samples = self.frame_samples;
        let shared = Arc::new(Mutex::new(CaptureShared {
            format,
            chunker: FrameChunker::new(frame_samples),
            sink,
        }));
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let handle = std::thread::spawn(move || {
            match build_input_stream(format, Arc::clone(&shared)) {
                Ok(stream) => {
                    let _ = ack_tx.send(Ok(()));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    // Callbacks are done; hand the partial frame on.
                    shared.lock().flush();
                }
                Err(e) => {
                    let _ = ack_tx.send(Err(e));
                }
            }
        });

        match ack_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some((handle, shutdown_tx));
                tracing::debug!(sample_rate = format.sample_rate, frame_samples, "capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(LiveError::capture("capture thread exited before acknowledging"))
            }
        }
    }

    /// Release the microphone. Idempotent; safe to call if never started.
    ///
    /// The worker thread drops the stream, then flushes the trailing
    /// partial frame to the sink; no frames are delivered after this
    /// returns.
    pub fn stop(&mut self) {
        if let Some((handle, shutdown)) = self.worker.take() {
            let _ = shutdown.send(());
            let _ = handle.join();
            tracing::debug!("capture stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    format: AudioFormat,
    shared: Arc<Mutex<CaptureShared>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LiveError::capture("no input device available"))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| LiveError::capture(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(format.sample_rate)
                && c.max_sample_rate() >= SampleRate(format.sample_rate)
        })
        .ok_or_else(|| LiveError::capture("no suitable mono input config found"))?;

    let config = supported.with_sample_rate(SampleRate(format.sample_rate)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = format.sample_rate,
        "input device acquired"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                shared.lock().push(data);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| LiveError::capture(e.to_string()))?;

    stream.play().map_err(|e| LiveError::capture(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut pipeline = CapturePipeline::new(AudioFormat::pcm16_16khz());
        assert!(!pipeline.is_capturing());
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_capturing());
    }

    #[test]
    fn test_teardown_flushes_trailing_partial_frame() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&frames);
        let sink: FrameSink = Box::new(move |encoded| captured.lock().push(encoded));

        let mut shared = CaptureShared {
            format: AudioFormat::pcm16_16khz(),
            chunker: FrameChunker::new(4),
            sink,
        };

        // Six samples: one complete frame, two left buffered.
        shared.push(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(frames.lock().len(), 1);

        shared.flush();
        assert_eq!(frames.lock().len(), 2);
        let last = frames.lock().last().cloned().unwrap();
        let chunk = AudioChunk::from_base64(&last, AudioFormat::pcm16_16khz()).unwrap();
        assert_eq!(chunk.to_f32_samples().unwrap().len(), 2);

        // Nothing left to flush.
        shared.flush();
        assert_eq!(frames.lock().len(), 2);
    }
}
