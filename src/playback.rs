//! Gapless playback scheduling against the output device clock.

use crate::audio::{AudioChunk, AudioFormat};
use crate::error::{LiveError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

/// The monotonically advancing next-start-time cursor.
///
/// Each chunk starts at `max(now, cursor)` and advances the cursor by
/// exactly its duration: back-to-back with no gap when chunks arrive
/// faster than real time, immediate (no overlap) when they arrive slower.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackCursor {
    cursor: f64,
}

impl PlaybackCursor {
    /// Create a cursor at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a chunk of `duration` seconds at hardware time `now`.
    ///
    /// Returns the chunk's start time on the hardware clock.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = now.max(self.cursor);
        self.cursor = start + duration;
        start
    }

    /// The time the next chunk would start if it arrived now or earlier.
    pub fn next_start(&self) -> f64 {
        self.cursor
    }
}

/// Shared between the enqueue path and the output callback.
struct SinkShared {
    /// Decoded samples awaiting playback, in enqueue order.
    queue: Mutex<VecDeque<f32>>,
    /// Mono frames the device has consumed; the hardware clock.
    samples_played: AtomicU64,
}

/// Owns the output device and plays enqueued chunks back-to-back.
///
/// The cpal stream lives on a dedicated thread (streams are not `Send`);
/// `enqueue` only appends to the shared queue and never blocks on the
/// device. On underrun the callback emits silence and the clock keeps
/// advancing, so a late chunk starts immediately rather than overlapping.
pub struct PlaybackSink {
    format: AudioFormat,
    shared: Arc<SinkShared>,
    cursor: Mutex<PlaybackCursor>,
    worker: Option<(JoinHandle<()>, std::sync::mpsc::Sender<()>)>,
}

impl PlaybackSink {
    /// Create a sink for the given playback format.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            shared: Arc::new(SinkShared {
                queue: Mutex::new(VecDeque::new()),
                samples_played: AtomicU64::new(0),
            }),
            cursor: Mutex::new(PlaybackCursor::new()),
            worker: None,
        }
    }

    /// Acquire the output device and start the stream.
    ///
    /// Device acquisition happens on the audio thread; the outcome is
    /// reported synchronously. Calling start on a running sink is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let sample_rate = self.format.sample_rate;
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let handle = std::thread::spawn(move || {
            match build_output_stream(sample_rate, shared) {
                Ok(stream) => {
                    let _ = ack_tx.send(Ok(()));
                    // Park until stop; dropping the stream stops callbacks.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ack_tx.send(Err(e));
                }
            }
        });

        match ack_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some((handle, shutdown_tx));
                tracing::debug!(sample_rate, "playback started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(LiveError::audio("playback thread exited before acknowledging"))
            }
        }
    }

    /// Schedule a decoded chunk for playback. Fire-and-forget.
    ///
    /// Returns the scheduled start time in seconds on the hardware clock.
    /// Chunks play in enqueue order; chunks arriving after `stop` are
    /// dropped.
    pub fn enqueue(&self, chunk: &AudioChunk) -> Result<f64> {
        if self.worker.is_none() {
            tracing::debug!(bytes = chunk.data.len(), "dropping chunk: playback not running");
            return Ok(self.cursor.lock().next_start());
        }

        let samples = chunk.to_f32_samples()?;
        let now = self.hardware_time();
        let start = self.cursor.lock().schedule(now, chunk.duration_secs());
        self.shared.queue.lock().extend(samples);
        Ok(start)
    }

    /// The playback format this sink was created with.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Current hardware clock time in seconds.
    pub fn hardware_time(&self) -> f64 {
        self.shared.samples_played.load(Ordering::Relaxed) as f64
            / self.format.sample_rate as f64
    }

    /// Seconds of audio queued ahead of the hardware clock.
    pub fn buffered_secs(&self) -> f64 {
        (self.cursor.lock().next_start() - self.hardware_time()).max(0.0)
    }

    /// Release the output device. Idempotent; safe mid-playback.
    pub fn stop(&mut self) {
        if let Some((handle, shutdown)) = self.worker.take() {
            let _ = shutdown.send(());
            let _ = handle.join();
            self.shared.queue.lock().clear();
            tracing::debug!("playback stopped");
        }
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(sample_rate: u32, shared: Arc<SinkShared>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LiveError::audio("no output device available"))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| LiveError::audio(e.to_string()))?
        .find(|c| {
            c.channels() >= 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| LiveError::audio("no suitable output config found"))?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "output device acquired"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = shared.queue.lock();
                let mut frames = 0u64;
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    frames += 1;
                }
                shared.samples_played.fetch_add(frames, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| LiveError::audio(e.to_string()))?;

    stream.play().map_err(|e| LiveError::audio(e.to_string()))?;
    Ok(stream)
}
