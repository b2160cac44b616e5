//! Audio format definitions and sample conversion.
//!
//! PCM samples travel as 16-bit signed little-endian on the wire, base64
//! encoded inside JSON envelopes. Conversion from the hardware's `f32`
//! samples uses the asymmetric PCM range: positive values scale by 32767,
//! negative values by 32768, and out-of-range input clamps rather than
//! erroring.

use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};

/// Complete audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of audio channels (always 1 for live sessions).
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a new audio format specification.
    pub fn new(sample_rate: u32, channels: u8, bits_per_sample: u8) -> Self {
        Self { sample_rate, channels, bits_per_sample }
    }

    /// PCM16 mono at 24kHz (playback format).
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: 24000, channels: 1, bits_per_sample: 16 }
    }

    /// PCM16 mono at 16kHz (capture format).
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: 16000, channels: 1, bits_per_sample: 16 }
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }

    /// Calculate duration in seconds for a given number of bytes.
    pub fn duration_secs(&self, bytes: usize) -> f64 {
        bytes as f64 / self.bytes_per_second() as f64
    }

    /// The `mimeType` tag for realtime input chunks at this rate.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// A chunk of raw PCM audio with its format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw audio bytes (PCM16 little-endian).
    pub data: Vec<u8>,
    /// Audio format of this chunk.
    pub format: AudioFormat,
}

impl AudioChunk {
    /// Create a new audio chunk.
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.format.duration_secs(self.data.len())
    }

    /// Encode the audio data as base64 for transport.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Decode a transport-encoded chunk. Binary-safe: round-trips every
    /// byte sequence exactly, including embedded zeros.
    pub fn from_base64(encoded: &str, format: AudioFormat) -> Result<Self> {
        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| LiveError::protocol(format!("base64 decode error: {}", e)))?;
        Ok(Self::new(data, format))
    }

    /// Create a chunk from i16 samples (PCM16 little-endian bytes).
    pub fn from_i16_samples(samples: &[i16], format: AudioFormat) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(data, format)
    }

    /// Convert the audio data to i16 samples.
    pub fn to_i16_samples(&self) -> Result<Vec<i16>> {
        if self.data.len() % 2 != 0 {
            return Err(LiveError::audio(format!(
                "invalid PCM16 length: {} (must be even)",
                self.data.len()
            )));
        }
        let mut samples = Vec::with_capacity(self.data.len() / 2);
        for chunk in self.data.chunks_exact(2) {
            samples.push(i16::from_le_bytes([chunk[0], chunk[1]]));
        }
        Ok(samples)
    }

    /// Create a chunk from floating-point samples in [-1, 1].
    ///
    /// Values outside the range are clamped, never rejected.
    pub fn from_f32_samples(samples: &[f32], format: AudioFormat) -> Self {
        let ints: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        Self::from_i16_samples(&ints, format)
    }

    /// Convert the audio data to floating-point samples in [-1, 1).
    pub fn to_f32_samples(&self) -> Result<Vec<f32>> {
        Ok(self.to_i16_samples()?.iter().map(|&s| i16_to_f32(s)).collect())
    }
}

/// Convert one float sample to PCM16, clamping to [-1, 1].
///
/// Positive values scale by 32767 and negative by 32768, matching the
/// asymmetric i16 range.
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 { (s * 32768.0) as i16 } else { (s * 32767.0) as i16 }
}

/// Convert one PCM16 sample back to a float in [-1, 1).
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Accumulates capture callbacks into fixed-size frames.
///
/// The input device delivers buffers at whatever cadence the driver
/// chooses; the session protocol wants uniform frames. Complete frames come
/// out in capture order; a trailing partial frame stays buffered until
/// `flush_remaining`.
#[derive(Debug, Clone)]
pub struct FrameChunker {
    buffer: Vec<f32>,
    frame_samples: usize,
}

impl FrameChunker {
    /// Create a chunker emitting frames of `frame_samples` samples.
    pub fn new(frame_samples: usize) -> Self {
        Self { buffer: Vec::with_capacity(frame_samples * 2), frame_samples }
    }

    /// Push captured samples and collect every complete frame.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_samples {
            let rest = self.buffer.split_off(self.frame_samples);
            frames.push(std::mem::replace(&mut self.buffer, rest));
        }
        frames
    }

    /// Flush any buffered partial frame.
    pub fn flush_remaining(&mut self) -> Option<Vec<f32>> {
        if self.buffer.is_empty() { None } else { Some(std::mem::take(&mut self.buffer)) }
    }
}
