//! Property tests for sample conversion and playback scheduling.

use oracle_live::audio::{AudioChunk, AudioFormat};
use oracle_live::playback::PlaybackCursor;
use proptest::prelude::*;

/// One PCM16 quantization step.
const QUANT_STEP: f64 = 1.0 / 32768.0;

proptest! {
    /// For all float sample arrays in [-1, 1], converting to PCM16 and
    /// back stays within one quantization step of the original.
    #[test]
    fn prop_f32_i16_roundtrip_within_one_step(
        samples in proptest::collection::vec(-1.0f32..=1.0f32, 0..512),
    ) {
        let chunk = AudioChunk::from_f32_samples(&samples, AudioFormat::pcm16_16khz());
        let recovered = chunk.to_f32_samples().unwrap();
        prop_assert_eq!(samples.len(), recovered.len());
        for (orig, rec) in samples.iter().zip(&recovered) {
            let diff = (*orig as f64 - *rec as f64).abs();
            prop_assert!(
                diff <= QUANT_STEP + 1e-9,
                "sample {} reconstructed as {} (diff {})",
                orig, rec, diff
            );
        }
    }

    /// Out-of-range input clamps instead of erroring, and reconstructs to
    /// the clamped value.
    #[test]
    fn prop_out_of_range_clamps(sample in -10.0f32..=10.0f32) {
        let chunk = AudioChunk::from_f32_samples(&[sample], AudioFormat::pcm16_16khz());
        let recovered = chunk.to_f32_samples().unwrap()[0];
        let clamped = sample.clamp(-1.0, 1.0);
        prop_assert!((clamped as f64 - recovered as f64).abs() <= QUANT_STEP + 1e-9);
    }

    /// The transport encoding round-trips every byte buffer exactly,
    /// embedded zeros included.
    #[test]
    fn prop_base64_roundtrip_exact(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let chunk = AudioChunk::new(data.clone(), AudioFormat::pcm16_24khz());
        let decoded =
            AudioChunk::from_base64(&chunk.to_base64(), AudioFormat::pcm16_24khz()).unwrap();
        prop_assert_eq!(decoded.data, data);
    }

    /// For chunks arriving at arbitrary real-time intervals, scheduled
    /// start times never decrease, never overlap the previous chunk, and
    /// never sit on stale time when the scheduler was idle.
    #[test]
    fn prop_schedule_gapless_no_overlap(
        arrivals in proptest::collection::vec((0.0f64..0.5, 0.001f64..0.5), 1..64),
    ) {
        let mut cursor = PlaybackCursor::new();
        let mut now = 0.0;
        let mut prev_start = f64::NEG_INFINITY;
        let mut prev_end = 0.0;
        for (delta, duration) in arrivals {
            now += delta;
            let start = cursor.schedule(now, duration);
            // Non-decreasing, no overlap with the previous chunk.
            prop_assert!(start >= prev_start);
            prop_assert!(start + 1e-12 >= prev_end);
            // No unnecessary silence: backlogged chunks butt up exactly,
            // and an idle scheduler starts at the current clock.
            prop_assert!((start - now.max(prev_end)).abs() < 1e-12);
            prev_start = start;
            prev_end = start + duration;
        }
    }
}

#[test]
fn test_base64_roundtrip_all_zero_buffer() {
    let data = vec![0u8; 4096];
    let chunk = AudioChunk::new(data.clone(), AudioFormat::pcm16_24khz());
    let decoded = AudioChunk::from_base64(&chunk.to_base64(), AudioFormat::pcm16_24khz()).unwrap();
    assert_eq!(decoded.data, data);
}
