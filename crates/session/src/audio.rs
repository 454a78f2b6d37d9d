//! PCM16 helpers for audio frames carried on the socket transport.
//!
//! Frames travel as little-endian signed 16-bit mono samples; the rest of the
//! crate works with normalized `f32` samples.

pub const SOCKET_AUDIO_SAMPLE_RATE: u32 = 24_000;

/// Converts f32 samples to PCM16 little-endian bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Converts PCM16 little-endian bytes to f32 samples in `[-1.0, 1.0]`.
///
/// A trailing odd byte is dropped.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}
