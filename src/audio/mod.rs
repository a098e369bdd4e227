//! Audio engine for MIDI synthesis.
//!
//! This module provides SoundFont synthesis using rustysynth. It supports:
//! - Recyclable synthesizer contexts (`context`)
//! - A single-slot pool that keeps one idle context between tracks (`pool`)
//!   and tears it down after a grace period (`reclaim`)
//! - Reconciling a recycled context's SoundFont with the desired one (`soundfont`)
//! - Sample-accurate MIDI file playback through a context (`player`)
//! - WAV export of a decoded stream (`export`)

pub mod context;
pub mod export;
pub mod player;
pub mod pool;
pub mod reclaim;
pub mod soundfont;

pub use context::{EngineSettings, SynthContext, SynthError};
pub use player::{MidiPlayer, PlayerError, PlayerStatus};
pub use pool::{Donation, PoolStats, SynthPool};
pub use reclaim::ReclaimState;
pub use soundfont::{is_soundfont, FontSlots, SoundfontManager};

/// Bytes in one interleaved stereo frame of signed 16-bit samples.
pub const BYTES_PER_FRAME: usize = 4;

/// PCM sample encoding of decoded audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit, little-endian.
    S16Le,
}

/// Layout of the PCM a decoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundParams {
    pub channels: u16,
    pub rate: u32,
    pub format: SampleFormat,
}

impl SoundParams {
    /// Interleaved stereo, signed 16-bit little-endian at `rate` Hz.
    pub fn s16_stereo(rate: u32) -> Self {
        Self {
            channels: 2,
            rate,
            format: SampleFormat::S16Le,
        }
    }
}

/// Converts an f32 sample (-1.0 to 1.0) to i16.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Interleaves planar stereo samples into signed 16-bit little-endian bytes.
///
/// Writes `min(left.len(), right.len(), out.len() / 4)` frames and returns the
/// number of bytes written.
pub fn interleave_s16_le(left: &[f32], right: &[f32], out: &mut [u8]) -> usize {
    let frames = left.len().min(right.len()).min(out.len() / BYTES_PER_FRAME);

    for (i, frame) in out
        .chunks_exact_mut(BYTES_PER_FRAME)
        .take(frames)
        .enumerate()
    {
        frame[0..2].copy_from_slice(&sample_to_i16(left[i]).to_le_bytes());
        frame[2..4].copy_from_slice(&sample_to_i16(right[i]).to_le_bytes());
    }

    frames * BYTES_PER_FRAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16_clamps() {
        assert_eq!(sample_to_i16(0.0), 0);
        assert_eq!(sample_to_i16(1.0), 32767);
        assert_eq!(sample_to_i16(2.0), 32767);
        assert_eq!(sample_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_interleave_writes_whole_frames() {
        let left = [1.0f32, -1.0, 0.5];
        let right = [0.0f32, 0.25, -0.5];
        // Room for two frames and a stray byte
        let mut out = [0xAAu8; 9];

        let written = interleave_s16_le(&left, &right, &mut out);
        assert_eq!(written, 8);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 32767);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), 0);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), -32767);
        assert_eq!(i16::from_le_bytes([out[6], out[7]]), 8191);
        assert_eq!(out[8], 0xAA);
    }
}
