//! Standard MIDI File loading and time lookup.
//!
//! This module turns a `.mid` file into a flat, time-stamped event list
//! (`MidiSequence`) and offers a position-tracking cursor over it
//! (`Timeline`) that is used for duration queries and seeking.

mod sequence;
mod timeline;

#[cfg(test)]
pub(crate) mod fixtures;

pub use sequence::{EventKind, MidiSequence, TimedEvent};
pub use timeline::Timeline;

use std::path::PathBuf;
use thiserror::Error;

/// Default tempo of a Standard MIDI File: 120 BPM, in microseconds per beat.
pub const DEFAULT_TEMPO_USEC: u32 = 500_000;

/// Errors that can occur while loading or navigating a MIDI file.
#[derive(Debug, Error)]
pub enum MidiError {
    /// File could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// MIDI parsing failed.
    #[error("MIDI parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },
    /// Seek target is negative or not a number.
    #[error("invalid seek target: {0} seconds")]
    InvalidSeek(f64),
    /// No event lies at or after the seek target.
    #[error("cannot seek to {target:.3}s, song is {length:.3}s long")]
    SeekPastEnd { target: f64, length: f64 },
}

/// Converts a tick delta to seconds at the given tempo.
///
/// # Arguments
///
/// * `ticks` - Number of ticks
/// * `usec_per_beat` - Tempo in microseconds per quarter note
/// * `ticks_per_beat` - File resolution from the SMF header
pub fn ticks_to_seconds(ticks: u64, usec_per_beat: u32, ticks_per_beat: u16) -> f64 {
    if ticks_per_beat == 0 {
        return 0.0;
    }
    let beats = ticks as f64 / ticks_per_beat as f64;
    beats * usec_per_beat as f64 / 1_000_000.0
}

/// Converts a microseconds-per-beat tempo to beats per minute.
pub fn tempo_to_bpm(usec_per_beat: u32) -> f64 {
    if usec_per_beat == 0 {
        return 0.0;
    }
    60_000_000.0 / usec_per_beat as f64
}
