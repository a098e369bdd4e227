//! Position-tracking cursor over a MIDI file's events.

use super::{MidiError, MidiSequence, TimedEvent};
use std::path::Path;

/// A cursor over a MIDI file's time index.
///
/// Opened independently of any synthesizer; used for seeking and for
/// duration/tag queries.
#[derive(Debug, Clone)]
pub struct Timeline {
    sequence: MidiSequence,
    /// Index of the next event to be returned.
    cursor: usize,
}

impl Timeline {
    /// Loads a MIDI file and positions the cursor at its first event.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MidiError> {
        Ok(Self::from_sequence(MidiSequence::load(path)?))
    }

    /// Wraps an already parsed sequence.
    pub fn from_sequence(sequence: MidiSequence) -> Self {
        Self {
            sequence,
            cursor: 0,
        }
    }

    /// Returns the time of the last event, in seconds.
    pub fn length_seconds(&self) -> f64 {
        self.sequence.length_seconds()
    }

    /// Returns the underlying sequence.
    pub fn sequence(&self) -> &MidiSequence {
        &self.sequence
    }

    /// Moves the cursor back to the first event.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Moves the cursor so that the next event is the first one at or after `seconds`.
    ///
    /// # Errors
    ///
    /// Fails if `seconds` is negative or not finite, or if no event lies at or
    /// after it. The cursor is left untouched on failure.
    pub fn seek_to_seconds(&mut self, seconds: f64) -> Result<(), MidiError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(MidiError::InvalidSeek(seconds));
        }

        let events = self.sequence.events();
        let index = events.partition_point(|e| e.seconds < seconds);
        if index >= events.len() {
            return Err(MidiError::SeekPastEnd {
                target: seconds,
                length: self.length_seconds(),
            });
        }

        self.cursor = index;
        Ok(())
    }

    /// Returns the next event without advancing.
    pub fn peek_next_event(&self) -> Option<&TimedEvent> {
        self.sequence.events().get(self.cursor)
    }

    /// Returns the next event and advances past it.
    pub fn next_event(&mut self) -> Option<&TimedEvent> {
        let event = self.sequence.events().get(self.cursor)?;
        self.cursor += 1;
        Some(event)
    }
}
