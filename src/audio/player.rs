//! MIDI file playback through a synthesizer context.
//!
//! The player owns the parsed files and a playback position; the context it
//! renders through is borrowed for each call, so the same context can be
//! handed back to the pool once the player is gone.

use super::context::SynthContext;
use crate::midi::{EventKind, MidiError, MidiSequence, TimedEvent};
use midly::MidiMessage;
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;

/// Represents the current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Files queued, playback not started.
    Ready,
    /// Events remain to be dispatched.
    Playing,
    /// Every queued file has been played to its last event.
    Done,
}

/// Errors raised while starting or moving playback.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no playable MIDI events queued")]
    NothingToPlay,
    #[error("player has not been started")]
    NotStarted,
}

/// Plays queued MIDI files one after another.
#[derive(Debug)]
pub struct MidiPlayer {
    sample_rate: u32,
    queue: VecDeque<MidiSequence>,
    current: Option<MidiSequence>,
    /// Index of the next event of `current` to dispatch.
    next_event: usize,
    /// Frames rendered since the start of `current`.
    frame: u64,
    status: PlayerStatus,
}

impl MidiPlayer {
    /// Creates an idle player rendering at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            queue: VecDeque::new(),
            current: None,
            next_event: 0,
            frame: 0,
            status: PlayerStatus::Ready,
        }
    }

    /// Loads a MIDI file and appends it to the play queue.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), MidiError> {
        self.add_sequence(MidiSequence::load(path)?);
        Ok(())
    }

    /// Appends an already parsed sequence to the play queue.
    pub fn add_sequence(&mut self, sequence: MidiSequence) {
        self.queue.push_back(sequence);
    }

    /// Starts playback of the first queued file that has events.
    ///
    /// Does nothing if playback is already running.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        if self.status == PlayerStatus::Playing {
            return Ok(());
        }

        while let Some(sequence) = self.queue.pop_front() {
            if sequence.is_empty() {
                continue;
            }
            self.current = Some(sequence);
            self.next_event = 0;
            self.frame = 0;
            self.status = PlayerStatus::Playing;
            return Ok(());
        }
        Err(PlayerError::NothingToPlay)
    }

    /// Returns the current playback state.
    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    /// Returns the playback position within the current file, in seconds.
    pub fn position_seconds(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    /// Moves playback to the first event at or after `tick` in the current file.
    ///
    /// Sounding voices are stopped and channel state (programs, controllers,
    /// pitch bend, pressure) is replayed up to the target so the track
    /// continues with the right instruments.
    pub fn seek(&mut self, context: &mut SynthContext, tick: u64) -> Result<(), PlayerError> {
        let sequence = self.current.as_ref().ok_or(PlayerError::NotStarted)?;
        let events = sequence.events();
        let index = events.partition_point(|e| e.tick < tick);

        context.all_sounds_off();
        for event in &events[..index] {
            if let EventKind::Channel { channel, message } = event.kind {
                if is_channel_state(&message) {
                    send(context, channel, message);
                }
            }
        }

        self.next_event = index;
        self.frame = events
            .get(index)
            .or(events.last())
            .map(|e| event_frame(e, self.sample_rate))
            .unwrap_or(0);
        self.status = PlayerStatus::Playing;
        tracing::debug!(
            "Player seeked to tick {} ({:.2}s)",
            tick,
            self.position_seconds()
        );
        Ok(())
    }

    /// Renders planar stereo frames, dispatching events at their exact frame.
    ///
    /// Once playback is done the context keeps rendering, so releasing notes
    /// fade out naturally.
    pub fn render(&mut self, context: &mut SynthContext, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let mut offset = 0;

        while offset < frames {
            if self.status == PlayerStatus::Playing {
                self.dispatch_due(context);
            }

            let remaining = frames - offset;
            let chunk = match self.next_event_frame() {
                Some(at) if self.status == PlayerStatus::Playing => {
                    ((at - self.frame) as usize).clamp(1, remaining)
                }
                _ => remaining,
            };

            context.render(
                &mut left[offset..offset + chunk],
                &mut right[offset..offset + chunk],
            );
            offset += chunk;
            self.frame += chunk as u64;
        }
    }

    fn next_event_frame(&self) -> Option<u64> {
        let sequence = self.current.as_ref()?;
        sequence
            .events()
            .get(self.next_event)
            .map(|e| event_frame(e, self.sample_rate))
    }

    /// Sends every event due at the current frame, moving on to the next
    /// queued file when the current one runs out.
    fn dispatch_due(&mut self, context: &mut SynthContext) {
        loop {
            let Some(sequence) = self.current.as_ref() else {
                self.status = PlayerStatus::Done;
                return;
            };

            while let Some(event) = sequence.events().get(self.next_event) {
                if event_frame(event, self.sample_rate) > self.frame {
                    return;
                }
                if let EventKind::Channel { channel, message } = event.kind {
                    send(context, channel, message);
                }
                self.next_event += 1;
            }

            match self.queue.pop_front() {
                Some(next) => {
                    self.current = Some(next);
                    self.next_event = 0;
                    self.frame = 0;
                }
                None => {
                    self.status = PlayerStatus::Done;
                    return;
                }
            }
        }
    }
}

fn event_frame(event: &TimedEvent, sample_rate: u32) -> u64 {
    (event.seconds * sample_rate as f64).round() as u64
}

/// Messages that set lasting channel state, as opposed to sounding notes.
fn is_channel_state(message: &MidiMessage) -> bool {
    matches!(
        message,
        MidiMessage::Controller { .. }
            | MidiMessage::ProgramChange { .. }
            | MidiMessage::PitchBend { .. }
            | MidiMessage::ChannelAftertouch { .. }
    )
}

/// Forwards a channel message to the synthesizer.
fn send(context: &mut SynthContext, channel: u8, message: MidiMessage) {
    let (command, data1, data2) = midi_bytes(message);
    context.process_midi_message(channel as i32, command, data1, data2);
}

/// Splits a channel message into status command and data bytes.
fn midi_bytes(message: MidiMessage) -> (i32, i32, i32) {
    match message {
        MidiMessage::NoteOff { key, vel } => (0x80, key.as_int() as i32, vel.as_int() as i32),
        MidiMessage::NoteOn { key, vel } => (0x90, key.as_int() as i32, vel.as_int() as i32),
        MidiMessage::Aftertouch { key, vel } => (0xA0, key.as_int() as i32, vel.as_int() as i32),
        MidiMessage::Controller { controller, value } => {
            (0xB0, controller.as_int() as i32, value.as_int() as i32)
        }
        MidiMessage::ProgramChange { program } => (0xC0, program.as_int() as i32, 0),
        MidiMessage::ChannelAftertouch { vel } => (0xD0, vel.as_int() as i32, 0),
        MidiMessage::PitchBend { bend } => {
            let value = bend.0.as_int() as i32;
            (0xE0, value & 0x7F, value >> 7)
        }
    }
}
