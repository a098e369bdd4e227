//! MIDI files written on the fly for tests.

use super::DEFAULT_TEMPO_USEC;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::{Path, PathBuf};

/// Resolution used by every fixture file.
pub const FIXTURE_TPB: u16 = 480;

/// A note to write into a fixture file.
#[derive(Debug, Clone, Copy)]
pub struct FixtureNote {
    pub start_tick: u32,
    pub duration: u32,
    pub key: u8,
}

impl FixtureNote {
    pub fn new(start_tick: u32, duration: u32, key: u8) -> Self {
        Self {
            start_tick,
            duration,
            key,
        }
    }
}

/// Writes a format 0 file at 120 BPM with a program change and the given notes.
pub fn write_smf(dir: &Path, name: &str, notes: &[FixtureNote]) -> PathBuf {
    write_smf_with_rest(dir, name, notes, 0)
}

/// Like `write_smf`, with `rest_ticks` of silence before the end-of-track marker.
pub fn write_smf_with_rest(
    dir: &Path,
    name: &str,
    notes: &[FixtureNote],
    rest_ticks: u32,
) -> PathBuf {
    // (tick, order, kind); note-offs sort before note-ons on the same tick
    let mut timed: Vec<(u32, u8, TrackEventKind<'static>)> = Vec::new();
    timed.push((
        0,
        0,
        TrackEventKind::Meta(MetaMessage::TrackName(b"Fixture")),
    ));
    timed.push((
        0,
        0,
        TrackEventKind::Meta(MetaMessage::Tempo(u24::new(DEFAULT_TEMPO_USEC))),
    ));
    timed.push((
        0,
        0,
        TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::ProgramChange {
                program: u7::new(5),
            },
        },
    ));

    for note in notes {
        timed.push((
            note.start_tick,
            2,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(note.key),
                    vel: u7::new(100),
                },
            },
        ));
        timed.push((
            note.start_tick + note.duration,
            1,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(note.key),
                    vel: u7::new(0),
                },
            },
        ));
    }
    timed.sort_by_key(|(tick, order, _)| (*tick, *order));

    let mut track = Vec::with_capacity(timed.len() + 1);
    let mut last_tick = 0;
    for (tick, _, kind) in timed {
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind,
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(rest_ticks),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(FIXTURE_TPB)),
    ));
    smf.tracks.push(track);

    let path = dir.join(name);
    smf.save(&path).expect("failed to write fixture MIDI file");
    path
}

/// Writes a file whose header marks it as a SoundFont 2 bank.
///
/// Only the RIFF header is real; the content is not a loadable bank.
pub fn write_soundfont_stub(dir: &Path, name: &str) -> PathBuf {
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(b"sfbk");
    let path = dir.join(name);
    std::fs::write(&path, data).expect("failed to write fixture soundfont");
    path
}
