//! Standard MIDI File (SMF) parsing into a time-stamped event list.
//!
//! All tracks are merged into one list sorted by absolute tick, and every
//! event is stamped with its time in seconds according to the file's tempo
//! map. Supports SMF Format 0, 1 and 2 files, with metrical or SMPTE timing.

use super::{tempo_to_bpm, ticks_to_seconds, MidiError, DEFAULT_TEMPO_USEC};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;

/// What happens at a timeline position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    /// A channel voice message destined for the synthesizer.
    Channel { channel: u8, message: MidiMessage },
    /// Tempo change, in microseconds per beat.
    Tempo(u32),
    /// Any other meta or system exclusive event.
    Other,
    /// End of the file: the latest end-of-track marker over all tracks.
    /// Always the last event; nothing is sent to the synthesizer.
    End,
}

/// A single event with its absolute position in ticks and seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    /// Absolute position in ticks from the start of the file.
    pub tick: u64,
    /// Absolute position in seconds from the start of the file.
    pub seconds: f64,
    /// The event payload.
    pub kind: EventKind,
}

/// A fully parsed MIDI file.
#[derive(Debug, Clone)]
pub struct MidiSequence {
    events: Vec<TimedEvent>,
    title: Option<String>,
}

/// Tick resolution of a file.
#[derive(Debug, Clone, Copy)]
enum Resolution {
    /// Ticks per quarter note; tempo events apply.
    Metrical(u16),
    /// Fixed seconds per tick; tempo events are ignored.
    Timecode(f64),
}

impl MidiSequence {
    /// Loads and parses a MIDI file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a valid SMF.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MidiError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| MidiError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let smf = Smf::parse(&data).map_err(|e| MidiError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let sequence = Self::from_smf(&smf);
        tracing::debug!(
            "Loaded {:?}: {} events, {:.2}s, initial tempo {:.1} BPM",
            path,
            sequence.events.len(),
            sequence.length_seconds(),
            tempo_to_bpm(sequence.initial_tempo()),
        );
        Ok(sequence)
    }

    /// Builds a sequence from an already parsed SMF.
    pub fn from_smf(smf: &Smf) -> Self {
        let resolution = match smf.header.timing {
            Timing::Metrical(tpb) => Resolution::Metrical(tpb.as_int()),
            Timing::Timecode(fps, subframes) => {
                let ticks_per_second = fps.as_f32() as f64 * subframes as f64;
                if ticks_per_second > 0.0 {
                    Resolution::Timecode(1.0 / ticks_per_second)
                } else {
                    Resolution::Timecode(0.0)
                }
            }
        };

        // Format 2 tracks are independent patterns played one after another
        let sequential = smf.header.format == Format::Sequential;

        let mut title = None;
        let mut merged: Vec<(u64, EventKind)> = Vec::new();
        let mut track_offset: u64 = 0;
        let mut end_tick: Option<u64> = None;

        for track in &smf.tracks {
            let mut current_tick = track_offset;

            for event in track {
                current_tick += event.delta.as_int() as u64;

                let kind = match event.kind {
                    TrackEventKind::Midi { channel, message } => EventKind::Channel {
                        channel: channel.as_int(),
                        message,
                    },
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                        EventKind::Tempo(tempo.as_int())
                    }
                    // Trailing rests count towards the length, the marker itself is merged below
                    TrackEventKind::Meta(MetaMessage::EndOfTrack) => {
                        end_tick = end_tick.max(Some(current_tick));
                        continue;
                    }
                    TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                        if title.is_none() {
                            title = std::str::from_utf8(name)
                                .ok()
                                .map(|s| s.trim().to_string())
                                .filter(|s| !s.is_empty());
                        }
                        EventKind::Other
                    }
                    _ => EventKind::Other,
                };
                merged.push((current_tick, kind));
                end_tick = end_tick.max(Some(current_tick));
            }

            if sequential {
                track_offset = current_tick;
            }
        }

        // Stable sort keeps track order for events sharing a tick
        merged.sort_by_key(|(tick, _)| *tick);
        if let Some(end_tick) = end_tick {
            merged.push((end_tick, EventKind::End));
        }

        Self {
            events: stamp_seconds(merged, resolution),
            title,
        }
    }

    /// Returns all events in playback order.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the file contains no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the length in seconds, up to the latest end-of-track marker.
    pub fn length_seconds(&self) -> f64 {
        self.events.last().map(|e| e.seconds).unwrap_or(0.0)
    }

    /// Returns the first track name found in the file, if any.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Returns the tempo in effect at the start of the file.
    pub fn initial_tempo(&self) -> u32 {
        self.events
            .iter()
            .take_while(|e| e.tick == 0)
            .find_map(|e| match e.kind {
                EventKind::Tempo(t) => Some(t),
                _ => None,
            })
            .unwrap_or(DEFAULT_TEMPO_USEC)
    }
}

/// Walks the merged event list, applying tempo changes, to compute absolute times.
fn stamp_seconds(merged: Vec<(u64, EventKind)>, resolution: Resolution) -> Vec<TimedEvent> {
    let mut events = Vec::with_capacity(merged.len());
    let mut tempo = DEFAULT_TEMPO_USEC;
    let mut last_tick: u64 = 0;
    let mut last_seconds = 0.0;

    for (tick, kind) in merged {
        let seconds = match resolution {
            Resolution::Metrical(tpb) => {
                last_seconds + ticks_to_seconds(tick - last_tick, tempo, tpb)
            }
            Resolution::Timecode(seconds_per_tick) => tick as f64 * seconds_per_tick,
        };

        // A tempo change takes effect for the ticks after it
        if let EventKind::Tempo(t) = kind {
            if t > 0 {
                tempo = t;
            }
        }

        last_tick = tick;
        last_seconds = seconds;
        events.push(TimedEvent {
            tick,
            seconds,
            kind,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::fixtures::{self, FixtureNote};
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Header, TrackEvent};

    fn note_on(delta: u32, key: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(100),
                },
            },
        }
    }

    fn end_of_track(delta: u32) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        }
    }

    #[test]
    fn test_load_applies_tempo_map() {
        let dir = tempfile::tempdir().unwrap();
        // 480 ticks per beat, 120 BPM: one beat every 0.5s
        let path = fixtures::write_smf(
            dir.path(),
            "tempo.mid",
            &[
                FixtureNote::new(0, 480, 60),
                FixtureNote::new(960, 480, 64),
            ],
        );

        let sequence = MidiSequence::load(&path).unwrap();
        assert!(!sequence.is_empty());
        assert_eq!(sequence.title(), Some("Fixture"));
        assert_eq!(sequence.initial_tempo(), DEFAULT_TEMPO_USEC);

        // The last note-off lands at tick 1440 = 3 beats = 1.5s
        assert!((sequence.length_seconds() - 1.5).abs() < 1e-9);
        let last = sequence.events().last().unwrap();
        assert_eq!(last.tick, 1440);
    }

    #[test]
    fn test_tempo_change_mid_file() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(100)),
        ));
        smf.tracks.push(vec![
            note_on(0, 60),
            // After one beat at 120 BPM, switch to 60 BPM
            TrackEvent {
                delta: u28::new(100),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000))),
            },
            note_on(100, 62),
            end_of_track(0),
        ]);

        let sequence = MidiSequence::from_smf(&smf);
        let times: Vec<f64> = sequence.events().iter().map(|e| e.seconds).collect();
        assert_eq!(times.len(), 4);
        assert!((times[0] - 0.0).abs() < 1e-9);
        assert!((times[1] - 0.5).abs() < 1e-9);
        assert!((times[2] - 1.5).abs() < 1e-9);
        assert!((times[3] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_parallel_tracks_are_merged_by_tick() {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks.push(vec![note_on(0, 60), note_on(960, 61), end_of_track(0)]);
        smf.tracks.push(vec![note_on(480, 70), end_of_track(0)]);

        let sequence = MidiSequence::from_smf(&smf);
        let ticks: Vec<u64> = sequence.events().iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 480, 960, 960]);
        assert_eq!(sequence.events().last().unwrap().kind, EventKind::End);
    }

    #[test]
    fn test_sequential_tracks_are_laid_end_to_end() {
        let mut smf = Smf::new(Header::new(
            Format::Sequential,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks.push(vec![note_on(0, 60), end_of_track(480)]);
        smf.tracks.push(vec![note_on(0, 62), end_of_track(480)]);

        let sequence = MidiSequence::from_smf(&smf);
        let ticks: Vec<u64> = sequence.events().iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 480, 960]);
    }

    #[test]
    fn test_trailing_rest_counts_towards_length() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks.push(vec![
            note_on(0, 60),
            TrackEvent {
                delta: u28::new(480),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOff {
                        key: u7::new(60),
                        vel: u7::new(0),
                    },
                },
            },
            // Four beats of silence before the end marker
            end_of_track(1920),
        ]);

        let sequence = MidiSequence::from_smf(&smf);
        assert!((sequence.length_seconds() - 2.5).abs() < 1e-9);
        let end = sequence.events().last().unwrap();
        assert_eq!(end.tick, 2400);
        assert_eq!(end.kind, EventKind::End);
    }

    #[test]
    fn test_tracks_without_events_have_no_end() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks.push(Vec::new());

        let sequence = MidiSequence::from_smf(&smf);
        assert!(sequence.is_empty());
        assert_eq!(sequence.length_seconds(), 0.0);
    }

    #[test]
    fn test_timecode_timing() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Timecode(midly::Fps::Fps25, 40),
        ));
        // 25 fps * 40 subframes = 1000 ticks per second
        smf.tracks
            .push(vec![note_on(0, 60), note_on(2000, 62), end_of_track(0)]);

        let sequence = MidiSequence::from_smf(&smf);
        assert!((sequence.length_seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.mid");
        std::fs::write(&path, b"definitely not a midi file").unwrap();

        assert!(matches!(
            MidiSequence::load(&path),
            Err(MidiError::Parse { .. })
        ));
        assert!(matches!(
            MidiSequence::load(dir.path().join("missing.mid")),
            Err(MidiError::Io { .. })
        ));
    }
}
