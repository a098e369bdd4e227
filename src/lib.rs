//! midisynth - A SoundFont-based MIDI decoder.
//!
//! This library turns MIDI files into PCM for a host player. Synthesizer
//! contexts are expensive to build, so one idle context is kept between
//! tracks and torn down only after a grace period without use.

pub mod audio;
pub mod config;
pub mod midi;
pub mod plugin;
pub mod service;
pub mod session;

// Re-export commonly used types
pub use audio::{export::export_to_wav, Donation, PoolStats, ReclaimState, SynthContext, SynthPool};
pub use config::{DecoderConfig, EnvOptions, OptionSource, StaticOptions};
pub use midi::{MidiSequence, Timeline};
pub use plugin::{Decoder, DecoderError, FileTags, MidiDecoder, SoundParams, TagSelection};
pub use service::SynthService;
pub use session::{PlaybackSession, SessionError, SessionState};
