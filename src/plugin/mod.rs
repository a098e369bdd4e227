//! Host decoder ABI.
//!
//! A host player drives every decoder through the same lifecycle: `init`
//! once, then `open` / `decode`... / `close` per file, and `destroy` at exit.
//! Sentinels follow the host's conventions: `-1` means "unknown" or "failed"
//! for integer queries, and `0` bytes from `decode` means end of stream.

pub mod midi;

pub use crate::audio::{SampleFormat, SoundParams};
pub use midi::{MidiDecoder, MidiStream};

use std::ops::{BitOr, BitOrAssign};
use std::path::Path;
use thiserror::Error;

/// How bad a decoder error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorSeverity {
    /// No error.
    #[default]
    Ok,
    /// A recoverable problem in the stream; playback may continue.
    Stream,
    /// The file cannot be played.
    Fatal,
}

/// Error record the host copies out of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Error)]
#[error("{message}")]
pub struct DecoderError {
    pub severity: ErrorSeverity,
    pub code: i32,
    pub message: String,
}

impl DecoderError {
    /// An empty record meaning "no error".
    pub fn ok() -> Self {
        Self::default()
    }

    /// A fatal error with the given message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            severity: ErrorSeverity::Fatal,
            code: 0,
            message: message.into(),
        }
    }

    /// A recoverable stream error with the given message.
    pub fn stream(message: impl Into<String>) -> Self {
        Self {
            severity: ErrorSeverity::Stream,
            code: 0,
            message: message.into(),
        }
    }

    /// Returns true if this record carries no error.
    pub fn is_ok(&self) -> bool {
        self.severity == ErrorSeverity::Ok
    }
}

/// Set of tags requested from or filled by `Decoder::info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagSelection(u8);

impl TagSelection {
    pub const NONE: Self = Self(0);
    /// Track length in seconds.
    pub const TIME: Self = Self(0b01);
    /// Title and other textual tags.
    pub const COMMENTS: Self = Self(0b10);
    pub const ALL: Self = Self(0b11);

    /// Returns true if every tag in `other` is selected.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TagSelection {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TagSelection {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Tags read from a file without opening it for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTags {
    /// Length in whole seconds, -1 if unknown.
    pub time: i32,
    pub title: Option<String>,
    /// Which of the fields above hold real values.
    pub filled: TagSelection,
}

impl Default for FileTags {
    fn default() -> Self {
        Self {
            time: -1,
            title: None,
            filled: TagSelection::NONE,
        }
    }
}

/// Entry points a host player calls on a decoder plugin.
pub trait Decoder {
    /// Per-file decoding state returned by `open`.
    type Stream;

    /// Sets up process-wide state. Called once before any other call.
    fn init(&mut self) -> Result<(), DecoderError>;

    /// Releases process-wide state. No stream may be open.
    fn destroy(&mut self);

    /// Opens a file. Always returns a stream; check `error` for failures.
    fn open(&self, path: &Path) -> Self::Stream;

    /// Closes a stream and releases everything it holds.
    fn close(&self, stream: Self::Stream);

    /// Fills `buf` with PCM and reports its layout in `params`.
    ///
    /// Returns the number of bytes written; 0 means end of stream. `buf` must
    /// hold at least one whole frame.
    fn decode(&self, stream: &mut Self::Stream, buf: &mut [u8], params: &mut SoundParams) -> usize;

    /// Seeks to `seconds` and returns the position reached, or -1 on failure.
    fn seek(&self, stream: &mut Self::Stream, seconds: i32) -> i32;

    /// Reads the tags selected by `selection` from a file into `tags`.
    fn info(&self, path: &Path, tags: &mut FileTags, selection: TagSelection);

    /// Returns the current bitrate in kbps, or -1 if unknown.
    fn bitrate(&self, _stream: &Self::Stream) -> i32 {
        -1
    }

    /// Returns the stream length in seconds, or -1 if unknown.
    fn duration(&self, stream: &Self::Stream) -> i32;

    /// Returns a copy of the stream's error record.
    fn error(&self, stream: &Self::Stream) -> DecoderError;

    /// Returns true if files with extension `ext` are handled by this decoder.
    fn our_format_ext(&self, ext: &str) -> bool;

    /// Returns true if streams of MIME type `mime` are handled by this decoder.
    fn our_format_mime(&self, mime: &str) -> bool;

    /// Returns the short format name shown by the host for `path`.
    fn name(&self, path: &Path) -> &'static str;
}
