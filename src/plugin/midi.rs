//! MIDI decoder plugin backed by the SoundFont synthesizer.

use super::{Decoder, DecoderError, FileTags, SoundParams, TagSelection};
use crate::audio::context::{EngineSettings, DEFAULT_SAMPLE_RATE};
use crate::audio::soundfont::is_soundfont;
use crate::config::{DecoderConfig, EnvOptions, OptionSource};
use crate::midi::Timeline;
use crate::service::SynthService;
use crate::session::{ErrorKind, PlaybackSession, SessionError};
use std::path::Path;
use std::sync::Arc;

/// File extensions of Standard MIDI Files and their common wrappers.
const MIDI_EXTENSIONS: &[&str] = &["mid", "midi", "kar", "rmi"];
/// File extension of SoundFont 2 banks.
const SOUNDFONT_EXTENSION: &str = "sf2";
const MIDI_MIME_TYPES: &[&str] = &["audio/midi", "audio/x-midi", "audio/sp-midi"];

/// Where the decoder reads its configuration from at init.
#[derive(Clone)]
enum ConfigSource {
    Options(Arc<dyn OptionSource>),
    Fixed(DecoderConfig),
}

/// Decodes MIDI files to PCM through pooled synthesizer contexts.
pub struct MidiDecoder {
    source: ConfigSource,
    search_system_soundfonts: bool,
    service: Option<Arc<SynthService>>,
}

/// An open MIDI file.
#[derive(Debug)]
pub struct MidiStream {
    session: Option<PlaybackSession>,
    /// Set when the decoder could not be initialized.
    init_error: Option<DecoderError>,
}

impl MidiStream {
    /// Returns the playback session, if the decoder was initialized.
    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }
}

impl From<&SessionError> for DecoderError {
    fn from(error: &SessionError) -> Self {
        match error.kind() {
            ErrorKind::SeekFailure => DecoderError::stream(error.to_string()),
            _ => DecoderError::fatal(error.to_string()),
        }
    }
}

impl MidiDecoder {
    /// Creates a decoder configured from a host option store.
    pub fn new(options: Arc<dyn OptionSource>) -> Self {
        Self {
            source: ConfigSource::Options(options),
            search_system_soundfonts: true,
            service: None,
        }
    }

    /// Creates a decoder configured from environment variables.
    pub fn standalone() -> Self {
        Self::new(Arc::new(EnvOptions))
    }

    /// Creates a decoder with a ready-made configuration.
    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            source: ConfigSource::Fixed(config),
            search_system_soundfonts: true,
            service: None,
        }
    }

    /// Skips the lookup of a system-wide default SoundFont at init.
    pub fn without_system_soundfonts(mut self) -> Self {
        self.search_system_soundfonts = false;
        self
    }

    /// Returns the shared synthesis state, once initialized.
    pub fn service(&self) -> Option<&Arc<SynthService>> {
        self.service.as_ref()
    }

    fn config(&self) -> Result<DecoderConfig, DecoderError> {
        match &self.source {
            ConfigSource::Options(options) => DecoderConfig::from_options(options.as_ref())
                .map_err(|e| DecoderError::fatal(format!("MIDI decoder: {}", e))),
            ConfigSource::Fixed(config) => Ok(config.clone()),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.service
            .as_ref()
            .map(|s| s.sample_rate())
            .unwrap_or(DEFAULT_SAMPLE_RATE)
    }
}

impl std::fmt::Debug for MidiDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiDecoder")
            .field("initialized", &self.service.is_some())
            .finish()
    }
}

impl Decoder for MidiDecoder {
    type Stream = MidiStream;

    fn init(&mut self) -> Result<(), DecoderError> {
        if self.service.is_some() {
            tracing::warn!("MIDI decoder initialized twice");
            return Ok(());
        }

        let config = self.config()?;
        let default_soundfont = if self.search_system_soundfonts {
            EngineSettings::default_soundfont()
        } else {
            None
        };
        let service = SynthService::with_default_soundfont(&config, default_soundfont)
            .map_err(|e| DecoderError::fatal(format!("MIDI decoder: {}", e)))?;

        // PCM goes into the host's buffers; nothing is played directly
        tracing::info!("MIDI decoder ready, no audio output device opened");
        self.service = Some(Arc::new(service));
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown();
            if Arc::strong_count(&service) > 1 {
                tracing::warn!("MIDI decoder destroyed with streams still open");
            }
        }
    }

    fn open(&self, path: &Path) -> MidiStream {
        match &self.service {
            Some(service) => MidiStream {
                session: Some(PlaybackSession::open(service, path)),
                init_error: None,
            },
            None => {
                tracing::error!("Open of {:?} before the MIDI decoder was initialized", path);
                MidiStream {
                    session: None,
                    init_error: Some(DecoderError::fatal(
                        "MIDI decoder: synthesizer not initialized",
                    )),
                }
            }
        }
    }

    fn close(&self, stream: MidiStream) {
        if let Some(session) = stream.session {
            session.close();
        }
    }

    fn decode(&self, stream: &mut MidiStream, buf: &mut [u8], params: &mut SoundParams) -> usize {
        match stream.session.as_mut() {
            Some(session) => {
                let decoded = session.decode(buf);
                *params = decoded.params;
                decoded.bytes
            }
            None => {
                *params = SoundParams::s16_stereo(self.sample_rate());
                0
            }
        }
    }

    fn seek(&self, stream: &mut MidiStream, seconds: i32) -> i32 {
        let (Some(session), Ok(seconds)) = (stream.session.as_mut(), u32::try_from(seconds)) else {
            return -1;
        };

        match session.seek(seconds) {
            Ok(Some(reached)) => i32::try_from(reached).unwrap_or(i32::MAX),
            Ok(None) => -1,
            Err(e) => {
                tracing::warn!("{}: {:?}", e, e);
                -1
            }
        }
    }

    fn info(&self, path: &Path, tags: &mut FileTags, selection: TagSelection) {
        let timeline = match Timeline::load(path) {
            Ok(timeline) => timeline,
            Err(e) => {
                tracing::debug!("No tags for {:?}: {}", path, e);
                return;
            }
        };

        if selection.contains(TagSelection::TIME) {
            tags.time = timeline.length_seconds() as i32;
            tags.filled |= TagSelection::TIME;
        }
        if selection.contains(TagSelection::COMMENTS) {
            if let Some(title) = timeline.sequence().title() {
                tags.title = Some(title.to_string());
                tags.filled |= TagSelection::COMMENTS;
            }
        }
    }

    fn duration(&self, stream: &MidiStream) -> i32 {
        stream
            .session
            .as_ref()
            .and_then(PlaybackSession::duration)
            .map(|d| i32::try_from(d).unwrap_or(i32::MAX))
            .unwrap_or(-1)
    }

    fn error(&self, stream: &MidiStream) -> DecoderError {
        if let Some(error) = &stream.init_error {
            return error.clone();
        }
        stream
            .session
            .as_ref()
            .and_then(PlaybackSession::error)
            .map(DecoderError::from)
            .unwrap_or_default()
    }

    fn our_format_ext(&self, ext: &str) -> bool {
        MIDI_EXTENSIONS
            .iter()
            .chain(std::iter::once(&SOUNDFONT_EXTENSION))
            .any(|known| known.eq_ignore_ascii_case(ext))
    }

    fn our_format_mime(&self, mime: &str) -> bool {
        let essence = mime.split(';').next().unwrap_or("").trim();
        MIDI_MIME_TYPES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(essence))
    }

    fn name(&self, path: &Path) -> &'static str {
        let sf2_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(SOUNDFONT_EXTENSION));
        if sf2_extension || is_soundfont(path) {
            "SF2"
        } else {
            "MID"
        }
    }
}

impl Drop for MidiDecoder {
    fn drop(&mut self) {
        self.destroy();
    }
}
