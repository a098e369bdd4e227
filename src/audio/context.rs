//! Synthesizer contexts: the expensive, recyclable rendering engine.
//!
//! A `SynthContext` owns a rustysynth `Synthesizer` together with the
//! SoundFonts it was built from. Contexts are created once, lent to a
//! playback session, reset, and handed back to the pool for the next track.

use super::soundfont::FontSlots;
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Sample rate for synthesis when none is configured (44.1 kHz standard).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default maximum number of simultaneous voices.
pub const DEFAULT_POLYPHONY: usize = 64;

/// Places searched for a system soundfont when none is configured.
const DEFAULT_SOUNDFONT_PATHS: &[&str] = &[
    "/usr/share/sounds/sf2/default-GM.sf2",
    "/usr/share/soundfonts/default.sf2",
    "/usr/share/sounds/sf2/FluidR3_GM.sf2",
    "/usr/share/soundfonts/FluidR3_GM.sf2",
    "/usr/share/sounds/sf2/TimGM6mb.sf2",
];

/// Errors raised by the synthesis engine.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("sample rate {0} Hz is outside the supported range (16000-192000)")]
    SampleRate(u32),
    #[error("polyphony {0} is outside the supported range (8-256)")]
    Polyphony(usize),
    #[error("cannot open soundfont {path}: {source}")]
    SoundfontIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid soundfont {path}: {message}")]
    SoundfontParse { path: PathBuf, message: String },
    #[error("failed to create synthesizer: {0}")]
    Synthesizer(String),
}

/// Process-wide engine settings every context is created from.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum number of simultaneous voices.
    pub polyphony: usize,
    /// Whether the reverb and chorus effects are rendered.
    pub reverb_and_chorus: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl EngineSettings {
    /// Creates settings for the given sample rate with default voice settings.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            polyphony: DEFAULT_POLYPHONY,
            reverb_and_chorus: true,
        }
    }

    /// Checks the settings against what the synthesizer accepts.
    pub fn validate(&self) -> Result<(), SynthError> {
        if !(16_000..=192_000).contains(&self.sample_rate) {
            return Err(SynthError::SampleRate(self.sample_rate));
        }
        if !(8..=256).contains(&self.polyphony) {
            return Err(SynthError::Polyphony(self.polyphony));
        }
        Ok(())
    }

    /// Returns the engine's own default soundfont: the first well-known
    /// system soundfont that exists on this machine.
    pub fn default_soundfont() -> Option<PathBuf> {
        DEFAULT_SOUNDFONT_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    }

    fn synthesizer_settings(&self) -> SynthesizerSettings {
        let mut settings = SynthesizerSettings::new(self.sample_rate as i32);
        settings.maximum_polyphony = self.polyphony;
        settings.enable_reverb_and_chorus = self.reverb_and_chorus;
        settings
    }
}

/// A SoundFont loaded into a context, remembered by the path it came from.
struct LoadedFont {
    name: String,
    soundfont: Arc<SoundFont>,
}

/// One synthesis engine instance.
///
/// Exclusively owned: either parked in the pool or lent to one session.
/// Dropping the context tears it down.
pub struct SynthContext {
    id: Uuid,
    settings: EngineSettings,
    /// Loaded fonts; the last one drives the synthesizer.
    fonts: Vec<LoadedFont>,
    /// Present only while at least one font is loaded.
    synth: Option<Synthesizer>,
}

impl std::fmt::Debug for SynthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthContext")
            .field("id", &self.id)
            .field("sample_rate", &self.settings.sample_rate)
            .field(
                "fonts",
                &self.fonts.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SynthContext {
    /// Creates a new context with no soundfont loaded.
    ///
    /// # Errors
    ///
    /// Returns error if the settings are outside what the engine supports.
    pub fn new(settings: &EngineSettings) -> Result<Self, SynthError> {
        settings.validate()?;

        let context = Self {
            id: Uuid::new_v4(),
            settings: settings.clone(),
            fonts: Vec::new(),
            synth: None,
        };
        tracing::debug!("Created synth context {}", context.id);
        Ok(context)
    }

    /// Returns the unique identity of this context.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    /// Resets all channels and silences every voice so nothing carries over
    /// to the next track. Loaded soundfonts are kept.
    pub fn reset(&mut self) {
        if let Some(synth) = self.synth.as_mut() {
            synth.reset();
            // A reset alone can leave releasing voices behind
            synth.note_off_all(true);
        }
    }

    /// Stops every voice immediately, without touching channel state.
    pub fn all_sounds_off(&mut self) {
        if let Some(synth) = self.synth.as_mut() {
            synth.note_off_all(true);
        }
    }

    /// Sends a raw channel message to the synthesizer.
    pub fn process_midi_message(&mut self, channel: i32, command: i32, data1: i32, data2: i32) {
        if let Some(synth) = self.synth.as_mut() {
            synth.process_midi_message(channel, command, data1, data2);
        }
    }

    /// Renders planar stereo frames. Renders silence while no font is loaded.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        match self.synth.as_mut() {
            Some(synth) => synth.render(left, right),
            None => {
                left.fill(0.0);
                right.fill(0.0);
            }
        }
    }

    fn rebuild_synthesizer(&mut self) {
        self.synth = match self.fonts.last() {
            Some(font) => {
                match Synthesizer::new(&font.soundfont, &self.settings.synthesizer_settings()) {
                    Ok(synth) => Some(synth),
                    Err(e) => {
                        tracing::warn!(
                            "Synth context {}: cannot rebuild synthesizer for {}: {:?}",
                            self.id,
                            font.name,
                            e
                        );
                        None
                    }
                }
            }
            None => None,
        };
    }
}

impl FontSlots for SynthContext {
    fn font_count(&self) -> usize {
        self.fonts.len()
    }

    fn font_name(&self, index: usize) -> Option<&str> {
        self.fonts.get(index).map(|f| f.name.as_str())
    }

    fn unload_font(&mut self, index: usize) -> bool {
        if index >= self.fonts.len() {
            return false;
        }
        let font = self.fonts.remove(index);
        tracing::debug!("Synth context {}: unloaded {}", self.id, font.name);
        self.rebuild_synthesizer();
        true
    }

    fn load_font(&mut self, path: &Path) -> Result<(), SynthError> {
        let mut reader =
            BufReader::new(File::open(path).map_err(|source| SynthError::SoundfontIo {
                path: path.to_path_buf(),
                source,
            })?);
        let soundfont = Arc::new(SoundFont::new(&mut reader).map_err(|e| {
            SynthError::SoundfontParse {
                path: path.to_path_buf(),
                message: format!("{:?}", e),
            }
        })?);
        let synth = Synthesizer::new(&soundfont, &self.settings.synthesizer_settings())
            .map_err(|e| SynthError::Synthesizer(format!("{:?}", e)))?;

        self.fonts.push(LoadedFont {
            name: path.to_string_lossy().into_owned(),
            soundfont,
        });
        self.synth = Some(synth);
        tracing::debug!("Synth context {}: loaded {}", self.id, path.display());
        Ok(())
    }
}

impl Drop for SynthContext {
    fn drop(&mut self) {
        tracing::debug!("Destroyed synth context {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_validation() {
        assert!(EngineSettings::new(44100).validate().is_ok());
        assert!(matches!(
            EngineSettings::new(8000).validate(),
            Err(SynthError::SampleRate(8000))
        ));

        let mut settings = EngineSettings::default();
        settings.polyphony = 1000;
        assert!(matches!(
            settings.validate(),
            Err(SynthError::Polyphony(1000))
        ));
        assert!(SynthContext::new(&settings).is_err());
    }

    #[test]
    fn test_context_without_font_renders_silence() {
        let mut context = SynthContext::new(&EngineSettings::default()).unwrap();
        assert_eq!(context.font_count(), 0);
        assert_eq!(context.sample_rate(), DEFAULT_SAMPLE_RATE);

        let mut left = vec![1.0f32; 128];
        let mut right = vec![1.0f32; 128];
        context.process_midi_message(0, 0x90, 60, 100);
        context.render(&mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));

        // Reset is harmless on an empty context
        context.reset();
        context.all_sounds_off();
    }

    #[test]
    fn test_contexts_have_distinct_identities() {
        let a = SynthContext::new(&EngineSettings::default()).unwrap();
        let b = SynthContext::new(&EngineSettings::default()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_load_font_failure_leaves_context_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let stub = crate::midi::fixtures::write_soundfont_stub(dir.path(), "broken.sf2");

        let mut context = SynthContext::new(&EngineSettings::default()).unwrap();
        assert!(matches!(
            context.load_font(&stub),
            Err(SynthError::SoundfontParse { .. })
        ));
        assert!(matches!(
            context.load_font(&dir.path().join("missing.sf2")),
            Err(SynthError::SoundfontIo { .. })
        ));
        assert_eq!(context.font_count(), 0);
        assert!(!context.unload_font(0));
    }

    #[test]
    #[ignore] // Requires SoundFont file
    fn test_load_and_unload_real_font() {
        let path = PathBuf::from("assets/TimGM6mb.sf2");
        let mut context = SynthContext::new(&EngineSettings::default()).unwrap();
        context.load_font(&path).unwrap();
        assert_eq!(context.font_count(), 1);
        assert_eq!(context.font_name(0), Some("assets/TimGM6mb.sf2"));

        let mut left = vec![0.0f32; 4096];
        let mut right = vec![0.0f32; 4096];
        context.process_midi_message(0, 0x90, 60, 100);
        context.render(&mut left, &mut right);
        assert!(left.iter().any(|s| *s != 0.0));

        assert!(context.unload_font(0));
        assert_eq!(context.font_count(), 0);
    }
}
