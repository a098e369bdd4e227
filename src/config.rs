//! Decoder configuration.
//!
//! Settings come from the host's option store (`OptionSource`). A standalone
//! build reads them from environment variables instead, and a JSON file can
//! be used where neither is convenient.

use crate::audio::context::{EngineSettings, DEFAULT_POLYPHONY, DEFAULT_SAMPLE_RATE};
use crate::audio::pool::DEFAULT_GRACE_PERIOD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Option key for the SoundFont to play with.
pub const OPT_SOUNDFONT: &str = "MidiSynth_SoundFont";
/// Option key for the output sample rate in Hz.
pub const OPT_RATE: &str = "MidiSynth_Rate";
/// Option key for the idle context grace period in milliseconds.
pub const OPT_GRACE_MS: &str = "MidiSynth_GraceMs";

/// Errors that can occur while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// A string/integer key lookup provided by the host.
pub trait OptionSource: Send + Sync {
    /// Returns the value of `key`, if set.
    fn get_str(&self, key: &str) -> Option<String>;

    /// Returns the value of `key` parsed as an integer, if set and numeric.
    fn get_int(&self, key: &str) -> Option<i64> {
        self.get_str(key)?.trim().parse().ok()
    }
}

/// Options held in memory, as a host that embeds the decoder would pass them.
#[derive(Debug, Clone, Default)]
pub struct StaticOptions {
    values: HashMap<String, String>,
}

impl StaticOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl OptionSource for StaticOptions {
    fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Environment variable read for each known option key.
const ENV_VARS: &[(&str, &str)] = &[
    (OPT_SOUNDFONT, "MIDISYNTH_SOUNDFONT"),
    (OPT_RATE, "MIDISYNTH_RATE"),
    (OPT_GRACE_MS, "MIDISYNTH_GRACE_MS"),
];

/// Reads options from environment variables: `MIDISYNTH_SOUNDFONT`,
/// `MIDISYNTH_RATE` and `MIDISYNTH_GRACE_MS`. Other keys are looked up
/// upper-cased. Blank values count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvOptions;

impl EnvOptions {
    /// Returns the environment variable `key` is read from.
    pub fn var_name(key: &str) -> String {
        ENV_VARS
            .iter()
            .find(|(option, _)| *option == key)
            .map(|(_, var)| var.to_string())
            .unwrap_or_else(|| key.to_uppercase())
    }
}

impl OptionSource for EnvOptions {
    fn get_str(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key))
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

/// Everything the decoder needs to know at init time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// SoundFont to play with; `None` uses the engine default.
    pub soundfont: Option<PathBuf>,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// How long an idle synthesizer is kept after a track closes, in milliseconds.
    pub grace_period_ms: u64,
    /// Maximum number of simultaneous voices.
    pub polyphony: usize,
    /// Whether reverb and chorus are rendered.
    pub reverb_and_chorus: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            soundfont: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            grace_period_ms: DEFAULT_GRACE_PERIOD.as_millis() as u64,
            polyphony: DEFAULT_POLYPHONY,
            reverb_and_chorus: true,
        }
    }
}

impl DecoderConfig {
    /// Reads the configuration from a host option source.
    ///
    /// Unset options keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric option is out of range.
    pub fn from_options(source: &dyn OptionSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = source.get_str(OPT_SOUNDFONT) {
            config.soundfont = Some(PathBuf::from(path));
        }
        if let Some(rate) = source.get_int(OPT_RATE) {
            config.sample_rate = u32::try_from(rate).map_err(|_| ConfigError::InvalidValue {
                key: OPT_RATE.to_string(),
                value: rate.to_string(),
            })?;
        }
        if let Some(ms) = source.get_int(OPT_GRACE_MS) {
            config.grace_period_ms = u64::try_from(ms).map_err(|_| ConfigError::InvalidValue {
                key: OPT_GRACE_MS.to_string(),
                value: ms.to_string(),
            })?;
        }

        Ok(config)
    }

    /// Loads the configuration from a JSON file. Missing fields keep their defaults.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns the idle context grace period.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Returns the engine settings derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            sample_rate: self.sample_rate,
            polyphony: self.polyphony,
            reverb_and_chorus: self.reverb_and_chorus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::from_options(&StaticOptions::new()).unwrap();
        assert_eq!(config, DecoderConfig::default());
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.grace_period(), Duration::from_secs(300));
        assert!(config.soundfont.is_none());
    }

    #[test]
    fn test_from_static_options() {
        let options = StaticOptions::new()
            .with(OPT_SOUNDFONT, "/banks/gm.sf2")
            .with(OPT_RATE, "48000")
            .with(OPT_GRACE_MS, " 250 ");

        let config = DecoderConfig::from_options(&options).unwrap();
        assert_eq!(config.soundfont, Some(PathBuf::from("/banks/gm.sf2")));
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.grace_period(), Duration::from_millis(250));
        assert_eq!(config.engine_settings().sample_rate, 48000);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let options = StaticOptions::new().with(OPT_RATE, "-1");
        assert!(matches!(
            DecoderConfig::from_options(&options),
            Err(ConfigError::InvalidValue { .. })
        ));

        let options = StaticOptions::new().with(OPT_GRACE_MS, "-5");
        assert!(matches!(
            DecoderConfig::from_options(&options),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_env_options_read_documented_variables() {
        assert_eq!(EnvOptions::var_name(OPT_GRACE_MS), "MIDISYNTH_GRACE_MS");

        std::env::set_var("MIDISYNTH_SOUNDFONT", "/banks/env.sf2");
        std::env::set_var("MIDISYNTH_RATE", "48000");
        std::env::set_var("MIDISYNTH_GRACE_MS", "250");
        let config = DecoderConfig::from_options(&EnvOptions);

        std::env::set_var("MIDISYNTH_RATE", "  ");
        let blank_rate = EnvOptions.get_str(OPT_RATE);

        for var in ["MIDISYNTH_SOUNDFONT", "MIDISYNTH_RATE", "MIDISYNTH_GRACE_MS"] {
            std::env::remove_var(var);
        }

        let config = config.unwrap();
        assert_eq!(config.soundfont, Some(PathBuf::from("/banks/env.sf2")));
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.grace_period(), Duration::from_millis(250));
        assert_eq!(blank_rate, None);
    }

    #[test]
    fn test_load_json_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midisynth.json");
        fs::write(&path, r#"{ "soundfont": "/banks/a.sf2", "sample_rate": 22050 }"#).unwrap();

        let config = DecoderConfig::load_json(&path).unwrap();
        assert_eq!(config.soundfont, Some(PathBuf::from("/banks/a.sf2")));
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.polyphony, DEFAULT_POLYPHONY);

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            DecoderConfig::load_json(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
