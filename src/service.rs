//! Process-wide synthesis state shared by every playback session.

use crate::audio::context::{EngineSettings, SynthContext, SynthError};
use crate::audio::pool::SynthPool;
use crate::audio::soundfont::SoundfontManager;
use crate::config::DecoderConfig;
use std::path::PathBuf;

/// Owns the engine settings, the context pool and the desired SoundFont.
///
/// Built once at decoder init and shared with sessions through an `Arc`.
/// Dropping it (or calling `shutdown`) destroys the idle context.
#[derive(Debug)]
pub struct SynthService {
    settings: EngineSettings,
    pool: SynthPool<SynthContext>,
    soundfonts: SoundfontManager,
}

impl SynthService {
    /// Builds the service, falling back to the engine's default SoundFont
    /// when the configuration names none.
    ///
    /// # Errors
    ///
    /// Returns error if the engine settings are invalid.
    pub fn new(config: &DecoderConfig) -> Result<Self, SynthError> {
        Self::with_default_soundfont(config, EngineSettings::default_soundfont())
    }

    /// Builds the service with an explicit fallback SoundFont.
    pub fn with_default_soundfont(
        config: &DecoderConfig,
        default_soundfont: Option<PathBuf>,
    ) -> Result<Self, SynthError> {
        let settings = config.engine_settings();
        settings.validate()?;

        let desired = config.soundfont.clone().or(default_soundfont);
        tracing::info!(
            "Synth service ready: {} Hz, soundfont {:?}, idle grace period {:?}",
            settings.sample_rate,
            desired,
            config.grace_period()
        );

        let factory_settings = settings.clone();
        let pool = SynthPool::new(config.grace_period(), move || {
            SynthContext::new(&factory_settings)
        });

        Ok(Self {
            settings,
            pool,
            soundfonts: SoundfontManager::new(desired),
        })
    }

    /// Returns the engine settings every context is created with.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns the output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    /// Returns the context pool.
    pub fn pool(&self) -> &SynthPool<SynthContext> {
        &self.pool
    }

    /// Returns the SoundFont tracker.
    pub fn soundfonts(&self) -> &SoundfontManager {
        &self.soundfonts
    }

    /// Destroys the idle context now instead of waiting for its grace period.
    pub fn shutdown(&self) {
        if self.pool.drain() {
            tracing::info!("Destroyed idle synth context at shutdown");
        }
    }
}
