//! Tracking of the desired SoundFont and reconciliation of recycled contexts.
//!
//! Contexts are recycled across tracks, so instead of reloading the font on
//! every open, the font already loaded in a context is kept when it matches
//! the desired one and swapped only when it does not.

use super::context::SynthError;
use parking_lot::RwLock;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Font management operations a synthesis engine exposes.
pub trait FontSlots {
    /// Number of fonts currently loaded.
    fn font_count(&self) -> usize;
    /// Name of the font at `index`: the path it was loaded from.
    fn font_name(&self, index: usize) -> Option<&str>;
    /// Unloads the font at `index`. Returns false if there is no such font.
    fn unload_font(&mut self, index: usize) -> bool;
    /// Loads a font from disk on top of any already loaded.
    fn load_font(&mut self, path: &Path) -> Result<(), SynthError>;
}

/// The desired font could not be loaded.
#[derive(Debug, Error)]
#[error("Can't load soundfont: {}", .path.display())]
pub struct SoundfontError {
    pub path: PathBuf,
    #[source]
    pub source: SynthError,
}

/// What `reconcile` did to a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// No font is desired; the context keeps whatever the engine has.
    EngineDefault,
    /// The context already had the desired font (or several fonts); nothing changed.
    Kept,
    /// The desired font was loaded, after unloading a stale one if present.
    Loaded,
}

/// Holds the soundfont every new session should play with.
#[derive(Debug, Default)]
pub struct SoundfontManager {
    desired: RwLock<Option<PathBuf>>,
}

impl SoundfontManager {
    /// Creates a manager with an initial desired font (`None` = engine default).
    pub fn new(desired: Option<PathBuf>) -> Self {
        Self {
            desired: RwLock::new(desired),
        }
    }

    /// Returns the currently desired font.
    pub fn desired(&self) -> Option<PathBuf> {
        self.desired.read().clone()
    }

    /// Replaces the desired font. Takes effect on the next acquired context.
    pub fn set_desired(&self, path: Option<PathBuf>) {
        tracing::info!("Desired soundfont set to {:?}", path);
        *self.desired.write() = path;
    }

    /// Makes the font loaded in `context` match the desired one.
    ///
    /// A single loaded font whose name differs from the desired path is
    /// unloaded; an empty context then gets the desired font loaded.
    ///
    /// # Errors
    ///
    /// Returns error if the desired font cannot be loaded.
    pub fn reconcile<F: FontSlots + ?Sized>(
        &self,
        context: &mut F,
    ) -> Result<Reconciled, SoundfontError> {
        let desired = match self.desired() {
            Some(path) => path,
            None => return Ok(Reconciled::EngineDefault),
        };
        let desired_name = desired.to_string_lossy();

        if context.font_count() == 1 && context.font_name(0) != Some(&*desired_name) {
            tracing::debug!(
                "Unloading stale soundfont {:?}, want {}",
                context.font_name(0),
                desired_name
            );
            context.unload_font(0);
        }

        if context.font_count() > 0 {
            return Ok(Reconciled::Kept);
        }

        context
            .load_font(&desired)
            .map_err(|source| SoundfontError {
                path: desired.clone(),
                source,
            })?;
        Ok(Reconciled::Loaded)
    }
}

/// Returns true if the file at `path` is a SoundFont 2 bank.
///
/// Checks for the `RIFF....sfbk` header rather than trusting the extension.
pub fn is_soundfont<P: AsRef<Path>>(path: P) -> bool {
    let mut header = [0u8; 12];
    match File::open(path.as_ref()).and_then(|mut f| f.read_exact(&mut header)) {
        Ok(()) => &header[0..4] == b"RIFF" && &header[8..12] == b"sfbk",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records font traffic instead of parsing real banks.
    #[derive(Default)]
    struct FakeFonts {
        loaded: Vec<String>,
        loads: usize,
        unloads: usize,
        fail_loads: bool,
    }

    impl FontSlots for FakeFonts {
        fn font_count(&self) -> usize {
            self.loaded.len()
        }

        fn font_name(&self, index: usize) -> Option<&str> {
            self.loaded.get(index).map(String::as_str)
        }

        fn unload_font(&mut self, index: usize) -> bool {
            if index < self.loaded.len() {
                self.loaded.remove(index);
                self.unloads += 1;
                true
            } else {
                false
            }
        }

        fn load_font(&mut self, path: &Path) -> Result<(), SynthError> {
            if self.fail_loads {
                return Err(SynthError::SoundfontParse {
                    path: path.to_path_buf(),
                    message: "bad bank".to_string(),
                });
            }
            self.loaded.push(path.to_string_lossy().into_owned());
            self.loads += 1;
            Ok(())
        }
    }

    #[test]
    fn test_reconcile_without_desired_font_is_noop() {
        let manager = SoundfontManager::default();
        let mut fonts = FakeFonts::default();

        assert_eq!(
            manager.reconcile(&mut fonts).unwrap(),
            Reconciled::EngineDefault
        );
        assert_eq!(fonts.loads, 0);
    }

    #[test]
    fn test_reconcile_twice_loads_once() {
        let manager = SoundfontManager::new(Some(PathBuf::from("/banks/a.sf2")));
        let mut fonts = FakeFonts::default();

        assert_eq!(manager.reconcile(&mut fonts).unwrap(), Reconciled::Loaded);
        assert_eq!(manager.reconcile(&mut fonts).unwrap(), Reconciled::Kept);
        assert_eq!(fonts.loads, 1);
        assert_eq!(fonts.unloads, 0);
        assert_eq!(fonts.loaded, vec!["/banks/a.sf2".to_string()]);
    }

    #[test]
    fn test_reconcile_swaps_stale_font() {
        let manager = SoundfontManager::new(Some(PathBuf::from("/banks/a.sf2")));
        let mut fonts = FakeFonts::default();
        manager.reconcile(&mut fonts).unwrap();

        manager.set_desired(Some(PathBuf::from("/banks/b.sf2")));
        assert_eq!(manager.reconcile(&mut fonts).unwrap(), Reconciled::Loaded);
        assert_eq!(fonts.unloads, 1);
        assert_eq!(fonts.loaded, vec!["/banks/b.sf2".to_string()]);
    }

    #[test]
    fn test_reconcile_keeps_multiple_fonts() {
        let manager = SoundfontManager::new(Some(PathBuf::from("/banks/a.sf2")));
        let mut fonts = FakeFonts {
            loaded: vec!["/banks/x.sf2".to_string(), "/banks/y.sf2".to_string()],
            ..Default::default()
        };

        assert_eq!(manager.reconcile(&mut fonts).unwrap(), Reconciled::Kept);
        assert_eq!(fonts.unloads, 0);
        assert_eq!(fonts.loads, 0);
    }

    #[test]
    fn test_reconcile_reports_failing_path() {
        let manager = SoundfontManager::new(Some(PathBuf::from("/banks/broken.sf2")));
        let mut fonts = FakeFonts {
            fail_loads: true,
            ..Default::default()
        };

        let err = manager.reconcile(&mut fonts).unwrap_err();
        assert_eq!(err.path, PathBuf::from("/banks/broken.sf2"));
        assert!(err.to_string().contains("/banks/broken.sf2"));
    }

    #[test]
    fn test_is_soundfont_sniffs_header() {
        let dir = tempfile::tempdir().unwrap();
        let sf2 = crate::midi::fixtures::write_soundfont_stub(dir.path(), "bank.sf2");
        let mid = crate::midi::fixtures::write_smf(dir.path(), "song.mid", &[]);
        let short = dir.path().join("short.sf2");
        std::fs::write(&short, b"RIFF").unwrap();

        assert!(is_soundfont(&sf2));
        assert!(!is_soundfont(&mid));
        assert!(!is_soundfont(&short));
        assert!(!is_soundfont(dir.path().join("missing.sf2")));
    }
}
