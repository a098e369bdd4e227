//! Per-track playback sessions.
//!
//! A session borrows one synthesizer context from the pool for the lifetime
//! of a track, plays the MIDI file through it, and hands it back on close.
//!
//! ```text
//! open ─┬─ soundfont file ──────────────▶ SoundfontOnly
//!       ├─ any step fails ──────────────▶ Failed
//!       └─ context + player + timeline ─▶ Ready ─▶ Playing ⇄ Finished
//! every state ─ close ─▶ Closed
//! ```

use crate::audio::context::{SynthContext, SynthError};
use crate::audio::player::{MidiPlayer, PlayerError, PlayerStatus};
use crate::audio::pool::Donation;
use crate::audio::soundfont::{is_soundfont, SoundfontError};
use crate::audio::{interleave_s16_le, SoundParams, BYTES_PER_FRAME};
use crate::midi::{MidiError, MidiSequence, Timeline};
use crate::service::SynthService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The file was a SoundFont; it became the desired font and nothing plays.
    SoundfontOnly,
    /// Playback is set up, nothing decoded yet.
    Ready,
    /// Audio is being produced.
    Playing,
    /// The player reached the end of the file.
    Finished,
    /// Setup failed; the error record says why.
    Failed,
    /// Resources have been released.
    Closed,
}

/// Broad class of a session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The synthesizer could not be created.
    FatalInit,
    /// The SoundFont or MIDI file could not be loaded.
    FatalLoad,
    /// Playback could not be started.
    FatalPlaybackStart,
    /// A seek was rejected; playback continues from where it was.
    SeekFailure,
}

/// Errors raised by a playback session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to create the synthesizer: {0}")]
    Init(#[source] SynthError),
    #[error(transparent)]
    Soundfont(#[from] SoundfontError),
    #[error("Can't load midifile: {}", .path.display())]
    MidiLoad {
        path: PathBuf,
        #[source]
        source: MidiError,
    },
    #[error("Can't play midifile: {}", .path.display())]
    PlaybackStart {
        path: PathBuf,
        #[source]
        source: PlayerError,
    },
    #[error("Can't seek to {seconds}s")]
    TimelineSeek {
        seconds: u32,
        #[source]
        source: MidiError,
    },
    #[error("Can't seek to {seconds}s")]
    PlayerSeek {
        seconds: u32,
        #[source]
        source: PlayerError,
    },
}

impl SessionError {
    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Init(_) => ErrorKind::FatalInit,
            SessionError::Soundfont(_) | SessionError::MidiLoad { .. } => ErrorKind::FatalLoad,
            SessionError::PlaybackStart { .. } => ErrorKind::FatalPlaybackStart,
            SessionError::TimelineSeek { .. } | SessionError::PlayerSeek { .. } => {
                ErrorKind::SeekFailure
            }
        }
    }

    /// Returns true if the session cannot play after this error.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::SeekFailure
    }
}

/// Result of one decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes written; 0 means end of stream.
    pub bytes: usize,
    /// Layout of the bytes written.
    pub params: SoundParams,
}

/// One open track.
pub struct PlaybackSession {
    service: Arc<SynthService>,
    path: PathBuf,
    state: SessionState,
    context: Option<SynthContext>,
    player: Option<MidiPlayer>,
    timeline: Option<Timeline>,
    error: Option<SessionError>,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("context", &self.context.as_ref().map(|c| c.id()))
            .field("error", &self.error)
            .finish()
    }
}

impl PlaybackSession {
    /// Opens a file for playback.
    ///
    /// A SoundFont file becomes the desired font for later sessions and
    /// yields an inert session. Otherwise a context is acquired and the
    /// MIDI file is started; on failure everything acquired so far is
    /// released and the session is left `Failed` with its error recorded.
    pub fn open<P: AsRef<Path>>(service: &Arc<SynthService>, path: P) -> Self {
        let path = path.as_ref();
        let mut session = Self {
            service: Arc::clone(service),
            path: path.to_path_buf(),
            state: SessionState::Ready,
            context: None,
            player: None,
            timeline: None,
            error: None,
            left: Vec::new(),
            right: Vec::new(),
        };

        if is_soundfont(path) {
            service.soundfonts().set_desired(Some(path.to_path_buf()));
            session.state = SessionState::SoundfontOnly;
            return session;
        }

        if let Err(e) = session.start() {
            tracing::error!("{}: {:?}", e, e);
            session.release();
            session.error = Some(e);
            session.state = SessionState::Failed;
        }
        session
    }

    fn start(&mut self) -> Result<(), SessionError> {
        let context = self
            .context
            .insert(self.service.pool().acquire().map_err(SessionError::Init)?);
        self.service.soundfonts().reconcile(context)?;

        let sequence = MidiSequence::load(&self.path).map_err(|source| SessionError::MidiLoad {
            path: self.path.clone(),
            source,
        })?;

        let mut player = MidiPlayer::new(self.service.sample_rate());
        player.add_sequence(sequence.clone());
        player
            .play()
            .map_err(|source| SessionError::PlaybackStart {
                path: self.path.clone(),
                source,
            })?;

        self.player = Some(player);
        self.timeline = Some(Timeline::from_sequence(sequence));
        tracing::debug!("Opened {:?}", self.path);
        Ok(())
    }

    /// Returns the path this session was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the error that failed this session, if any.
    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// Returns the output layout, which never changes during a session.
    pub fn sound_params(&self) -> SoundParams {
        SoundParams::s16_stereo(self.service.sample_rate())
    }

    /// Renders as many whole frames as fit into `buf`.
    ///
    /// Returns 0 bytes once the track has ended or if the session cannot play.
    /// `buf` must hold at least one frame (`BYTES_PER_FRAME` bytes); a shorter
    /// buffer gets nothing written and leaves playback where it was, so the
    /// next call with a real buffer carries on.
    pub fn decode(&mut self, buf: &mut [u8]) -> Decoded {
        let params = self.sound_params();
        let bytes = match self.state {
            SessionState::Ready | SessionState::Playing => self.render(buf),
            _ => 0,
        };
        Decoded { bytes, params }
    }

    fn render(&mut self, buf: &mut [u8]) -> usize {
        let (Some(player), Some(context)) = (self.player.as_mut(), self.context.as_mut()) else {
            return 0;
        };

        if player.status() != PlayerStatus::Playing {
            self.state = SessionState::Finished;
            return 0;
        }

        let frames = buf.len() / BYTES_PER_FRAME;
        if frames == 0 {
            tracing::warn!(
                "Decode buffer of {} bytes cannot hold one frame, nothing rendered",
                buf.len()
            );
            return 0;
        }
        self.left.resize(frames, 0.0);
        self.right.resize(frames, 0.0);
        player.render(context, &mut self.left, &mut self.right);
        self.state = SessionState::Playing;

        interleave_s16_le(&self.left, &self.right, buf)
    }

    /// Moves playback to the first event at or after `seconds`.
    ///
    /// Targets beyond the end are clamped to the track length. Returns the
    /// time of the event playback resumes from, or `None` if this session
    /// has nothing to seek.
    ///
    /// # Errors
    ///
    /// Returns a `SeekFailure` error if the timeline or the player rejects
    /// the target. The session keeps playing from its previous position.
    pub fn seek(&mut self, seconds: u32) -> Result<Option<u32>, SessionError> {
        let (Some(timeline), Some(player), Some(context)) = (
            self.timeline.as_mut(),
            self.player.as_mut(),
            self.context.as_mut(),
        ) else {
            return Ok(None);
        };

        let target = (seconds as f64).min(timeline.length_seconds());
        timeline
            .seek_to_seconds(target)
            .map_err(|source| SessionError::TimelineSeek { seconds, source })?;
        let Some(event) = timeline.peek_next_event().copied() else {
            return Err(SessionError::TimelineSeek {
                seconds,
                source: MidiError::SeekPastEnd {
                    target,
                    length: timeline.length_seconds(),
                },
            });
        };

        player
            .seek(context, event.tick)
            .map_err(|source| SessionError::PlayerSeek { seconds, source })?;

        if self.state == SessionState::Finished {
            self.state = SessionState::Playing;
        }
        tracing::debug!("Seek to {}s resumed at {:.3}s", seconds, event.seconds);
        Ok(Some(event.seconds as u32))
    }

    /// Returns the track length in whole seconds, if known.
    pub fn duration(&self) -> Option<u32> {
        self.timeline.as_ref().map(|t| t.length_seconds() as u32)
    }

    /// Releases the player, timeline and context. Safe to call repeatedly.
    fn release(&mut self) {
        self.player = None;

        if let Some(mut context) = self.context.take() {
            context.reset();
            if let Donation::Rejected(context) = self.service.pool().donate(context) {
                tracing::debug!("Pool already holds a context, destroying {}", context.id());
                drop(context);
            }
        }

        self.timeline = None;
    }

    /// Ends the session and returns its context to the pool.
    pub fn close(mut self) {
        self.release();
        self.state = SessionState::Closed;
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}
