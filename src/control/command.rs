use super::sync::SyncKind;
use crate::models::{MediaSource, PlaybackRate, PlaybackState, SeekMode};

/// A control request as it travels through the task queue
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetSource(MediaSource),
    Prepare,
    Play,
    Pause,
    Seek { position_ms: i64, mode: SeekMode },
    Stop,
    SetRate(PlaybackRate),
    SetVolume(f32),
    Reset,
    Release,
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.sync_kind().operation()
    }

    /// Condition variable the caller of this command waits on
    pub fn sync_kind(&self) -> SyncKind {
        match self {
            Command::SetSource(_) => SyncKind::Source,
            Command::Prepare => SyncKind::Prepare,
            Command::Play => SyncKind::Play,
            Command::Pause => SyncKind::Pause,
            Command::Seek { .. } => SyncKind::Seek,
            Command::Stop => SyncKind::Stop,
            Command::SetRate(_) => SyncKind::Rate,
            Command::SetVolume(_) => SyncKind::Volume,
            Command::Reset => SyncKind::Reset,
            Command::Release => SyncKind::Release,
        }
    }

    /// State the engine must report before the command counts as done.
    ///
    /// `None` means the command completes as soon as the worker has run it
    /// (seek completes on its own `SeekDone` event instead).
    pub fn confirmation(&self) -> Option<PlaybackState> {
        match self {
            Command::Prepare => Some(PlaybackState::Prepared),
            Command::Play => Some(PlaybackState::Started),
            Command::Pause => Some(PlaybackState::Paused),
            Command::Stop => Some(PlaybackState::Stopped),
            _ => None,
        }
    }

    /// Whether enqueueing this command discards queued work by default
    pub fn cancels_queued(&self) -> bool {
        matches!(self, Command::Stop | Command::Reset | Command::Release)
    }

    /// Commands that abandon playback and fail transport waiters
    pub fn is_teardown(&self) -> bool {
        matches!(self, Command::Stop | Command::Reset | Command::Release)
    }
}
