use super::command::Command;
use super::sync::{PendingTable, SyncKind};
use crate::error::ControlError;
use crate::models::{EngineErrorKind, MediaSource, PlaybackRate, PlaybackState, PlayerStatus, SeekMode};

/// State a command handed to the engine is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingTarget {
    pub state: PlaybackState,
    pub kind: SyncKind,
    /// Caller that issued the command, if it is still waiting
    pub ticket: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SeekRequest {
    pub position_ms: i64,
    pub mode: SeekMode,
    pub seq: u64,
}

/// Seek coalescing bookkeeping.
///
/// `latest` is the newest requested target, `in_flight` the one the engine
/// is working on. A completion for an older request than `latest` triggers
/// one follow-up seek instead of waking anyone.
#[derive(Debug, Default)]
pub(crate) struct SeekState {
    pub latest: Option<SeekRequest>,
    pub in_flight: Option<SeekRequest>,
    pub task_pending: bool,
    next_seq: u64,
}

impl SeekState {
    pub fn request(&mut self, position_ms: i64, mode: SeekMode) -> SeekRequest {
        self.next_seq += 1;
        let request = SeekRequest {
            position_ms,
            mode,
            seq: self.next_seq,
        };
        self.latest = Some(request);
        request
    }

    /// Whether a newer request arrived after the in-flight one was issued
    pub fn superseded(&self, in_flight: &SeekRequest) -> bool {
        matches!(self.latest, Some(latest) if latest.seq > in_flight.seq)
    }

    pub fn clear(&mut self) {
        self.latest = None;
        self.in_flight = None;
    }

    /// Forget the in-flight request once nobody waits on it.
    ///
    /// A later request then issues a fresh engine seek, and a completion
    /// arriving with nothing in flight is treated as stale.
    pub fn abandon(&mut self) -> Option<SeekRequest> {
        let request = self.in_flight.take()?;
        if !self.task_pending {
            self.latest = None;
        }
        Some(request)
    }
}

/// Outcome of checking a command against the effective state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Validation {
    Proceed,
    /// Already in the requested state; succeed without touching the engine
    AlreadyIn(PlaybackState),
    /// The unconfirmed target already heads there; wait for its confirmation
    AwaitTarget(PlaybackState),
}

/// Everything guarded by the controller's state lock
#[derive(Debug)]
pub(crate) struct ControlState {
    pub state: PlaybackState,
    pub target: Option<PendingTarget>,
    pub generation: u64,
    pub position_ms: i64,
    pub duration_ms: Option<i64>,
    pub rate: PlaybackRate,
    pub volume: f32,
    pub looping: bool,
    pub source: Option<MediaSource>,
    pub last_error: Option<(EngineErrorKind, i32)>,
    pub releasing: bool,
    pub seek: SeekState,
    pub pending: PendingTable,
}

impl ControlState {
    pub fn new(volume: f32, looping: bool) -> Self {
        Self {
            state: PlaybackState::Idle,
            target: None,
            generation: 0,
            position_ms: 0,
            duration_ms: None,
            rate: PlaybackRate::default(),
            volume,
            looping,
            source: None,
            last_error: None,
            releasing: false,
            seek: SeekState::default(),
            pending: PendingTable::new(),
        }
    }

    /// State the controller is heading to once the pending confirmation lands
    pub fn effective_state(&self) -> PlaybackState {
        self.target.map(|target| target.state).unwrap_or(self.state)
    }

    /// Requested state confirmed, or only promised by the pending target
    fn reached_or_pending(&self, requested: PlaybackState) -> Validation {
        if self.state == requested {
            Validation::AlreadyIn(requested)
        } else {
            Validation::AwaitTarget(requested)
        }
    }

    /// Check `command` against the effective state.
    ///
    /// Stop needs a source: in IDLE there is nothing to stop and the engine
    /// would reject it, so it is refused like any other transport command.
    pub fn validate(&self, command: &Command) -> Result<Validation, ControlError> {
        use PlaybackState::*;

        let current = self.state;
        if current == Released || (self.releasing && *command != Command::Release) {
            return Err(ControlError::Released);
        }

        let from = self.effective_state();
        let invalid = Err(ControlError::InvalidState {
            operation: command.name(),
            state: from,
        });

        if current == Error && !matches!(command, Command::Reset | Command::Release) {
            return Err(ControlError::InvalidState {
                operation: command.name(),
                state: Error,
            });
        }

        match command {
            Command::SetSource(_) => match from {
                Idle => Ok(Validation::Proceed),
                _ => invalid,
            },
            Command::Prepare => match from {
                Initialized | Stopped => Ok(Validation::Proceed),
                _ => invalid,
            },
            Command::Play => match from {
                Prepared | Paused | PlaybackComplete => Ok(Validation::Proceed),
                Started => Ok(self.reached_or_pending(Started)),
                _ => invalid,
            },
            Command::Pause => match from {
                Started => Ok(Validation::Proceed),
                Paused => Ok(self.reached_or_pending(Paused)),
                _ => invalid,
            },
            Command::Stop => match from {
                Stopped => Ok(self.reached_or_pending(Stopped)),
                Idle | Error => invalid,
                _ => Ok(Validation::Proceed),
            },
            Command::Seek { .. } | Command::SetRate(_) => {
                if from.is_seekable() {
                    Ok(Validation::Proceed)
                } else {
                    invalid
                }
            }
            Command::SetVolume(_) | Command::Reset | Command::Release => Ok(Validation::Proceed),
        }
    }

    /// Move to `next`, returning the transition if the state changed
    pub fn transition(&mut self, next: PlaybackState) -> Option<(PlaybackState, PlaybackState)> {
        let previous = self.state;
        if previous == next {
            return None;
        }
        self.state = next;
        Some((previous, next))
    }

    /// Clamp a requested position into the media
    pub fn clamp_position(&self, position_ms: i64) -> i64 {
        match self.duration_ms {
            Some(duration) => position_ms.clamp(0, duration.max(0)),
            None => position_ms.max(0),
        }
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            state: self.state,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            rate: self.rate,
            volume: self.volume,
            looping: self.looping,
            source: self.source.clone(),
            last_error: self.last_error,
        }
    }
}
