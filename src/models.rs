use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback state owned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Initialized,
    Preparing,
    Prepared,
    Started,
    Paused,
    Stopped,
    PlaybackComplete,
    Error,
    Released,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "IDLE",
            PlaybackState::Initialized => "INITIALIZED",
            PlaybackState::Preparing => "PREPARING",
            PlaybackState::Prepared => "PREPARED",
            PlaybackState::Started => "STARTED",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Stopped => "STOPPED",
            PlaybackState::PlaybackComplete => "PLAYBACK_COMPLETE",
            PlaybackState::Error => "ERROR",
            PlaybackState::Released => "RELEASED",
        }
    }

    /// No operation is accepted once released
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Released)
    }

    /// States in which the media position is meaningful
    pub fn is_seekable(&self) -> bool {
        matches!(
            self,
            PlaybackState::Prepared
                | PlaybackState::Started
                | PlaybackState::Paused
                | PlaybackState::PlaybackComplete
        )
    }

    /// Check whether `next` is a legal successor of this state.
    ///
    /// Error, Idle (reset) and Released are reachable from every
    /// non-released state; a self-transition is always accepted.
    pub fn can_transition_to(&self, next: PlaybackState) -> bool {
        use PlaybackState::*;

        if *self == Released {
            return false;
        }
        if *self == next {
            return true;
        }

        match (*self, next) {
            (_, Error) | (_, Idle) | (_, Released) => true,

            (Initialized, Preparing) | (Initialized, Stopped) => true,
            (Idle, Initialized) => true,

            (Preparing, Prepared) | (Preparing, Stopped) => true,

            (Prepared, Started) | (Prepared, Stopped) => true,

            (Started, Paused) | (Started, PlaybackComplete) | (Started, Stopped) => true,

            (Paused, Started) | (Paused, Stopped) => true,

            (PlaybackComplete, Started) | (PlaybackComplete, Stopped) => true,

            (Stopped, Preparing) => true,

            _ => false,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy for resolving a seek target to a decodable position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeekMode {
    /// Nearest keyframe at or before the target
    PreviousSync,
    /// Nearest keyframe at or after the target
    NextSync,
    /// Keyframe closest to the target
    ClosestSync,
    /// Exact frame
    Closest,
}

impl SeekMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeekMode::PreviousSync => "PREVIOUS_SYNC",
            SeekMode::NextSync => "NEXT_SYNC",
            SeekMode::ClosestSync => "CLOSEST_SYNC",
            SeekMode::Closest => "CLOSEST",
        }
    }

    /// Parse the short names accepted on the command line
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_lowercase().as_str() {
            "prev" | "previous" | "previous_sync" => Some(SeekMode::PreviousSync),
            "next" | "next_sync" => Some(SeekMode::NextSync),
            "sync" | "closest_sync" => Some(SeekMode::ClosestSync),
            "exact" | "closest" => Some(SeekMode::Closest),
            _ => None,
        }
    }
}

impl Default for SeekMode {
    fn default() -> Self {
        SeekMode::PreviousSync
    }
}

/// The fixed set of playback speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackRate {
    X0_75,
    X1_00,
    X1_25,
    X1_75,
    X2_00,
}

impl PlaybackRate {
    pub const ALL: [PlaybackRate; 5] = [
        PlaybackRate::X0_75,
        PlaybackRate::X1_00,
        PlaybackRate::X1_25,
        PlaybackRate::X1_75,
        PlaybackRate::X2_00,
    ];

    pub fn as_f32(&self) -> f32 {
        match self {
            PlaybackRate::X0_75 => 0.75,
            PlaybackRate::X1_00 => 1.0,
            PlaybackRate::X1_25 => 1.25,
            PlaybackRate::X1_75 => 1.75,
            PlaybackRate::X2_00 => 2.0,
        }
    }

    /// Map a numeric speed onto the enumerated set
    pub fn from_f32(value: f32) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|rate| (rate.as_f32() - value).abs() < 0.001)
    }
}

impl Default for PlaybackRate {
    fn default() -> Self {
        PlaybackRate::X1_00
    }
}

impl fmt::Display for PlaybackRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x", self.as_f32())
    }
}

/// Category of an asynchronous engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineErrorKind {
    Unknown,
    Io,
    Source,
    Demuxer,
    Decoder,
    Renderer,
    Network,
}

impl EngineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorKind::Unknown => "unknown",
            EngineErrorKind::Io => "io",
            EngineErrorKind::Source => "source",
            EngineErrorKind::Demuxer => "demuxer",
            EngineErrorKind::Decoder => "decoder",
            EngineErrorKind::Renderer => "renderer",
            EngineErrorKind::Network => "network",
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media location handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub uri: String,
}

impl MediaSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Point-in-time view of the controller, read without queueing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub position_ms: i64,
    pub duration_ms: Option<i64>,
    pub rate: PlaybackRate,
    pub volume: f32,
    pub looping: bool,
    pub source: Option<MediaSource>,
    pub last_error: Option<(EngineErrorKind, i32)>,
}

impl PlayerStatus {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            position_ms: 0,
            duration_ms: None,
            rate: PlaybackRate::default(),
            volume: 1.0,
            looping: false,
            source: None,
            last_error: None,
        }
    }

    /// Playback progress as a fraction (0.0 to 1.0)
    pub fn progress(&self) -> f32 {
        match self.duration_ms {
            Some(duration) if duration > 0 => {
                (self.position_ms as f64 / duration as f64).clamp(0.0, 1.0) as f32
            }
            _ => 0.0,
        }
    }
}

impl Default for PlayerStatus {
    fn default() -> Self {
        Self::new()
    }
}
