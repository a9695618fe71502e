pub mod simulated;

use crate::models::{EngineErrorKind, MediaSource, PlaybackRate, PlaybackState, SeekMode};
use std::sync::Weak;
use thiserror::Error;

pub use simulated::{EngineProbe, SimulatedEngine, SimulatedEngineConfig};

/// Failure status returned synchronously by an engine primitive
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine status {code}: {message}")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type EngineResult = Result<(), EngineError>;

/// Notifications an engine emits from its own callback thread(s)
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(PlaybackState),
    SeekDone { position_ms: i64 },
    PositionUpdated { position_ms: i64 },
    EndOfStream,
    Error { kind: EngineErrorKind, code: i32 },
    VolumeChanged { volume: f32 },
}

/// Receiver of engine callbacks.
///
/// Implementations must return quickly and must never call back into a
/// blocking controller operation.
pub trait EngineListener: Send + Sync {
    fn on_engine_event(&self, event: EngineEvent);
}

/// The opaque decode/playback pipeline driven by the controller.
///
/// Primitives marked async-confirmed report success once the request is
/// accepted; completion arrives later as an [`EngineEvent`].
pub trait Engine: Send {
    /// Name used to key the process-wide capability cache
    fn name(&self) -> &str;

    fn set_source(&mut self, source: &MediaSource) -> EngineResult;

    /// Async-confirmed by `StateChanged(Prepared)`
    fn prepare(&mut self) -> EngineResult;

    /// Async-confirmed by `StateChanged(Started)`
    fn play(&mut self) -> EngineResult;

    /// Async-confirmed by `StateChanged(Paused)`
    fn pause(&mut self) -> EngineResult;

    /// Async-confirmed by `StateChanged(Stopped)`
    fn stop(&mut self) -> EngineResult;

    /// Async-confirmed by `SeekDone`
    fn seek(&mut self, position_ms: i64, mode: SeekMode) -> EngineResult;

    fn set_rate(&mut self, rate: PlaybackRate) -> EngineResult;

    fn set_volume(&mut self, volume: f32) -> EngineResult;

    /// Drop the current source and return to an unconfigured pipeline
    fn reset(&mut self) -> EngineResult;

    /// Tear down engine-owned threads; no callbacks are delivered afterwards
    fn release(&mut self);

    /// Media duration once known
    fn duration_ms(&self) -> Option<i64>;

    fn supported_rates(&self) -> Vec<PlaybackRate> {
        PlaybackRate::ALL.to_vec()
    }

    /// Install or clear the callback target. The engine only keeps a weak
    /// reference and must drop events once it no longer upgrades.
    fn register_listener(&mut self, listener: Option<Weak<dyn EngineListener>>);
}
