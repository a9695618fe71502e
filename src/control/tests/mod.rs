
use crate::config::ControlConfig;
use crate::control::{PlayerController, PlayerEvent, PlayerObserver};
use crate::engine::{EngineProbe, SimulatedEngine, SimulatedEngineConfig};
use crate::models::MediaSource;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(super) const WAIT: Duration = Duration::from_secs(3);

/// Observer that keeps every event and lets tests wait for one
pub(super) struct RecordingObserver {
    events: Mutex<Vec<PlayerEvent>>,
    cond: Condvar,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            cond: Condvar::new(),
        })
    }

    pub fn events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&PlayerEvent) -> bool,
    {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    /// Block until an event matching `predicate` has been seen
    pub fn wait_for<F>(&self, predicate: F) -> bool
    where
        F: Fn(&PlayerEvent) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        let mut events = self.events.lock();
        loop {
            if events.iter().any(|event| predicate(event)) {
                return true;
            }
            if self.cond.wait_until(&mut events, deadline).timed_out() {
                return events.iter().any(|event| predicate(event));
            }
        }
    }
}

impl PlayerObserver for RecordingObserver {
    fn on_event(&self, event: PlayerEvent) {
        self.events.lock().push(event);
        self.cond.notify_all();
    }
}

pub(super) fn engine_config() -> SimulatedEngineConfig {
    SimulatedEngineConfig {
        name: "sim-test".to_string(),
        duration_ms: 30_000,
        confirm_delay: Duration::from_millis(5),
        seek_delay: Duration::from_millis(5),
        position_interval: None,
        ..SimulatedEngineConfig::default()
    }
}

pub(super) fn control_config() -> ControlConfig {
    ControlConfig {
        command_timeout_ms: 2_000,
        prepare_timeout_ms: 2_000,
        release_timeout_ms: 2_000,
        position_update_interval_ms: 0,
        ..ControlConfig::default()
    }
}

pub(super) struct Harness {
    pub controller: Arc<PlayerController>,
    pub probe: EngineProbe,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub fn with(engine: SimulatedEngineConfig, config: ControlConfig) -> Self {
        let engine = SimulatedEngine::new(engine);
        let probe = engine.probe();
        let controller = Arc::new(PlayerController::with_config(Box::new(engine), config).unwrap());

        let observer = RecordingObserver::new();
        let handle: Arc<dyn PlayerObserver> = observer.clone();
        controller.set_observer(&handle);

        Self {
            controller,
            probe,
            observer,
        }
    }

    pub fn new() -> Self {
        Self::with(engine_config(), control_config())
    }

    /// Harness already in PREPARED
    pub fn prepared_with(engine: SimulatedEngineConfig, config: ControlConfig) -> Self {
        let harness = Self::with(engine, config);
        harness
            .controller
            .set_source(MediaSource::new("sim://test-track"))
            .unwrap();
        harness.controller.prepare().unwrap();
        harness
    }

    pub fn prepared() -> Self {
        Self::prepared_with(engine_config(), control_config())
    }

    /// Harness already in STARTED
    pub fn started() -> Self {
        let harness = Self::prepared();
        harness.controller.play().unwrap();
        harness
    }

    pub fn saw_transition(&self, previous: crate::models::PlaybackState, current: crate::models::PlaybackState) -> bool {
        self.observer
            .wait_for(|event| *event == PlayerEvent::StateChanged { previous, current })
    }
}
