use super::bridge::{CallbackBridge, ObserverDispatcher, PlayerEvent, PlayerObserver};
use super::capabilities::CapabilityRegistry;
use super::command::Command;
use super::state::{ControlState, PendingTarget, Validation};
use super::sync::{Completion, Outcome, SyncKind, SyncPoints};
use super::task_queue::{TaskHandler, TaskQueue};
use crate::config::ControlConfig;
use crate::engine::{Engine, EngineEvent, EngineListener, EngineResult};
use crate::error::ControlError;
use crate::logging::{ControlEvent, ControlLogger, EventStatistics, OperationTimer};
use crate::models::{
    EngineErrorKind, MediaSource, PlaybackRate, PlaybackState, PlayerStatus, SeekMode,
};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State shared between callers, the worker and the engine callback bridge
pub(crate) struct ControllerShared {
    engine_name: String,
    config: ControlConfig,
    state: Mutex<ControlState>,
    sync: SyncPoints,
    queue: TaskQueue,
    engine: Mutex<Box<dyn Engine>>,
    engine_released: AtomicBool,
    dispatcher: ObserverDispatcher,
    logger: ControlLogger,
}

/// Serialised, synchronous-looking control over an asynchronous engine.
///
/// Every mutating call is validated, queued onto a single worker, and then
/// blocks until the engine confirms the result (or a bounded timeout).
pub struct PlayerController {
    shared: Arc<ControllerShared>,
    bridge: Arc<CallbackBridge>,
}

impl PlayerController {
    pub fn new(engine: Box<dyn Engine>) -> Result<Self, ControlError> {
        Self::with_config(engine, ControlConfig::default())
    }

    pub fn with_config(engine: Box<dyn Engine>, config: ControlConfig) -> Result<Self, ControlError> {
        let engine_name = engine.name().to_string();
        CapabilityRegistry::global().get_or_probe(engine.as_ref());

        let shared = Arc::new(ControllerShared {
            queue: TaskQueue::new(format!("{}-control", engine_name)),
            dispatcher: ObserverDispatcher::new(&engine_name, config.position_update_interval()),
            logger: ControlLogger::with_capacity(config.event_history),
            state: Mutex::new(ControlState::new(
                config.default_volume.clamp(0.0, 1.0),
                config.looping,
            )),
            sync: SyncPoints::new(),
            engine: Mutex::new(engine),
            engine_released: AtomicBool::new(false),
            engine_name,
            config,
        });

        let bridge = Arc::new(CallbackBridge::new(Arc::downgrade(&shared)));
        let listener: Arc<dyn EngineListener> = bridge.clone();
        shared.engine.lock().register_listener(Some(Arc::downgrade(&listener)));
        shared.queue.start()?;

        debug!("Controller for engine '{}' ready", shared.engine_name);
        Ok(Self { shared, bridge })
    }

    /// Register the observer. Only a weak reference is kept.
    pub fn set_observer(&self, observer: &Arc<dyn PlayerObserver>) {
        self.shared.dispatcher.set_observer(Some(Arc::downgrade(observer)));
    }

    pub fn clear_observer(&self) {
        self.shared.dispatcher.set_observer(None);
    }

    pub fn set_source(&self, source: MediaSource) -> Result<(), ControlError> {
        self.shared
            .submit(Command::SetSource(source), false, self.shared.config.command_timeout())
            .map(|_| ())
    }

    pub fn prepare(&self) -> Result<(), ControlError> {
        self.shared
            .submit(Command::Prepare, false, self.shared.config.prepare_timeout())
            .map(|_| ())
    }

    pub fn play(&self) -> Result<(), ControlError> {
        self.shared
            .submit(Command::Play, false, self.shared.config.command_timeout())
            .map(|_| ())
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        self.pause_with(false)
    }

    /// Pause, optionally discarding every command still queued
    pub fn pause_with(&self, cancel_not_executed: bool) -> Result<(), ControlError> {
        self.shared
            .submit(Command::Pause, cancel_not_executed, self.shared.config.command_timeout())
            .map(|_| ())
    }

    /// Seek and return the position the engine settled on.
    ///
    /// Seeks issued while another is in flight are coalesced: every caller
    /// gets the position confirmed for the newest target.
    pub fn seek(&self, position_ms: i64, mode: SeekMode) -> Result<i64, ControlError> {
        self.shared.submit_seek(position_ms, mode)
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        self.stop_with(true)
    }

    pub fn stop_with(&self, cancel_not_executed: bool) -> Result<(), ControlError> {
        self.shared
            .submit(Command::Stop, cancel_not_executed, self.shared.config.command_timeout())
            .map(|_| ())
    }

    pub fn set_rate(&self, rate: PlaybackRate) -> Result<(), ControlError> {
        self.shared.guard_worker("set_rate")?;
        if self.state() == PlaybackState::Released {
            return Err(ControlError::Released);
        }

        let capabilities = match CapabilityRegistry::global().lookup(&self.shared.engine_name) {
            Some(capabilities) => capabilities,
            None => {
                let engine = self.shared.engine.lock();
                CapabilityRegistry::global().get_or_probe(engine.as_ref())
            }
        };
        if !capabilities.supports_rate(rate) {
            self.shared
                .logger
                .log_command_rejected("set_rate", &format!("{} unsupported", rate));
            return Err(ControlError::UnsupportedRate { rate });
        }

        self.shared
            .submit(Command::SetRate(rate), false, self.shared.config.command_timeout())
            .map(|_| ())
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), ControlError> {
        let volume = volume.clamp(0.0, 1.0);
        self.shared
            .submit(Command::SetVolume(volume), false, self.shared.config.command_timeout())
            .map(|_| ())
    }

    /// Loop on end-of-stream instead of completing. Takes effect immediately.
    pub fn set_looping(&self, looping: bool) -> Result<(), ControlError> {
        let mut state = self.shared.state.lock();
        if state.state == PlaybackState::Released {
            return Err(ControlError::Released);
        }
        state.looping = looping;
        Ok(())
    }

    /// Return to IDLE from any state, including ERROR
    pub fn reset(&self) -> Result<(), ControlError> {
        self.shared
            .submit(Command::Reset, true, self.shared.config.command_timeout())
            .map(|_| ())
    }

    /// Tear everything down. Idempotent; the controller is unusable afterwards.
    pub fn release(&self) -> Result<(), ControlError> {
        let shared = &self.shared;
        shared.guard_worker("release")?;

        let timer = OperationTimer::new("release");
        let ticket = {
            let mut state = shared.state.lock();
            if state.state == PlaybackState::Released || state.releasing {
                return Ok(());
            }
            state.releasing = true;
            shared.logger.log_command_issued("release", state.state);
            state.pending.register(SyncKind::Release, None)
        };

        if shared.enqueue_command(Command::Release, ticket, true).is_ok() {
            if let Err(e) = shared.wait_for(ticket, SyncKind::Release, shared.config.release_timeout()) {
                warn!("Release task did not finish cleanly: {}", e);
            }
        }

        self.bridge.detach();
        if let Err(e) = shared.queue.stop() {
            error!("Failed to stop control queue: {}", e);
        }
        shared.teardown_engine();

        {
            let mut state = shared.state.lock();
            state.target = None;
            state.seek.clear();
            state.pending.complete_all(Err(ControlError::Released), None);
            shared.apply_transition(&mut state, PlaybackState::Released);
            shared.sync.notify_every_kind();
        }

        shared.logger.log_released(timer.finish());
        shared.dispatcher.shutdown();
        Ok(())
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.lock().state
    }

    /// Last known position; never queues
    pub fn position_ms(&self) -> i64 {
        self.shared.state.lock().position_ms
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.shared.state.lock().duration_ms
    }

    pub fn rate(&self) -> PlaybackRate {
        self.shared.state.lock().rate
    }

    pub fn volume(&self) -> f32 {
        self.shared.state.lock().volume
    }

    pub fn is_looping(&self) -> bool {
        self.shared.state.lock().looping
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.state.lock().status()
    }

    pub fn engine_name(&self) -> &str {
        &self.shared.engine_name
    }

    pub fn recent_events(&self, count: usize) -> Vec<ControlEvent> {
        self.shared.logger.get_recent_events(count)
    }

    pub fn event_statistics(&self) -> EventStatistics {
        self.shared.logger.get_event_statistics()
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Controller dropped without release: {}", e);
        }
    }
}

impl ControllerShared {
    fn guard_worker(&self, operation: &'static str) -> Result<(), ControlError> {
        if self.queue.is_worker_thread() {
            error!("{} called from the control worker thread", operation);
            return Err(ControlError::InvalidOperation(format!(
                "{} would block the control worker thread",
                operation
            )));
        }
        Ok(())
    }

    /// Validate, queue and wait for one command
    fn submit(self: &Arc<Self>, command: Command, cancel_not_executed: bool, timeout: Duration) -> Outcome {
        let operation = command.name();
        let kind = command.sync_kind();
        self.guard_worker(operation)?;

        let timer = OperationTimer::new(operation);
        let (ticket, joined) = {
            let mut state = self.state.lock();
            let joined = match state.validate(&command) {
                Ok(Validation::Proceed) => None,
                Ok(Validation::AlreadyIn(current)) => {
                    trace!("{} is a no-op in {}", operation, current);
                    return Ok(Completion::State(current));
                }
                Ok(Validation::AwaitTarget(next)) => {
                    trace!("{} joins the pending {} target", operation, next);
                    state.target.map(|target| target.generation)
                }
                Err(e) => {
                    drop(state);
                    self.logger.log_command_rejected(operation, &e.to_string());
                    return Err(e);
                }
            };
            self.logger.log_command_issued(operation, state.state);
            let ticket = match joined {
                Some(generation) => state.pending.register_joined(kind, command.confirmation(), generation),
                None => state.pending.register(kind, command.confirmation()),
            };
            (ticket, joined.is_some())
        };

        if !joined {
            self.enqueue_command(command, ticket, cancel_not_executed)?;
        }
        let result = self.wait_for(ticket, kind, timeout);
        self.log_outcome(operation, &result, timer);
        result
    }

    fn submit_seek(self: &Arc<Self>, position_ms: i64, mode: SeekMode) -> Result<i64, ControlError> {
        self.guard_worker("seek")?;

        let timer = OperationTimer::new("seek");
        let (ticket, needs_task) = {
            let mut state = self.state.lock();
            if let Err(e) = state.validate(&Command::Seek { position_ms, mode }) {
                drop(state);
                self.logger.log_command_rejected("seek", &e.to_string());
                return Err(e);
            }

            let target = state.clamp_position(position_ms);
            state.seek.request(target, mode);
            let ticket = state.pending.register(SyncKind::Seek, None);

            // An in-flight seek picks the new target up when it completes
            let needs_task = !state.seek.task_pending && state.seek.in_flight.is_none();
            if needs_task {
                state.seek.task_pending = true;
            }
            self.logger.log_command_issued("seek", state.state);
            (ticket, needs_task)
        };

        if needs_task {
            if let Err(e) = self.enqueue_seek_task() {
                return Err(self.abandon_ticket(ticket, e));
            }
        }

        let result = self.wait_for(ticket, SyncKind::Seek, self.config.command_timeout());
        self.log_outcome("seek", &result, timer);
        match result? {
            Completion::Position(position) => Ok(position),
            _ => Ok(self.state.lock().position_ms),
        }
    }

    fn enqueue_command(self: &Arc<Self>, command: Command, ticket: u64, cancel_not_executed: bool) -> Result<(), ControlError> {
        let kind = command.sync_kind();
        let runner = Arc::clone(self);
        let canceler = Arc::clone(self);
        let task = TaskHandler::new(command.name(), move || runner.execute(command, ticket))
            .with_cancel(move || canceler.cancel_ticket(ticket, kind));

        self.queue
            .enqueue(task, cancel_not_executed)
            .map_err(|e| self.abandon_ticket(ticket, e))
    }

    fn enqueue_seek_task(self: &Arc<Self>) -> Result<(), ControlError> {
        let runner = Arc::clone(self);
        let canceler = Arc::clone(self);
        let task = TaskHandler::new("seek", move || runner.execute_seek())
            .with_cancel(move || canceler.cancel_seek_task());
        self.queue.enqueue(task, false)
    }

    /// Forget a ticket whose task never made it into the queue
    fn abandon_ticket(&self, ticket: u64, error: ControlError) -> ControlError {
        let mut state = self.state.lock();
        state.pending.remove(ticket);
        if state.state == PlaybackState::Released || state.releasing {
            ControlError::Released
        } else {
            error
        }
    }

    fn wait_for(&self, ticket: u64, kind: SyncKind, timeout: Duration) -> Outcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.pending.take(ticket) {
                return outcome;
            }
            if self.sync.wait_until(kind, &mut state, deadline) {
                if let Some(outcome) = state.pending.take(ticket) {
                    return outcome;
                }
                // The command itself stays queued or in flight
                state.pending.remove(ticket);
                self.expire_waiter(&mut state, kind);
                drop(state);
                self.logger.log_command_timeout(kind.operation(), timeout);
                return Err(ControlError::Timeout {
                    operation: kind.operation(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Drop bookkeeping that only timed-out callers were waiting on.
    ///
    /// A late confirmation is still applied as an unsolicited report, but a
    /// repeated command is issued to the engine again instead of treating the
    /// unconfirmed target as reached.
    fn expire_waiter(&self, state: &mut ControlState, kind: SyncKind) {
        if let Some(target) = state.target {
            if target.kind == kind && state.pending.waiting_on_target(target.ticket, target.generation) == 0 {
                debug!("Dropping unconfirmed {} target after timeout", target.state);
                state.target = None;
            }
        }
        if kind == SyncKind::Seek && state.pending.open_count(SyncKind::Seek) == 0 {
            if let Some(request) = state.seek.abandon() {
                debug!("Abandoning unconfirmed seek to {}ms", request.position_ms);
            }
        }
    }

    fn log_outcome(&self, operation: &'static str, result: &Outcome, timer: OperationTimer) {
        match result {
            Ok(_) => self.logger.log_command_completed(operation, timer.finish()),
            Err(ControlError::Timeout { .. }) => {}
            Err(ControlError::Canceled { .. }) => {
                self.logger.log_command_canceled(operation, "superseded before confirmation")
            }
            Err(e) => self.logger.log_command_rejected(operation, &e.to_string()),
        }
    }

    fn cancel_ticket(&self, ticket: u64, kind: SyncKind) {
        let mut state = self.state.lock();
        let outcome = Err(ControlError::Canceled {
            operation: kind.operation(),
        });
        if state.pending.complete(ticket, outcome) {
            self.sync.notify(kind);
        }
    }

    fn cancel_seek_task(&self) {
        let mut state = self.state.lock();
        state.seek.task_pending = false;
        if state.seek.in_flight.is_none() {
            state.seek.latest = None;
        }
        let outcome = Err(ControlError::Canceled { operation: "seek" });
        if state.pending.complete_kind(SyncKind::Seek, outcome, None) > 0 {
            self.sync.notify(SyncKind::Seek);
        }
    }

    fn finish(&self, state: &mut ControlState, ticket: u64, kind: SyncKind, outcome: Outcome) {
        if state.pending.complete(ticket, outcome) {
            self.sync.notify(kind);
        }
    }

    /// Change state, recording and forwarding the transition
    fn apply_transition(&self, state: &mut ControlState, next: PlaybackState) {
        if let Some((previous, current)) = state.transition(next) {
            self.logger.log_state_changed(previous, current);
            self.dispatcher
                .forward(PlayerEvent::StateChanged { previous, current });
        }
    }

    /// Fail waiters that a teardown command makes pointless
    fn abandon_waiters(&self, state: &mut ControlState, command: &Command, ticket: u64) {
        for kind in SyncKind::ALL {
            let abandoned = match command {
                Command::Stop => kind.is_transport(),
                _ => kind != SyncKind::Release || *command == Command::Release,
            };
            if !abandoned {
                continue;
            }
            let outcome = Err(ControlError::Canceled {
                operation: kind.operation(),
            });
            if state.pending.complete_kind(kind, outcome, Some(ticket)) > 0 {
                self.logger
                    .log_command_canceled(kind.operation(), &format!("superseded by {}", command.name()));
                self.sync.notify(kind);
            }
        }
        state.seek.clear();
    }

    fn call_engine(engine: &mut dyn Engine, command: &Command) -> EngineResult {
        match command {
            Command::SetSource(source) => engine.set_source(source),
            Command::Prepare => engine.prepare(),
            Command::Play => engine.play(),
            Command::Pause => engine.pause(),
            Command::Seek { position_ms, mode } => engine.seek(*position_ms, *mode),
            Command::Stop => engine.stop(),
            Command::SetRate(rate) => engine.set_rate(*rate),
            Command::SetVolume(volume) => engine.set_volume(*volume),
            Command::Reset => engine.reset(),
            Command::Release => {
                engine.register_listener(None);
                engine.release();
                Ok(())
            }
        }
    }

    /// Deregister from and release the engine exactly once
    fn teardown_engine(&self) {
        if self.engine_released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut engine = self.engine.lock();
        let _ = Self::call_engine(engine.as_mut(), &Command::Release);
    }

    /// Worker-side execution of a queued command
    fn execute(self: &Arc<Self>, command: Command, ticket: u64) {
        let operation = command.name();
        let kind = command.sync_kind();

        let (generation, before) = {
            let mut state = self.state.lock();
            match state.validate(&command) {
                Ok(Validation::Proceed) => {}
                Ok(Validation::AlreadyIn(current)) => {
                    self.finish(&mut state, ticket, kind, Ok(Completion::State(current)));
                    return;
                }
                Ok(Validation::AwaitTarget(next)) => {
                    // Confirmed together with the target an earlier command set
                    if let Some(target) = state.target {
                        state.pending.join(ticket, target.generation);
                    }
                    trace!("{} dequeued while {} is pending", operation, next);
                    return;
                }
                Err(e) => {
                    debug!("{} no longer valid when dequeued: {}", operation, e);
                    self.finish(&mut state, ticket, kind, Err(e));
                    return;
                }
            }

            let before = state.state;
            if command.is_teardown() {
                self.abandon_waiters(&mut state, &command, ticket);
            }
            if matches!(command, Command::Reset | Command::Release) {
                state.target = None;
                state.generation += 1;
            }

            let generation = command.confirmation().map(|confirmation| {
                if let Some(previous) = state.target.take() {
                    let outcome = Err(ControlError::Canceled {
                        operation: previous.kind.operation(),
                    });
                    if state
                        .pending
                        .complete_target(previous.ticket, previous.generation, outcome)
                        > 0
                    {
                        self.logger.log_command_canceled(
                            previous.kind.operation(),
                            &format!("superseded by {}", operation),
                        );
                        self.sync.notify(previous.kind);
                    }
                }
                state.generation += 1;
                let generation = state.generation;
                state.target = Some(PendingTarget {
                    state: confirmation,
                    kind,
                    ticket,
                    generation,
                });
                generation
            });

            if command == Command::Prepare {
                self.apply_transition(&mut state, PlaybackState::Preparing);
            }
            (generation, before)
        };

        if command == Command::Release {
            self.teardown_engine();
            let mut state = self.state.lock();
            self.finish(&mut state, ticket, kind, Ok(Completion::Done));
            return;
        }

        let (result, duration) = {
            let mut engine = self.engine.lock();
            let result = Self::call_engine(engine.as_mut(), &command);
            (result, engine.duration_ms())
        };

        let mut state = self.state.lock();
        if let Err(e) = result {
            if generation.is_some() && state.target.map(|t| t.generation) == generation {
                state.target = None;
            }
            if command == Command::Prepare && state.state == PlaybackState::Preparing {
                self.apply_transition(&mut state, before);
            }
            warn!("Engine rejected {}: {}", operation, e);
            let outcome = Err(ControlError::EngineRejected {
                operation,
                code: e.code,
            });
            let woken = match generation {
                Some(generation) => state.pending.complete_target(ticket, generation, outcome),
                None => usize::from(state.pending.complete(ticket, outcome)),
            };
            if woken > 0 {
                self.sync.notify(kind);
            }
            return;
        }

        match command {
            Command::SetSource(source) => {
                state.source = Some(source);
                state.duration_ms = duration;
                state.position_ms = 0;
                self.apply_transition(&mut state, PlaybackState::Initialized);
                self.finish(&mut state, ticket, kind, Ok(Completion::State(PlaybackState::Initialized)));
            }
            Command::Prepare => {
                if duration.is_some() {
                    state.duration_ms = duration;
                }
            }
            Command::SetRate(rate) => {
                state.rate = rate;
                self.dispatcher.forward(PlayerEvent::RateChanged { rate });
                self.finish(&mut state, ticket, kind, Ok(Completion::Done));
            }
            Command::SetVolume(volume) => {
                state.volume = volume;
                self.finish(&mut state, ticket, kind, Ok(Completion::Done));
            }
            Command::Reset => {
                state.source = None;
                state.duration_ms = None;
                state.position_ms = 0;
                state.last_error = None;
                state.rate = PlaybackRate::default();
                state.seek.clear();
                self.apply_transition(&mut state, PlaybackState::Idle);
                self.finish(&mut state, ticket, kind, Ok(Completion::State(PlaybackState::Idle)));
            }
            // Confirmed later by the engine's state callback
            Command::Play | Command::Pause | Command::Stop => {}
            Command::Seek { .. } | Command::Release => {}
        }
    }

    /// Worker-side execution of the newest seek request
    fn execute_seek(self: &Arc<Self>) {
        let request = {
            let mut state = self.state.lock();
            state.seek.task_pending = false;
            let request = match state.seek.latest {
                Some(request) => request,
                None => return,
            };

            let effective = state.effective_state();
            if state.state == PlaybackState::Error || !effective.is_seekable() {
                state.seek.clear();
                let outcome = Err(ControlError::InvalidState {
                    operation: "seek",
                    state: effective,
                });
                if state.pending.complete_kind(SyncKind::Seek, outcome, None) > 0 {
                    self.sync.notify(SyncKind::Seek);
                }
                return;
            }
            state.seek.in_flight = Some(request);
            request
        };

        let result = {
            let mut engine = self.engine.lock();
            Self::call_engine(
                engine.as_mut(),
                &Command::Seek {
                    position_ms: request.position_ms,
                    mode: request.mode,
                },
            )
        };

        let code = match result {
            Ok(()) => return,
            Err(e) => e.code,
        };

        let follow_up = {
            let mut state = self.state.lock();
            if state.seek.in_flight.map(|r| r.seq) != Some(request.seq) {
                return;
            }
            state.seek.in_flight = None;
            if state.seek.superseded(&request) {
                state.seek.task_pending = true;
                true
            } else {
                state.seek.latest = None;
                let outcome = Err(ControlError::EngineRejected {
                    operation: "seek",
                    code,
                });
                if state.pending.complete_kind(SyncKind::Seek, outcome, None) > 0 {
                    self.sync.notify(SyncKind::Seek);
                }
                false
            }
        };
        if follow_up {
            self.follow_up_seek();
        }
    }

    fn follow_up_seek(self: &Arc<Self>) {
        if let Err(e) = self.enqueue_seek_task() {
            debug!("Follow-up seek not queued: {}", e);
        }
    }

    /// Entry point for the callback bridge
    pub(crate) fn handle_engine_event(self: &Arc<Self>, event: EngineEvent) {
        let follow_up = {
            let mut state = self.state.lock();
            if state.state == PlaybackState::Released {
                trace!("Ignoring {:?} after release", event);
                return;
            }

            match event {
                EngineEvent::StateChanged(next) => {
                    self.on_state_changed(&mut state, next);
                    false
                }
                EngineEvent::SeekDone { position_ms } => self.on_seek_done(&mut state, position_ms),
                EngineEvent::PositionUpdated { position_ms } => {
                    if state.seek.in_flight.is_none() && state.state != PlaybackState::Error {
                        state.position_ms = position_ms;
                        self.dispatcher.forward(PlayerEvent::PositionUpdated {
                            position_ms,
                            duration_ms: state.duration_ms,
                        });
                    }
                    false
                }
                EngineEvent::EndOfStream => self.on_end_of_stream(&mut state),
                EngineEvent::Error { kind, code } => {
                    self.on_error(&mut state, kind, code);
                    false
                }
                EngineEvent::VolumeChanged { volume } => {
                    state.volume = volume;
                    self.dispatcher.forward(PlayerEvent::VolumeChanged { volume });
                    false
                }
            }
        };

        if follow_up {
            self.follow_up_seek();
        }
    }

    fn on_state_changed(&self, state: &mut ControlState, next: PlaybackState) {
        if next == PlaybackState::Error {
            self.on_error(state, EngineErrorKind::Unknown, 0);
            return;
        }

        match state.target {
            Some(target) if target.state == next => {
                state.target = None;
                if next == PlaybackState::Stopped {
                    state.position_ms = 0;
                }
                self.apply_transition(state, next);
                if state
                    .pending
                    .complete_kind(target.kind, Ok(Completion::State(next)), None)
                    > 0
                {
                    self.sync.notify(target.kind);
                }
            }
            Some(target) => {
                self.logger.log_stale_callback(format!(
                    "{} reported while waiting for {} (generation {})",
                    next, target.state, target.generation
                ));
            }
            None if state.state == next => {
                trace!("Duplicate state report {}", next);
            }
            None => {
                let unsolicited_allowed = state.state != PlaybackState::Error
                    && !matches!(next, PlaybackState::Idle | PlaybackState::Released)
                    && state.state.can_transition_to(next);
                if unsolicited_allowed {
                    self.apply_transition(state, next);
                } else {
                    self.logger
                        .log_stale_callback(format!("{} reported in {}", next, state.state));
                }
            }
        }
    }

    /// Returns true when a follow-up seek must be queued
    fn on_seek_done(&self, state: &mut ControlState, position_ms: i64) -> bool {
        let in_flight = match state.seek.in_flight.take() {
            Some(request) => request,
            None => {
                self.logger
                    .log_stale_callback(format!("seek done at {}ms with no seek in flight", position_ms));
                return false;
            }
        };
        state.position_ms = position_ms;

        if state.seek.superseded(&in_flight) {
            if let Some(latest) = state.seek.latest {
                self.logger.log_seek_coalesced(position_ms, latest.position_ms);
            }
            if state.seek.task_pending {
                return false;
            }
            state.seek.task_pending = true;
            return true;
        }

        state.seek.latest = None;
        if state
            .pending
            .complete_kind(SyncKind::Seek, Ok(Completion::Position(position_ms)), None)
            > 0
        {
            self.sync.notify(SyncKind::Seek);
        }
        self.dispatcher.forward(PlayerEvent::SeekDone { position_ms });
        false
    }

    /// Returns true when the loop-back seek must be queued
    fn on_end_of_stream(&self, state: &mut ControlState) -> bool {
        if state.state != PlaybackState::Started {
            self.logger
                .log_stale_callback(format!("end of stream reported in {}", state.state));
            return false;
        }

        if state.looping {
            self.dispatcher.forward(PlayerEvent::EndOfStream { looping: true });
            state.seek.request(0, SeekMode::PreviousSync);
            if state.seek.task_pending || state.seek.in_flight.is_some() {
                return false;
            }
            state.seek.task_pending = true;
            return true;
        }

        if let Some(duration) = state.duration_ms {
            state.position_ms = duration;
        }
        self.apply_transition(state, PlaybackState::PlaybackComplete);
        self.dispatcher.forward(PlayerEvent::EndOfStream { looping: false });
        false
    }

    fn on_error(&self, state: &mut ControlState, kind: EngineErrorKind, code: i32) {
        self.logger.log_engine_error(kind, code);
        state.last_error = Some((kind, code));
        state.target = None;
        state.seek.clear();

        self.dispatcher.forward(PlayerEvent::Error { kind, code });
        self.apply_transition(state, PlaybackState::Error);

        let woken = state
            .pending
            .complete_all(Err(ControlError::EngineFailure { kind, code }), None);
        if woken > 0 {
            debug!("Engine error woke {} waiters", woken);
        }
        self.sync.notify_every_kind();
    }
}
