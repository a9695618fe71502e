//! Scriptable in-process engine.
//!
//! Confirms commands from its own callback thread after configurable delays,
//! which is enough to drive the controller through every transition without
//! a real media pipeline. [`EngineProbe`] lets tests inject unsolicited
//! events and observe how the engine was called.

use super::{Engine, EngineError, EngineEvent, EngineListener, EngineResult};
use crate::models::{MediaSource, PlaybackRate, PlaybackState, SeekMode};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Behaviour knobs for [`SimulatedEngine`]
#[derive(Debug, Clone)]
pub struct SimulatedEngineConfig {
    pub name: String,
    pub duration_ms: i64,
    /// Delay before a state confirmation is delivered
    pub confirm_delay: Duration,
    /// Delay before `SeekDone` is delivered
    pub seek_delay: Duration,
    /// Time every primitive spends inside the engine
    pub call_latency: Duration,
    /// Keyframe spacing used to resolve sync seek modes
    pub keyframe_interval_ms: i64,
    /// Period of position updates while started
    pub position_interval: Option<Duration>,
    /// Emit end-of-stream when the position reaches the duration
    pub auto_complete: bool,
    /// Deliver confirmations at all
    pub confirmations: bool,
    pub supported_rates: Vec<PlaybackRate>,
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        Self {
            name: "simulated".to_string(),
            duration_ms: 30_000,
            confirm_delay: Duration::from_millis(10),
            seek_delay: Duration::from_millis(10),
            call_latency: Duration::ZERO,
            keyframe_interval_ms: 1_000,
            position_interval: Some(Duration::from_millis(250)),
            auto_complete: true,
            confirmations: true,
            supported_rates: PlaybackRate::ALL.to_vec(),
        }
    }
}

enum SimMessage {
    Emit { at: Instant, event: EngineEvent },
    Shutdown,
}

#[derive(Debug)]
struct SimPlayback {
    source: Option<MediaSource>,
    playing: bool,
    /// Reached the end while playing; cleared by play, seek and stop
    completed: bool,
    position_ms: i64,
    anchor: Option<Instant>,
    rate: f32,
}

impl SimPlayback {
    fn current_position(&self, duration_ms: i64) -> i64 {
        let mut position = self.position_ms;
        if self.playing {
            if let Some(anchor) = self.anchor {
                position += (anchor.elapsed().as_millis() as f64 * self.rate as f64) as i64;
            }
        }
        position.clamp(0, duration_ms)
    }

    /// Fold elapsed play time into the stored position
    fn freeze(&mut self, duration_ms: i64) {
        self.position_ms = self.current_position(duration_ms);
        self.anchor = if self.playing { Some(Instant::now()) } else { None };
    }
}

struct SimShared {
    listener: Mutex<Option<Weak<dyn EngineListener>>>,
    playback: Mutex<SimPlayback>,
    in_call: AtomicUsize,
    max_in_call: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
    rejected: Mutex<HashSet<&'static str>>,
    confirmations: AtomicBool,
}

impl SimShared {
    fn deliver(&self, event: EngineEvent) {
        let listener = self.listener.lock().as_ref().and_then(Weak::upgrade);
        match listener {
            Some(listener) => listener.on_engine_event(event),
            None => debug!("Simulated engine dropped {:?}: no listener", event),
        }
    }
}

struct CallGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Engine implementation backed by timers instead of a media pipeline
pub struct SimulatedEngine {
    config: SimulatedEngineConfig,
    shared: Arc<SimShared>,
    sender: Sender<SimMessage>,
    event_thread: Option<JoinHandle<()>>,
    event_thread_id: Option<ThreadId>,
}

impl SimulatedEngine {
    pub fn new(config: SimulatedEngineConfig) -> Self {
        let shared = Arc::new(SimShared {
            listener: Mutex::new(None),
            playback: Mutex::new(SimPlayback {
                source: None,
                playing: false,
                completed: false,
                position_ms: 0,
                anchor: None,
                rate: 1.0,
            }),
            in_call: AtomicUsize::new(0),
            max_in_call: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            confirmations: AtomicBool::new(config.confirmations),
        });

        let (sender, receiver) = channel::unbounded();
        let thread_shared = Arc::clone(&shared);
        let thread_config = config.clone();
        let (event_thread, event_thread_id) = match thread::Builder::new()
            .name(format!("{}-events", config.name))
            .spawn(move || Self::event_loop(thread_shared, receiver, thread_config))
        {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), Some(id))
            }
            Err(e) => {
                warn!("Simulated engine could not spawn its callback thread: {}", e);
                (None, None)
            }
        };

        Self {
            config,
            shared,
            sender,
            event_thread,
            event_thread_id,
        }
    }

    /// Handle for injecting events and inspecting calls
    pub fn probe(&self) -> EngineProbe {
        EngineProbe {
            shared: Arc::clone(&self.shared),
            sender: self.sender.clone(),
        }
    }

    fn event_loop(shared: Arc<SimShared>, receiver: Receiver<SimMessage>, config: SimulatedEngineConfig) {
        let mut next_tick = config.position_interval.map(|interval| Instant::now() + interval);

        loop {
            let message = match next_tick {
                Some(deadline) => receiver.recv_deadline(deadline),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match message {
                Ok(SimMessage::Emit { at, event }) => {
                    let now = Instant::now();
                    if at > now {
                        thread::sleep(at - now);
                    }
                    shared.deliver(event);
                }
                Ok(SimMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if let (Some(deadline), Some(interval)) = (next_tick, config.position_interval) {
                if Instant::now() >= deadline {
                    Self::tick(&shared, &config);
                    next_tick = Some(Instant::now() + interval);
                }
            }
        }
        debug!("Simulated engine '{}' callback thread exiting", config.name);
    }

    fn tick(shared: &SimShared, config: &SimulatedEngineConfig) {
        let (position, completed) = {
            let mut playback = shared.playback.lock();
            if !playback.playing || playback.completed {
                return;
            }
            let position = playback.current_position(config.duration_ms);
            let completed = config.auto_complete && position >= config.duration_ms;
            if completed {
                playback.completed = true;
                playback.position_ms = config.duration_ms;
                playback.anchor = None;
            }
            (position, completed)
        };

        shared.deliver(EngineEvent::PositionUpdated { position_ms: position });
        if completed {
            shared.deliver(EngineEvent::EndOfStream);
        }
    }

    fn enter(&self, operation: &'static str) -> Result<CallGuard<'_>, EngineError> {
        let now = self.shared.in_call.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_call.fetch_max(now, Ordering::SeqCst);
        self.shared.calls.lock().push(operation);
        let guard = CallGuard {
            counter: &self.shared.in_call,
        };

        if !self.config.call_latency.is_zero() {
            thread::sleep(self.config.call_latency);
        }
        if self.shared.rejected.lock().contains(operation) {
            return Err(EngineError::new(-1, format!("{} rejected by simulated engine", operation)));
        }
        Ok(guard)
    }

    fn schedule(&self, delay: Duration, event: EngineEvent) {
        let _ = self.sender.send(SimMessage::Emit {
            at: Instant::now() + delay,
            event,
        });
    }

    fn confirm(&self, delay: Duration, event: EngineEvent) {
        if self.shared.confirmations.load(Ordering::SeqCst) {
            self.schedule(delay, event);
        }
    }

    fn resolve_seek(&self, position_ms: i64, mode: SeekMode) -> i64 {
        let interval = self.config.keyframe_interval_ms.max(1);
        let resolved = match mode {
            SeekMode::PreviousSync => position_ms / interval * interval,
            SeekMode::NextSync => (position_ms + interval - 1) / interval * interval,
            SeekMode::ClosestSync => (position_ms + interval / 2) / interval * interval,
            SeekMode::Closest => position_ms,
        };
        resolved.clamp(0, self.config.duration_ms)
    }
}

impl Engine for SimulatedEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn set_source(&mut self, source: &MediaSource) -> EngineResult {
        let _guard = self.enter("set_source")?;
        let mut playback = self.shared.playback.lock();
        playback.source = Some(source.clone());
        playback.position_ms = 0;
        Ok(())
    }

    fn prepare(&mut self) -> EngineResult {
        let _guard = self.enter("prepare")?;
        if self.shared.playback.lock().source.is_none() {
            return Err(EngineError::new(-3, "no source"));
        }
        self.confirm(
            self.config.confirm_delay,
            EngineEvent::StateChanged(PlaybackState::Prepared),
        );
        Ok(())
    }

    fn play(&mut self) -> EngineResult {
        let _guard = self.enter("play")?;
        {
            let mut playback = self.shared.playback.lock();
            if playback.completed || playback.position_ms >= self.config.duration_ms {
                playback.position_ms = 0;
            }
            playback.completed = false;
            playback.playing = true;
            playback.anchor = Some(Instant::now());
        }
        self.confirm(
            self.config.confirm_delay,
            EngineEvent::StateChanged(PlaybackState::Started),
        );
        Ok(())
    }

    fn pause(&mut self) -> EngineResult {
        let _guard = self.enter("pause")?;
        {
            let mut playback = self.shared.playback.lock();
            if !playback.completed {
                playback.freeze(self.config.duration_ms);
            }
            playback.playing = false;
            playback.anchor = None;
        }
        self.confirm(
            self.config.confirm_delay,
            EngineEvent::StateChanged(PlaybackState::Paused),
        );
        Ok(())
    }

    fn stop(&mut self) -> EngineResult {
        let _guard = self.enter("stop")?;
        {
            let mut playback = self.shared.playback.lock();
            playback.playing = false;
            playback.completed = false;
            playback.anchor = None;
            playback.position_ms = 0;
        }
        self.confirm(
            self.config.confirm_delay,
            EngineEvent::StateChanged(PlaybackState::Stopped),
        );
        Ok(())
    }

    fn seek(&mut self, position_ms: i64, mode: SeekMode) -> EngineResult {
        let _guard = self.enter("seek")?;
        let resolved = self.resolve_seek(position_ms, mode);
        {
            let mut playback = self.shared.playback.lock();
            playback.position_ms = resolved;
            playback.completed = false;
            if playback.playing {
                playback.anchor = Some(Instant::now());
            }
        }
        self.confirm(self.config.seek_delay, EngineEvent::SeekDone { position_ms: resolved });
        Ok(())
    }

    fn set_rate(&mut self, rate: PlaybackRate) -> EngineResult {
        let _guard = self.enter("set_rate")?;
        if !self.config.supported_rates.contains(&rate) {
            return Err(EngineError::new(-2, format!("rate {} unsupported", rate)));
        }
        let mut playback = self.shared.playback.lock();
        playback.freeze(self.config.duration_ms);
        playback.rate = rate.as_f32();
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> EngineResult {
        let _guard = self.enter("set_volume")?;
        self.schedule(Duration::ZERO, EngineEvent::VolumeChanged { volume });
        Ok(())
    }

    fn reset(&mut self) -> EngineResult {
        let _guard = self.enter("reset")?;
        let mut playback = self.shared.playback.lock();
        playback.source = None;
        playback.playing = false;
        playback.completed = false;
        playback.anchor = None;
        playback.position_ms = 0;
        playback.rate = 1.0;
        Ok(())
    }

    fn release(&mut self) {
        *self.shared.listener.lock() = None;
        self.shared.playback.lock().playing = false;
        let _ = self.sender.send(SimMessage::Shutdown);
        if let Some(handle) = self.event_thread.take() {
            if self.event_thread_id == Some(thread::current().id()) {
                // Released from a callback: the loop exits after this event
                return;
            }
            let _ = handle.join();
        }
    }

    fn duration_ms(&self) -> Option<i64> {
        self.shared
            .playback
            .lock()
            .source
            .as_ref()
            .map(|_| self.config.duration_ms)
    }

    fn supported_rates(&self) -> Vec<PlaybackRate> {
        self.config.supported_rates.clone()
    }

    fn register_listener(&mut self, listener: Option<Weak<dyn EngineListener>>) {
        *self.shared.listener.lock() = listener;
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Test and demo handle onto a [`SimulatedEngine`]
#[derive(Clone)]
pub struct EngineProbe {
    shared: Arc<SimShared>,
    sender: Sender<SimMessage>,
}

impl EngineProbe {
    /// Deliver an unsolicited event from the engine's callback thread
    pub fn inject(&self, event: EngineEvent) {
        self.inject_after(Duration::ZERO, event);
    }

    pub fn inject_after(&self, delay: Duration, event: EngineEvent) {
        let _ = self.sender.send(SimMessage::Emit {
            at: Instant::now() + delay,
            event,
        });
    }

    /// Make every future call of `operation` fail synchronously
    pub fn reject(&self, operation: &'static str) {
        self.shared.rejected.lock().insert(operation);
    }

    pub fn accept(&self, operation: &'static str) {
        self.shared.rejected.lock().remove(operation);
    }

    /// Toggle delivery of state and seek confirmations
    pub fn set_confirmations(&self, enabled: bool) {
        self.shared.confirmations.store(enabled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.shared.calls.lock().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.shared.calls.lock().iter().filter(|call| **call == operation).count()
    }

    /// Highest number of engine primitives observed running at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.shared.max_in_call.load(Ordering::SeqCst)
    }

    /// Started and not parked at the end of the media
    pub fn is_playing(&self) -> bool {
        let playback = self.shared.playback.lock();
        playback.playing && !playback.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelListener {
        tx: Mutex<mpsc::Sender<EngineEvent>>,
    }

    impl EngineListener for ChannelListener {
        fn on_engine_event(&self, event: EngineEvent) {
            let _ = self.tx.lock().send(event);
        }
    }

    fn engine_with_listener(
        config: SimulatedEngineConfig,
    ) -> (SimulatedEngine, Arc<ChannelListener>, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel();
        let listener = Arc::new(ChannelListener { tx: Mutex::new(tx) });
        let mut engine = SimulatedEngine::new(config);
        let weak: Weak<dyn EngineListener> = Arc::downgrade(&(listener.clone() as Arc<dyn EngineListener>));
        engine.register_listener(Some(weak));
        (engine, listener, rx)
    }

    fn quiet_config() -> SimulatedEngineConfig {
        SimulatedEngineConfig {
            position_interval: None,
            ..SimulatedEngineConfig::default()
        }
    }

    #[test]
    fn test_prepare_requires_source() {
        let (mut engine, _listener, _rx) = engine_with_listener(quiet_config());
        assert!(engine.prepare().is_err());
        assert_eq!(engine.duration_ms(), None);

        engine.set_source(&MediaSource::new("sim://track")).unwrap();
        assert!(engine.prepare().is_ok());
        assert_eq!(engine.duration_ms(), Some(30_000));
    }

    #[test]
    fn test_confirmations_are_delivered_in_order() {
        let (mut engine, _listener, rx) = engine_with_listener(quiet_config());
        engine.set_source(&MediaSource::new("sim://track")).unwrap();
        engine.prepare().unwrap();
        engine.play().unwrap();
        engine.pause().unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), EngineEvent::StateChanged(PlaybackState::Prepared));
        assert_eq!(rx.recv_timeout(timeout).unwrap(), EngineEvent::StateChanged(PlaybackState::Started));
        assert_eq!(rx.recv_timeout(timeout).unwrap(), EngineEvent::StateChanged(PlaybackState::Paused));
    }

    #[test]
    fn test_seek_modes_snap_to_keyframes() {
        let engine = SimulatedEngine::new(quiet_config());
        assert_eq!(engine.resolve_seek(5_400, SeekMode::PreviousSync), 5_000);
        assert_eq!(engine.resolve_seek(5_400, SeekMode::NextSync), 6_000);
        assert_eq!(engine.resolve_seek(5_600, SeekMode::ClosestSync), 6_000);
        assert_eq!(engine.resolve_seek(5_400, SeekMode::Closest), 5_400);
        assert_eq!(engine.resolve_seek(99_000, SeekMode::Closest), 30_000);
    }

    #[test]
    fn test_probe_rejection_and_call_log() {
        let (mut engine, _listener, _rx) = engine_with_listener(quiet_config());
        let probe = engine.probe();
        probe.reject("play");

        assert!(engine.play().is_err());
        probe.accept("play");
        assert!(engine.play().is_ok());

        assert_eq!(probe.call_count("play"), 2);
        assert_eq!(probe.max_concurrent_calls(), 1);
    }

    #[test]
    fn test_unsupported_rate_is_rejected() {
        let config = SimulatedEngineConfig {
            supported_rates: vec![PlaybackRate::X1_00],
            ..quiet_config()
        };
        let mut engine = SimulatedEngine::new(config);
        assert!(engine.set_rate(PlaybackRate::X2_00).is_err());
        assert!(engine.set_rate(PlaybackRate::X1_00).is_ok());
    }

    #[test]
    fn test_auto_complete_emits_end_of_stream() {
        let config = SimulatedEngineConfig {
            duration_ms: 60,
            position_interval: Some(Duration::from_millis(20)),
            ..SimulatedEngineConfig::default()
        };
        let (mut engine, _listener, rx) = engine_with_listener(config);
        engine.set_source(&MediaSource::new("sim://short")).unwrap();
        engine.play().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut saw_eos = false;
        while Instant::now() < deadline {
            if let Ok(EngineEvent::EndOfStream) = rx.recv_timeout(Duration::from_millis(50)) {
                saw_eos = true;
                break;
            }
        }
        assert!(saw_eos);
        assert!(!engine.probe().is_playing());
    }

    #[test]
    fn test_no_events_after_listener_dropped() {
        let (mut engine, listener, rx) = engine_with_listener(quiet_config());
        drop(listener);
        engine.set_source(&MediaSource::new("sim://track")).unwrap();
        engine.prepare().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
