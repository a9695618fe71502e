//! Engine callbacks in, observer notifications out.
//!
//! [`CallbackBridge`] is what the engine holds (weakly). It applies each
//! event to the controller under the state lock and never touches the task
//! queue's blocking paths. [`ObserverDispatcher`] moves notifications onto
//! a dedicated thread so a slow observer cannot stall the engine.

use super::controller::ControllerShared;
use crate::engine::{EngineEvent, EngineListener};
use crate::models::{EngineErrorKind, PlaybackRate, PlaybackState};
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Notifications delivered to the registered observer
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged {
        previous: PlaybackState,
        current: PlaybackState,
    },
    SeekDone {
        position_ms: i64,
    },
    PositionUpdated {
        position_ms: i64,
        duration_ms: Option<i64>,
    },
    EndOfStream {
        looping: bool,
    },
    Error {
        kind: EngineErrorKind,
        code: i32,
    },
    RateChanged {
        rate: PlaybackRate,
    },
    VolumeChanged {
        volume: f32,
    },
}

/// External consumer of controller notifications.
///
/// Called on the dispatcher thread, never on the engine's callback thread,
/// so implementations may call back into the controller.
pub trait PlayerObserver: Send + Sync {
    fn on_event(&self, event: PlayerEvent);
}

/// Drops position updates that arrive faster than the configured interval
struct PositionThrottle {
    interval: Duration,
    last_update: Mutex<Option<Instant>>,
}

impl PositionThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_update: Mutex::new(None),
        }
    }

    fn allow(&self) -> bool {
        let mut last_update = self.last_update.lock();
        match *last_update {
            Some(last) if last.elapsed() < self.interval => false,
            _ => {
                *last_update = Some(Instant::now());
                true
            }
        }
    }
}

enum DispatchMessage {
    Event(PlayerEvent),
    Shutdown,
}

type ObserverSlot = Arc<Mutex<Option<Weak<dyn PlayerObserver>>>>;

/// Ordered, asynchronous delivery to a weakly held observer
pub struct ObserverDispatcher {
    sender: Sender<DispatchMessage>,
    observer: ObserverSlot,
    throttle: PositionThrottle,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,
    closed: AtomicBool,
}

impl ObserverDispatcher {
    pub fn new(name: &str, position_interval: Duration) -> Self {
        let (sender, receiver) = channel::unbounded();
        let observer: ObserverSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&observer);

        let (worker, worker_id) = match thread::Builder::new()
            .name(format!("{}-observer", name))
            .spawn(move || Self::dispatch_loop(receiver, slot))
        {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), Some(id))
            }
            Err(e) => {
                warn!("Observer dispatcher for '{}' could not start: {}", name, e);
                (None, None)
            }
        };

        Self {
            sender,
            observer,
            throttle: PositionThrottle::new(position_interval),
            worker: Mutex::new(worker),
            worker_id,
            closed: AtomicBool::new(worker_id.is_none()),
        }
    }

    pub fn set_observer(&self, observer: Option<Weak<dyn PlayerObserver>>) {
        *self.observer.lock() = observer;
    }

    /// Queue an event for the observer. Never blocks.
    pub fn forward(&self, event: PlayerEvent) {
        if self.closed.load(Ordering::SeqCst) {
            trace!("Dispatcher closed, dropping {:?}", event);
            return;
        }
        if matches!(event, PlayerEvent::PositionUpdated { .. }) && !self.throttle.allow() {
            return;
        }
        let _ = self.sender.send(DispatchMessage::Event(event));
    }

    pub fn is_dispatcher_thread(&self) -> bool {
        self.worker_id == Some(thread::current().id())
    }

    /// Deliver whatever is queued, then stop the dispatcher thread
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.send(DispatchMessage::Shutdown);
        if self.is_dispatcher_thread() {
            // Called from an observer callback; the loop ends after it returns
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn dispatch_loop(receiver: Receiver<DispatchMessage>, observer: ObserverSlot) {
        for message in receiver.iter() {
            match message {
                DispatchMessage::Event(event) => {
                    let target = observer.lock().as_ref().and_then(Weak::upgrade);
                    match target {
                        Some(target) => target.on_event(event),
                        None => trace!("No live observer for {:?}", event),
                    }
                }
                DispatchMessage::Shutdown => break,
            }
        }
        debug!("Observer dispatcher exiting");
    }
}

impl Drop for ObserverDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The listener registered with the engine.
///
/// Holds the controller weakly; once detached or once the controller is
/// gone every event is dropped.
pub(crate) struct CallbackBridge {
    target: Weak<ControllerShared>,
    detached: AtomicBool,
}

impl CallbackBridge {
    pub(crate) fn new(target: Weak<ControllerShared>) -> Self {
        Self {
            target,
            detached: AtomicBool::new(false),
        }
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl EngineListener for CallbackBridge {
    fn on_engine_event(&self, event: EngineEvent) {
        if self.is_detached() {
            trace!("Bridge detached, dropping {:?}", event);
            return;
        }
        match self.target.upgrade() {
            Some(controller) => controller.handle_engine_event(event),
            None => trace!("Controller gone, dropping {:?}", event),
        }
    }
}
