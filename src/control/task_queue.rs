use crate::error::ControlError;
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work for the [`TaskQueue`].
///
/// Exactly one of the two hooks runs: `execute` when the worker reaches the
/// task, or the cancel hook when the task is discarded while still queued.
pub struct TaskHandler {
    name: &'static str,
    execute: Option<TaskFn>,
    on_cancel: Option<TaskFn>,
}

impl TaskHandler {
    pub fn new<F>(name: &'static str, execute: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name,
            execute: Some(Box::new(execute)),
            on_cancel: None,
        }
    }

    /// Attach a hook that runs instead of `execute` if the task is canceled
    pub fn with_cancel<F>(mut self, on_cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_cancel = Some(Box::new(on_cancel));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn execute(mut self) {
        if let Some(execute) = self.execute.take() {
            execute();
        }
    }

    fn cancel(mut self) {
        debug!("Task '{}' canceled before execution", self.name);
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl std::fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandler").field("name", &self.name).finish()
    }
}

struct QueueState {
    tasks: VecDeque<TaskHandler>,
    running: bool,
    exit: bool,
}

struct QueueShared {
    state: Mutex<QueueState>,
    cond: Condvar,
    /// Set by the worker itself before it takes its first task
    worker_id: Mutex<Option<ThreadId>>,
}

/// Single-worker FIFO executor.
///
/// Tasks run one at a time on a dedicated thread, in enqueue order.
pub struct TaskQueue {
    name: String,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    running: false,
                    exit: true,
                }),
                cond: Condvar::new(),
                worker_id: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker thread. Starting a running queue is a no-op.
    pub fn start(&self) -> Result<(), ControlError> {
        let mut worker = self.worker.lock();
        {
            let mut state = self.shared.state.lock();
            if state.running {
                warn!("Task queue '{}' already started", self.name);
                return Ok(());
            }
            state.running = true;
            state.exit = false;
        }

        let shared = Arc::clone(&self.shared);
        let queue_name = self.name.clone();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || Self::worker_loop(shared, queue_name))
            .map_err(|e| {
                let mut state = self.shared.state.lock();
                state.running = false;
                state.exit = true;
                ControlError::InvalidOperation(format!(
                    "failed to spawn worker for '{}': {}",
                    self.name, e
                ))
            })?;

        *worker = Some(handle);
        debug!("Task queue '{}' started", self.name);
        Ok(())
    }

    /// Append a task, optionally canceling every task still waiting first.
    pub fn enqueue(&self, task: TaskHandler, cancel_not_executed: bool) -> Result<(), ControlError> {
        let canceled = {
            let mut state = self.shared.state.lock();
            if state.exit {
                drop(state);
                warn!("Task '{}' rejected: queue '{}' stopped", task.name(), self.name);
                task.cancel();
                return Err(ControlError::QueueStopped {
                    queue: self.name.clone(),
                });
            }

            let canceled: Vec<TaskHandler> = if cancel_not_executed {
                state.tasks.drain(..).collect()
            } else {
                Vec::new()
            };

            debug!("Enqueue task '{}' on '{}'", task.name(), self.name);
            state.tasks.push_back(task);
            self.shared.cond.notify_one();
            canceled
        };

        // Cancel hooks may take other locks; run them outside the queue lock
        for task in canceled {
            task.cancel();
        }
        Ok(())
    }

    /// Stop the worker and cancel whatever it did not reach.
    ///
    /// Refused from the worker thread itself, since it would join itself.
    pub fn stop(&self) -> Result<(), ControlError> {
        if self.is_worker_thread() {
            error!("Task queue '{}' cannot be stopped from its own worker", self.name);
            return Err(ControlError::InvalidOperation(format!(
                "stop of '{}' called from its worker thread",
                self.name
            )));
        }

        let mut worker = self.worker.lock();
        {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Ok(());
            }
            state.exit = true;
            self.shared.cond.notify_all();
        }

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("Worker of task queue '{}' panicked", self.name);
            }
        }
        *self.shared.worker_id.lock() = None;

        let leftover: Vec<TaskHandler> = {
            let mut state = self.shared.state.lock();
            state.running = false;
            state.tasks.drain(..).collect()
        };
        if !leftover.is_empty() {
            debug!("Task queue '{}' canceling {} leftover tasks", self.name, leftover.len());
        }
        for task in leftover {
            task.cancel();
        }

        debug!("Task queue '{}' stopped", self.name);
        Ok(())
    }

    /// Check whether the caller is running on this queue's worker
    pub fn is_worker_thread(&self) -> bool {
        *self.shared.worker_id.lock() == Some(thread::current().id())
    }

    pub fn is_running(&self) -> bool {
        let state = self.shared.state.lock();
        state.running && !state.exit
    }

    /// Number of tasks waiting to execute
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    fn worker_loop(shared: Arc<QueueShared>, name: String) {
        *shared.worker_id.lock() = Some(thread::current().id());
        loop {
            let task = {
                let mut state = shared.state.lock();
                while !state.exit && state.tasks.is_empty() {
                    shared.cond.wait(&mut state);
                }
                if state.exit {
                    break;
                }
                match state.tasks.pop_front() {
                    Some(task) => task,
                    None => continue,
                }
            };

            let task_name = task.name();
            debug!("Queue '{}' executing task '{}'", name, task_name);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || task.execute())) {
                error!(
                    "Task '{}' on queue '{}' panicked: {}",
                    task_name,
                    name,
                    panic_message(payload.as_ref())
                );
            }
        }
        debug!("Worker of task queue '{}' exiting", name);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        if self.is_worker_thread() {
            // Dropped from inside a task: the worker exits on its own
            let mut state = self.shared.state.lock();
            state.exit = true;
            self.shared.cond.notify_all();
            return;
        }
        let _ = self.stop();
    }
}
