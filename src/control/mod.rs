pub mod bridge;
pub mod capabilities;
pub mod command;
pub mod controller;
pub mod state;
pub mod sync;
pub mod task_queue;

#[cfg(test)]
mod tests;

pub use bridge::{ObserverDispatcher, PlayerEvent, PlayerObserver};
pub use capabilities::{CapabilityRegistry, EngineCapabilities};
pub use command::Command;
pub use controller::PlayerController;
pub use sync::{Completion, SyncKind};
pub use task_queue::{TaskHandler, TaskQueue};
