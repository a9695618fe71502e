pub mod buffer;
pub mod cli;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;

#[cfg(test)]
mod integration_tests;

pub use control::{PlayerController, PlayerEvent, PlayerObserver};
pub use error::*;
pub use models::*;
