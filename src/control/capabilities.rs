//! Process-wide cache of what each engine implementation can do.
//!
//! Entries are probed lazily, once per engine name, under a single lock.
//! `teardown` drops every entry so the next lookup probes again.

use crate::engine::Engine;
use crate::models::PlaybackRate;
use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

static GLOBAL_REGISTRY: Lazy<CapabilityRegistry> = Lazy::new(CapabilityRegistry::new);

/// Capabilities reported by one engine implementation
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCapabilities {
    pub engine: String,
    pub supported_rates: Vec<PlaybackRate>,
    pub probed_at: DateTime<Utc>,
}

impl EngineCapabilities {
    pub fn supports_rate(&self, rate: PlaybackRate) -> bool {
        self.supported_rates.contains(&rate)
    }
}

pub struct CapabilityRegistry {
    entries: Mutex<HashMap<String, Arc<EngineCapabilities>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The registry shared by every controller in the process
    pub fn global() -> &'static CapabilityRegistry {
        &GLOBAL_REGISTRY
    }

    /// Return the cached entry for this engine, probing it on first use
    pub fn get_or_probe(&self, engine: &dyn Engine) -> Arc<EngineCapabilities> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(engine.name()) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(EngineCapabilities {
            engine: engine.name().to_string(),
            supported_rates: engine.supported_rates(),
            probed_at: Utc::now(),
        });
        debug!(
            "Probed capabilities of engine '{}': {} rates",
            entry.engine,
            entry.supported_rates.len()
        );
        entries.insert(entry.engine.clone(), Arc::clone(&entry));
        entry
    }

    pub fn lookup(&self, engine_name: &str) -> Option<Arc<EngineCapabilities>> {
        self.entries.lock().get(engine_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forget every probed engine
    pub fn teardown(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!("Tearing down capability cache ({} engines)", entries.len());
        }
        entries.clear();
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
