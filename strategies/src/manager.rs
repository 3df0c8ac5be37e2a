//! Strategy registry
//!
//! Start and stop strategies as a group; per-strategy failures are logged
//! and do not block the others.

use crate::lifecycle::StrategyHandle;
use common::types::StrategyState;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{error, info, warn};

/// Name-keyed registry of strategy handles
#[derive(Default)]
pub struct StrategyManager {
    strategies: Mutex<FxHashMap<String, StrategyHandle>>,
}

impl StrategyManager {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its name; an existing name is kept and the
    /// new handle is dropped
    pub fn register(&self, handle: StrategyHandle) {
        let mut strategies = self.strategies.lock();
        let name = handle.name().to_string();
        if strategies.contains_key(&name) {
            warn!(strategy = %name, "strategy already registered");
            return;
        }
        info!(strategy = %name, "strategy registered");
        strategies.insert(name, handle);
    }

    /// Remove a strategy; a running one is stopped first
    pub fn unregister(&self, name: &str) {
        let handle = self.strategies.lock().remove(name);
        if let Some(handle) = handle {
            if handle.state() == StrategyState::Running {
                if let Err(e) = handle.stop() {
                    error!(strategy = %name, error = %e, "stop on unregister failed");
                }
            }
            info!(strategy = %name, "strategy unregistered");
        }
    }

    /// Initialize and start every registered strategy
    pub fn start_all(&self) {
        let strategies = self.strategies.lock();
        for (name, handle) in strategies.iter() {
            if handle.state() == StrategyState::Running {
                continue;
            }
            let result = handle.initialize().and_then(|()| handle.start());
            if let Err(e) = result {
                error!(strategy = %name, error = %e, "failed to start strategy");
            }
        }
    }

    /// Stop every running strategy
    pub fn stop_all(&self) {
        let strategies = self.strategies.lock();
        for (name, handle) in strategies.iter() {
            if handle.state() != StrategyState::Running {
                continue;
            }
            if let Err(e) = handle.stop() {
                error!(strategy = %name, error = %e, "failed to stop strategy");
            }
        }
    }

    /// Lifecycle state of one strategy
    #[must_use]
    pub fn status(&self, name: &str) -> Option<StrategyState> {
        self.strategies.lock().get(name).map(StrategyHandle::state)
    }

    /// Registered strategy names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.strategies.lock().keys().cloned().collect()
    }
}
