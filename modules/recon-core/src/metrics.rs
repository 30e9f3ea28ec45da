//! Per-module metrics collector.
//!
//! Tracks simple operational counters per module name — events produced,
//! errors recorded, sandbox invocations, cumulative duration — so that a
//! long-running scan can be observed without each component (bus, sandbox,
//! orchestrator) inventing its own bookkeeping. Each module's counters live
//! behind their own lock so that a busy module never contends with a quiet
//! one; `snapshot()` copies every row out under its own lock in turn.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters for a single module, accumulated over the life of a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleMetrics {
    pub events_produced: u64,
    pub errors: u64,
    pub invocations: u64,
    pub timeouts: u64,
    pub total_duration: Duration,
}

impl ModuleMetrics {
    /// Mean wall-clock duration per invocation, zero when never invoked.
    pub fn mean_duration(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.invocations as u32
        }
    }
}

struct ModuleSlot {
    metrics: Mutex<ModuleMetrics>,
}

/// Thread-safe per-module metric maps.
///
/// The outer map (which modules exist) is protected by an `RwLock` since
/// reads (snapshotting, looking up an existing module) vastly outnumber
/// writes (a module being observed for the first time); each module's own
/// counters live behind their own `Mutex` so recording activity for one
/// module never blocks recording activity for another.
pub struct MetricsCollector {
    modules: RwLock<HashMap<String, ModuleSlot>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    fn with_slot<R>(&self, module: &str, f: impl FnOnce(&mut ModuleMetrics) -> R) -> R {
        if let Some(slot) = self.modules.read().expect("metrics lock poisoned").get(module) {
            return f(&mut slot.metrics.lock().expect("metrics lock poisoned"));
        }
        let mut modules = self.modules.write().expect("metrics lock poisoned");
        let slot = modules
            .entry(module.to_string())
            .or_insert_with(|| ModuleSlot {
                metrics: Mutex::new(ModuleMetrics::default()),
            });
        f(&mut slot.metrics.lock().expect("metrics lock poisoned"))
    }

    pub fn record_invocation(&self, module: &str, duration: Duration) {
        self.with_slot(module, |m| {
            m.invocations += 1;
            m.total_duration += duration;
        });
    }

    pub fn record_events_produced(&self, module: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.with_slot(module, |m| m.events_produced += count);
    }

    pub fn record_error(&self, module: &str) {
        self.with_slot(module, |m| m.errors += 1);
    }

    pub fn record_timeout(&self, module: &str) {
        self.with_slot(module, |m| m.timeouts += 1);
    }

    /// Copy of one module's counters, or the zero value if never observed.
    pub fn snapshot_module(&self, module: &str) -> ModuleMetrics {
        if let Some(slot) = self.modules.read().expect("metrics lock poisoned").get(module) {
            slot.metrics.lock().expect("metrics lock poisoned").clone()
        } else {
            ModuleMetrics::default()
        }
    }

    /// Copy of every module's counters, keyed by module name.
    pub fn snapshot(&self) -> HashMap<String, ModuleMetrics> {
        let modules = self.modules.read().expect("metrics lock poisoned");
        modules
            .iter()
            .map(|(name, slot)| {
                (
                    name.clone(),
                    slot.metrics.lock().expect("metrics lock poisoned").clone(),
                )
            })
            .collect()
    }
}
