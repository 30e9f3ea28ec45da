//! Owns one `ModuleSandbox` per module and summarizes outcomes across a scan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recon_core::MetricsCollector;

use crate::limits::ResourceLimits;
use crate::sandbox::{ModuleSandbox, SandboxResult, SandboxState};

/// Maintains one sandbox per module name, reusing the first instance
/// created for that name until it is explicitly removed.
pub struct SandboxManager {
    default_limits: ResourceLimits,
    sandboxes: Mutex<HashMap<String, Arc<ModuleSandbox>>>,
    results: Mutex<HashMap<String, SandboxResult>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SandboxManager {
    pub fn new(default_limits: ResourceLimits) -> Self {
        Self {
            default_limits,
            sandboxes: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    /// Attaches a shared metrics collector; every `record_result` call from
    /// this point on also updates that module's counters.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the sandbox for `module`, creating it with `limits` the
    /// first time it is requested. Later calls for the same module ignore
    /// their `limits` argument until `remove` is called.
    pub fn get_sandbox(&self, module: &str, limits: Option<ResourceLimits>) -> Arc<ModuleSandbox> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        sandboxes
            .entry(module.to_string())
            .or_insert_with(|| {
                Arc::new(ModuleSandbox::new(
                    module.to_string(),
                    limits.unwrap_or(self.default_limits),
                ))
            })
            .clone()
    }

    pub fn remove(&self, module: &str) {
        self.sandboxes.lock().unwrap().remove(module);
        self.results.lock().unwrap().remove(module);
    }

    pub fn record_result(&self, module: &str, result: SandboxResult) {
        if let Some(metrics) = &self.metrics {
            metrics.record_invocation(module, Duration::from_secs_f64(result.duration_seconds));
            metrics.record_events_produced(module, result.events_produced);
            if result.errors > 0 {
                metrics.record_error(module);
            }
            if result.state == SandboxState::TimedOut {
                metrics.record_timeout(module);
            }
        }
        self.results.lock().unwrap().insert(module.to_string(), result);
    }

    pub fn results(&self) -> HashMap<String, SandboxResult> {
        self.results.lock().unwrap().clone()
    }

    /// Modules whose most recent recorded result did not end in `Completed`.
    pub fn failed_modules(&self) -> Vec<String> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.state != SandboxState::Completed)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
