//! Per-module resource limits enforced by the sandbox.

/// Caps a single module invocation is held to. All counters are
/// best-effort: the sandbox cannot reach into a module's code, it can only
/// observe what the module reports through its `ResourceTracker`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub max_execution_seconds: f64,
    pub max_events: u64,
    pub max_errors: u64,
    pub max_http_requests: u64,
    pub rate_limit_per_second: Option<f64>,
    pub max_memory_mb: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_execution_seconds: 60.0,
            max_events: 10_000,
            max_errors: 50,
            max_http_requests: 500,
            rate_limit_per_second: None,
            max_memory_mb: None,
        }
    }
}

impl ResourceLimits {
    pub fn max_execution_seconds(mut self, v: f64) -> Self {
        self.max_execution_seconds = v;
        self
    }

    pub fn max_events(mut self, v: u64) -> Self {
        self.max_events = v;
        self
    }

    pub fn max_errors(mut self, v: u64) -> Self {
        self.max_errors = v;
        self
    }

    pub fn max_http_requests(mut self, v: u64) -> Self {
        self.max_http_requests = v;
        self
    }

    pub fn rate_limit_per_second(mut self, v: f64) -> Self {
        self.rate_limit_per_second = Some(v);
        self
    }

    pub fn max_memory_mb(mut self, v: u64) -> Self {
        self.max_memory_mb = Some(v);
        self
    }
}
