//! Monotonic-clock, per-call resource accounting for one sandbox invocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::limits::ResourceLimits;

/// The first kind of violation found by `ResourceTracker::check`, in the
/// fixed check order: timeout, event count, error count, HTTP count.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Timeout { elapsed_secs: f64, limit_secs: f64 },
    EventLimit { count: u64, limit: u64 },
    ErrorLimit { count: u64, limit: u64 },
    HttpLimit { count: u64, limit: u64 },
}

/// Tracks elapsed time and per-call counters for one module invocation.
/// Every `record_*` call increments unconditionally, then reports whether
/// that increment crossed the limit, so the caller learns it crossed the
/// line on the same call that crossed it.
pub struct ResourceTracker {
    started: Instant,
    limits: ResourceLimits,
    events: AtomicU64,
    errors: AtomicU64,
    http_requests: AtomicU64,
}

impl ResourceTracker {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            started: Instant::now(),
            limits,
            events: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Record one emitted event. Returns `true` if this call pushed the
    /// module over `max_events`.
    pub fn record_event(&self) -> bool {
        let n = self.events.fetch_add(1, Ordering::Relaxed) + 1;
        n > self.limits.max_events
    }

    /// Record one soft failure. Returns `true` if over `max_errors`.
    pub fn record_error(&self) -> bool {
        let n = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
        n > self.limits.max_errors
    }

    /// Record one outbound HTTP call. Returns `true` if over `max_http_requests`.
    pub fn record_http_request(&self) -> bool {
        let n = self.http_requests.fetch_add(1, Ordering::Relaxed) + 1;
        n > self.limits.max_http_requests
    }

    pub fn events_count(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn http_requests_count(&self) -> u64 {
        self.http_requests.load(Ordering::Relaxed)
    }

    /// A single aggregate check, reporting the first violation in priority
    /// order: timeout, event count, error count, HTTP count.
    pub fn check(&self) -> Option<Violation> {
        let elapsed = self.elapsed_seconds();
        if elapsed >= self.limits.max_execution_seconds {
            return Some(Violation::Timeout {
                elapsed_secs: elapsed,
                limit_secs: self.limits.max_execution_seconds,
            });
        }
        let events = self.events_count();
        if events > self.limits.max_events {
            return Some(Violation::EventLimit {
                count: events,
                limit: self.limits.max_events,
            });
        }
        let errors = self.errors_count();
        if errors > self.limits.max_errors {
            return Some(Violation::ErrorLimit {
                count: errors,
                limit: self.limits.max_errors,
            });
        }
        let http = self.http_requests_count();
        if http > self.limits.max_http_requests {
            return Some(Violation::HttpLimit {
                count: http,
                limit: self.limits.max_http_requests,
            });
        }
        None
    }
}
