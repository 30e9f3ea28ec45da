//! A per-module execution sandbox: fault isolation plus best-effort
//! resource and wall-clock enforcement.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, warn};

use crate::limits::ResourceLimits;
use crate::tracker::{ResourceTracker, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SandboxState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    TimedOut = 4,
    Killed = 5,
}

impl SandboxState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SandboxState::Idle,
            1 => SandboxState::Running,
            2 => SandboxState::Completed,
            3 => SandboxState::Failed,
            4 => SandboxState::TimedOut,
            _ => SandboxState::Killed,
        }
    }
}

/// Snapshot of a tracker's counters at the end of an invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    pub events: u64,
    pub errors: u64,
    pub http_requests: u64,
}

/// What came out of one `execute`/`execute_with_timeout` call.
#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub state: SandboxState,
    pub events_produced: u64,
    pub errors: u64,
    pub duration_seconds: f64,
    pub exception: Option<String>,
    pub usage: ResourceUsage,
}

type CompletionCallback = Arc<dyn Fn(&SandboxResult) + Send + Sync>;

/// Runs one module's code under `ResourceLimits`, reporting a final state
/// from `IDLE -> RUNNING -> {COMPLETED, FAILED, TIMED_OUT, KILLED}`.
pub struct ModuleSandbox {
    name: String,
    limits: ResourceLimits,
    state: AtomicU8,
    on_complete: Mutex<Vec<CompletionCallback>>,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked with a non-string payload".to_string()
    }
}

fn violation_state(violation: &Violation) -> SandboxState {
    match violation {
        Violation::Timeout { .. } => SandboxState::TimedOut,
        _ => SandboxState::Failed,
    }
}

fn violation_message(violation: &Violation) -> String {
    match violation {
        Violation::Timeout { elapsed_secs, limit_secs } => {
            format!("timeout after {elapsed_secs:.3}s (limit {limit_secs:.3}s)")
        }
        Violation::EventLimit { count, limit } => {
            format!("resource limit exceeded: {count} events emitted (limit {limit})")
        }
        Violation::ErrorLimit { count, limit } => {
            format!("resource limit exceeded: {count} errors recorded (limit {limit})")
        }
        Violation::HttpLimit { count, limit } => {
            format!("resource limit exceeded: {count} HTTP requests (limit {limit})")
        }
    }
}

impl ModuleSandbox {
    pub fn new(name: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            state: AtomicU8::new(SandboxState::Idle as u8),
            on_complete: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn state(&self) -> SandboxState {
        SandboxState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn on_complete(&self, cb: impl Fn(&SandboxResult) + Send + Sync + 'static) {
        self.on_complete.lock().unwrap().push(Arc::new(cb));
    }

    /// Atomically moves `IDLE -> RUNNING`. `false` means a call is already
    /// in flight.
    fn try_start(&self) -> bool {
        self.state
            .compare_exchange(
                SandboxState::Idle as u8,
                SandboxState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn reentrant_result(&self) -> SandboxResult {
        warn!(module = %self.name, "rejected re-entrant sandbox execution");
        SandboxResult {
            state: self.state(),
            events_produced: 0,
            errors: 0,
            duration_seconds: 0.0,
            exception: Some("sandbox is already running".to_string()),
            usage: ResourceUsage::default(),
        }
    }

    fn finish(&self, tracker: &ResourceTracker, outcome: Result<(), String>) -> SandboxResult {
        let violation = tracker.check();
        let (state, exception) = match (&outcome, &violation) {
            (Err(panic_msg), _) => (SandboxState::Failed, Some(panic_msg.clone())),
            (Ok(()), Some(v)) => (violation_state(v), Some(violation_message(v))),
            (Ok(()), None) => (SandboxState::Completed, None),
        };

        self.state.store(state as u8, Ordering::SeqCst);

        let result = SandboxResult {
            state,
            events_produced: tracker.events_count(),
            errors: tracker.errors_count(),
            duration_seconds: tracker.elapsed_seconds(),
            exception,
            usage: ResourceUsage {
                events: tracker.events_count(),
                errors: tracker.errors_count(),
                http_requests: tracker.http_requests_count(),
            },
        };

        self.fire_callbacks(&result);
        result
    }

    fn fire_callbacks(&self, result: &SandboxResult) {
        let callbacks = self.on_complete.lock().unwrap().clone();
        for cb in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| cb(result))).is_err() {
                error!(module = %self.name, "on_complete callback panicked; ignored");
            }
        }
    }

    /// Runs `func` inline with a fresh tracker. Re-entrant calls fail
    /// immediately without touching the tracker or mutating state further.
    pub fn execute<F>(&self, func: F) -> SandboxResult
    where
        F: FnOnce(&ResourceTracker) -> anyhow::Result<()> + std::panic::UnwindSafe,
    {
        if !self.try_start() {
            return self.reentrant_result();
        }

        let tracker = ResourceTracker::new(self.limits);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(&tracker)));

        let outcome = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(panic_message(payload)),
        };

        self.finish(&tracker, outcome)
    }

    /// Runs `func` on a detached worker, racing `max_execution_seconds`.
    /// If the deadline elapses first the worker is marked timed out and
    /// best-effort aborted; its own eventual result, if any, is discarded.
    pub async fn execute_with_timeout<F>(&self, func: F) -> SandboxResult
    where
        F: FnOnce(&ResourceTracker) -> anyhow::Result<()> + Send + 'static,
    {
        if !self.try_start() {
            return self.reentrant_result();
        }

        let tracker = Arc::new(ResourceTracker::new(self.limits));
        let tracker_for_worker = tracker.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(&tracker_for_worker)));
            match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(payload) => Err(panic_message(payload)),
            }
        });

        let abort_handle = handle.abort_handle();
        let deadline = Duration::from_secs_f64(self.limits.max_execution_seconds.max(0.0));

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(outcome)) => self.finish(&tracker, outcome),
            Ok(Err(_join_error)) => self.finish(&tracker, Err("worker task panicked".to_string())),
            Err(_elapsed) => {
                abort_handle.abort();
                warn!(module = %self.name, "sandbox deadline reached; worker detached");
                // The deadline itself is not a module failure: pass `Ok(())`
                // so `finish` consults the tracker's own elapsed time, which
                // already exceeds `max_execution_seconds` and reports
                // `Violation::Timeout` rather than masking it as `Failed`.
                self.finish(&tracker, Ok(()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn successful_run_completes_with_no_exception() {
        let sandbox = ModuleSandbox::new("dns", ResourceLimits::default());
        let result = sandbox.execute(|tracker| {
            tracker.record_event();
            Ok(())
        });
        assert_eq!(result.state, SandboxState::Completed);
        assert!(result.exception.is_none());
        assert_eq!(sandbox.state(), SandboxState::Completed);
    }

    #[test]
    fn panicking_module_is_caught_and_marked_failed() {
        let sandbox = ModuleSandbox::new("dns", ResourceLimits::default());
        let result = sandbox.execute(|_tracker| panic!("module exploded"));
        assert_eq!(result.state, SandboxState::Failed);
        assert_eq!(result.exception.as_deref(), Some("module exploded"));
    }

    #[test]
    fn exceeding_event_limit_fails_after_the_run_completes() {
        let sandbox = ModuleSandbox::new("dns", ResourceLimits::default().max_events(1));
        let result = sandbox.execute(|tracker| {
            tracker.record_event();
            tracker.record_event();
            Ok(())
        });
        assert_eq!(result.state, SandboxState::Failed);
        assert_eq!(result.events_produced, 2);
    }

    #[test]
    fn reentrant_execute_fails_immediately_without_touching_tracker() {
        let sandbox = Arc::new(ModuleSandbox::new("dns", ResourceLimits::default()));
        let inner = sandbox.clone();
        let result = sandbox.execute(move |_tracker| {
            let reentrant = inner.execute(|_t| Ok(()));
            assert!(reentrant.exception.unwrap().contains("already running"));
            Ok(())
        });
        assert_eq!(result.state, SandboxState::Completed);
    }

    #[tokio::test]
    async fn timeout_marks_timed_out_with_elapsed_at_least_the_limit() {
        let sandbox = ModuleSandbox::new("slow", ResourceLimits::default().max_execution_seconds(0.05));
        let result = sandbox
            .execute_with_timeout(|_tracker| {
                std::thread::sleep(StdDuration::from_millis(500));
                Ok(())
            })
            .await;
        assert_eq!(result.state, SandboxState::TimedOut);
        assert!(result.duration_seconds >= 0.05);
    }

    #[test]
    fn on_complete_runs_and_swallows_its_own_panics() {
        let sandbox = ModuleSandbox::new("dns", ResourceLimits::default());
        sandbox.on_complete(|_result| panic!("callback exploded"));
        let result = sandbox.execute(|_t| Ok(()));
        assert_eq!(result.state, SandboxState::Completed, "callback panic never fails the sandbox");
    }
}
