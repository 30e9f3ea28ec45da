//! The scan state machine: phase transitions, module scheduling, and
//! completion detection.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use recon_core::Event;
use tracing::{error, info, warn};

use crate::phase::Phase;

/// Static registration of a module against a phase.
#[derive(Debug, Clone)]
pub struct ModuleRegistration {
    pub name: String,
    pub phase: Phase,
    pub priority: i64,
    pub prerequisites: Vec<String>,
}

impl ModuleRegistration {
    pub fn new(name: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            phase,
            priority: 0,
            prerequisites: Vec::new(),
        }
    }

    pub fn priority(mut self, p: i64) -> Self {
        self.priority = p;
        self
    }

    pub fn requires(mut self, prerequisite: impl Into<String>) -> Self {
        self.prerequisites.push(prerequisite.into());
        self
    }
}

/// Terminal disposition passed to completion callbacks.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Completed,
    Failed(String),
}

type PhaseChangeCallback = Arc<dyn Fn(Phase, Phase) + Send + Sync>;
type CompletionCallback = Arc<dyn Fn(&ScanOutcome) + Send + Sync>;

struct Inner {
    phase: Phase,
    phase_started_at: Instant,
    phase_durations: Vec<(Phase, f64)>,
    running: HashSet<String>,
    completed: HashSet<String>,
    failed: HashMap<String, String>,
    events_produced: HashMap<String, u64>,
    ended: bool,
}

/// Owns one scan's lifecycle: phase sequencing, per-module bookkeeping,
/// and completion callbacks. All mutation serializes through one lock, per
/// the "phase changes serialize with module completion bookkeeping via the
/// orchestrator lock" concurrency rule.
pub struct Scan {
    pub id: String,
    pub target_value: String,
    modules: HashMap<String, ModuleRegistration>,
    inner: Mutex<Inner>,
    on_phase_change: Mutex<Vec<PhaseChangeCallback>>,
    on_complete: Mutex<Vec<CompletionCallback>>,
}

impl Scan {
    pub fn new(id: impl Into<String>, target_value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_value: target_value.into(),
            modules: HashMap::new(),
            inner: Mutex::new(Inner {
                phase: Phase::Init,
                phase_started_at: Instant::now(),
                phase_durations: Vec::new(),
                running: HashSet::new(),
                completed: HashSet::new(),
                failed: HashMap::new(),
                events_produced: HashMap::new(),
                ended: false,
            }),
            on_phase_change: Mutex::new(Vec::new()),
            on_complete: Mutex::new(Vec::new()),
        }
    }

    /// Register a module before the scan starts. Registering after `start`
    /// is legal but will not retroactively apply to phases already passed.
    pub fn register_module(&mut self, registration: ModuleRegistration) {
        self.modules.insert(registration.name.clone(), registration);
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().unwrap().phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn on_phase_change(&self, cb: impl Fn(Phase, Phase) + Send + Sync + 'static) {
        self.on_phase_change.lock().unwrap().push(Arc::new(cb));
    }

    pub fn on_complete(&self, cb: impl Fn(&ScanOutcome) + Send + Sync + 'static) {
        self.on_complete.lock().unwrap().push(Arc::new(cb));
    }

    /// Snapshots start time, transitions `INIT -> DISCOVERY`, and returns
    /// the scan's one root event.
    pub fn start(&self) -> Event {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.phase, Phase::Init, "start() called outside INIT");
        inner.phase_started_at = Instant::now();
        drop(inner);

        info!(scan = %self.id, target = %self.target_value, "scan starting");
        self.transition_to(Phase::Discovery);
        Event::root(self.target_value.clone())
    }

    fn transition_to(&self, next: Phase) {
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            let previous = inner.phase;
            let elapsed = inner.phase_started_at.elapsed().as_secs_f64();
            inner.phase_durations.push((previous, elapsed));
            inner.phase = next;
            inner.phase_started_at = Instant::now();
            previous
        };
        info!(scan = %self.id, from = previous.as_str(), to = next.as_str(), "phase transition");
        self.fire_phase_change(previous, next);
    }

    fn fire_phase_change(&self, from: Phase, to: Phase) {
        let callbacks = self.on_phase_change.lock().unwrap().clone();
        for cb in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| cb(from, to))).is_err() {
                error!(scan = %self.id, "phase-change callback panicked; ignored");
            }
        }
    }

    /// Records the current phase's duration, fires phase-change callbacks,
    /// and moves to the next phase. Idempotent once terminal.
    pub fn advance_phase(&self) -> Phase {
        let current = self.phase();
        if current.is_terminal() {
            return current;
        }
        let next = current.next();
        self.transition_to(next);
        self.phase()
    }

    pub fn module_started(&self, name: &str) {
        self.inner.lock().unwrap().running.insert(name.to_string());
    }

    pub fn module_completed(&self, name: &str, events_produced: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.running.remove(name);
        inner.completed.insert(name.to_string());
        inner.events_produced.insert(name.to_string(), events_produced);
    }

    pub fn module_failed(&self, name: &str, err: &str) {
        warn!(scan = %self.id, module = %name, error = %err, "module failed");
        let mut inner = self.inner.lock().unwrap();
        inner.running.remove(name);
        inner.failed.insert(name.to_string(), err.to_string());
    }

    /// True iff every prerequisite of `name` is in the completed set. A
    /// failed prerequisite never enters the completed set, so a dependent
    /// stays permanently blocked.
    pub fn can_run_module(&self, name: &str) -> bool {
        let Some(registration) = self.modules.get(name) else {
            return false;
        };
        let inner = self.inner.lock().unwrap();
        registration
            .prerequisites
            .iter()
            .all(|p| inner.completed.contains(p))
    }

    /// Modules registered for `phase`, in descending-priority (then name)
    /// order, restricted to those whose prerequisites are currently met.
    pub fn runnable_modules(&self, phase: Phase) -> Vec<String> {
        let mut candidates: Vec<&ModuleRegistration> = self
            .modules
            .values()
            .filter(|m| m.phase == phase && self.can_run_module(&m.name))
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        candidates.into_iter().map(|m| m.name.clone()).collect()
    }

    /// True once every module registered for `phase` is in `completed ∪
    /// failed` (vacuously true, including when no modules are registered
    /// at all).
    pub fn phase_settled(&self, phase: Phase) -> bool {
        let inner = self.inner.lock().unwrap();
        self.modules
            .values()
            .filter(|m| m.phase == phase)
            .all(|m| inner.completed.contains(&m.name) || inner.failed.contains_key(&m.name))
    }

    /// True iff every module registered for `phase` failed and none of
    /// them produced any events, the one automatic failure condition
    /// besides an explicit `fail()` call.
    pub fn phase_failed_unproductively(&self, phase: Phase) -> bool {
        let registered: Vec<&ModuleRegistration> =
            self.modules.values().filter(|m| m.phase == phase).collect();
        if registered.is_empty() {
            return false;
        }
        let inner = self.inner.lock().unwrap();
        registered.iter().all(|m| {
            inner.failed.contains_key(&m.name)
                && inner.events_produced.get(&m.name).copied().unwrap_or(0) == 0
        })
    }

    /// Marks the scan successfully finished. Fires completion callbacks
    /// exactly once, whether called directly or via `fail`.
    pub fn complete(&self) {
        self.finish(Phase::Complete, ScanOutcome::Completed);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.finish(Phase::Failed, ScanOutcome::Failed(reason));
    }

    fn finish(&self, terminal: Phase, outcome: ScanOutcome) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.ended {
                return;
            }
            let elapsed = inner.phase_started_at.elapsed().as_secs_f64();
            let previous = inner.phase;
            inner.phase_durations.push((previous, elapsed));
            inner.phase = terminal;
            inner.ended = true;
        }
        info!(scan = %self.id, phase = terminal.as_str(), "scan finished");
        let callbacks = self.on_complete.lock().unwrap().clone();
        for cb in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| cb(&outcome))).is_err() {
                error!(scan = %self.id, "completion callback panicked; ignored");
            }
        }
    }

    pub fn phase_durations(&self) -> Vec<(Phase, f64)> {
        self.inner.lock().unwrap().phase_durations.clone()
    }
}
