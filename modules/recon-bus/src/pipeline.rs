//! The event pipeline: a linear, composable list of stages a published
//! event passes through before it is routed to subscribers, the store, and
//! the correlation engine.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use recon_core::Event;
use serde_json::Value;

/// What a stage decided about the event it was handed.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Continue,
    Drop(String),
    Error(String),
}

/// A working copy of an event as it flows through the pipeline: the base
/// event plus tags and router metadata accumulated along the way.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub event: Event,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl PipelineEvent {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, pe: &mut PipelineEvent) -> StageOutcome;
}

/// Drops events not in an allowed type set, or whose `data` exceeds a byte cap.
pub struct ValidatorStage {
    name: String,
    allowed_types: Option<Vec<String>>,
    max_data_bytes: Option<usize>,
}

impl ValidatorStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_types: None,
            max_data_bytes: None,
        }
    }

    pub fn allowed_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_data_bytes(mut self, n: usize) -> Self {
        self.max_data_bytes = Some(n);
        self
    }
}

impl PipelineStage for ValidatorStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, pe: &mut PipelineEvent) -> StageOutcome {
        if let Some(allowed) = &self.allowed_types {
            if !allowed.iter().any(|t| t == &pe.event.event_type) {
                return StageOutcome::Drop(format!(
                    "Type '{}' not allowed",
                    pe.event.event_type
                ));
            }
        }
        if let Some(max) = self.max_data_bytes {
            if pe.event.data.len() > max {
                return StageOutcome::Drop(format!(
                    "data exceeds max_data_bytes ({} > {max})",
                    pe.event.data.len()
                ));
            }
        }
        StageOutcome::Continue
    }
}

/// Replaces `data` with the output of a pure function.
pub struct TransformStage {
    name: String,
    f: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl TransformStage {
    pub fn new(name: impl Into<String>, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl PipelineStage for TransformStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, pe: &mut PipelineEvent) -> StageOutcome {
        pe.event.data = (self.f)(&pe.event.data);
        StageOutcome::Continue
    }
}

/// Adds tags from a `(pattern -> tag)` table whenever the pattern is a
/// substring of `event_type` or `data`.
pub struct TaggerStage {
    name: String,
    table: Vec<(String, String)>,
}

impl TaggerStage {
    pub fn new(name: impl Into<String>, table: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }
}

impl PipelineStage for TaggerStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, pe: &mut PipelineEvent) -> StageOutcome {
        for (pattern, tag) in &self.table {
            if pe.event.event_type.contains(pattern.as_str()) || pe.event.data.contains(pattern.as_str()) {
                pe.tags.push(tag.clone());
            }
        }
        StageOutcome::Continue
    }
}

/// For each predicate that matches, appends its destination label into
/// `metadata["_routes"]`.
pub struct RouterStage {
    name: String,
    routes: Vec<(Box<dyn Fn(&PipelineEvent) -> bool + Send + Sync>, String)>,
}

impl RouterStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
        }
    }

    pub fn route_if(
        mut self,
        destination: impl Into<String>,
        predicate: impl Fn(&PipelineEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.routes.push((Box::new(predicate), destination.into()));
        self
    }
}

impl PipelineStage for RouterStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, pe: &mut PipelineEvent) -> StageOutcome {
        for (predicate, destination) in &self.routes {
            if predicate(pe) {
                let entry = pe
                    .metadata
                    .entry("_routes".to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(routes) = entry {
                    routes.push(Value::String(destination.clone()));
                }
            }
        }
        StageOutcome::Continue
    }
}

/// Arbitrary user-supplied stage.
pub struct FunctionStage {
    name: String,
    f: Box<dyn Fn(&mut PipelineEvent) -> StageOutcome + Send + Sync>,
}

impl FunctionStage {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&mut PipelineEvent) -> StageOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl PipelineStage for FunctionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, pe: &mut PipelineEvent) -> StageOutcome {
        (self.f)(pe)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageStats {
    pub processed: u64,
    pub passed: u64,
    pub dropped: u64,
    pub errors: u64,
    pub cumulative_seconds: f64,
}

impl StageStats {
    pub fn mean_latency_seconds(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.cumulative_seconds / self.processed as f64
        }
    }
}

/// Final disposition of a `Pipeline::execute` call.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Passed(PipelineEvent),
    Dropped { stage: String, reason: String },
}

type ErrorHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A linear, lockable, ordered list of stages. Stage-list mutation and stat
/// reads take the lock; per-event execution copies the stage list under the
/// lock, then runs unlocked.
pub struct Pipeline {
    stages: Mutex<Vec<Arc<dyn PipelineStage>>>,
    stats: Mutex<HashMap<String, StageStats>>,
    error_handlers: Mutex<Vec<ErrorHandler>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Mutex::new(Vec::new()),
            stats: Mutex::new(HashMap::new()),
            error_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn add_stage(&self, stage: Arc<dyn PipelineStage>) {
        self.stages.lock().unwrap().push(stage);
    }

    pub fn remove_stage(&self, name: &str) {
        self.stages.lock().unwrap().retain(|s| s.name() != name);
    }

    pub fn on_error(&self, handler: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.error_handlers.lock().unwrap().push(Arc::new(handler));
    }

    pub fn stats_snapshot(&self) -> HashMap<String, StageStats> {
        self.stats.lock().unwrap().clone()
    }

    pub fn execute(&self, event: Event) -> PipelineOutcome {
        let stages = self.stages.lock().unwrap().clone();
        let mut pe = PipelineEvent::new(event);

        for stage in stages.iter() {
            let start = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.run(&mut pe)))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload);
                    StageOutcome::Error(message)
                });
            let elapsed = start.elapsed().as_secs_f64();

            let mut stats = self.stats.lock().unwrap();
            let entry = stats.entry(stage.name().to_string()).or_default();
            entry.processed += 1;
            entry.cumulative_seconds += elapsed;

            match outcome {
                StageOutcome::Continue => {
                    entry.passed += 1;
                }
                StageOutcome::Drop(reason) => {
                    entry.dropped += 1;
                    drop(stats);
                    return PipelineOutcome::Dropped {
                        stage: stage.name().to_string(),
                        reason,
                    };
                }
                StageOutcome::Error(message) => {
                    entry.errors += 1;
                    drop(stats);
                    let handlers = self.error_handlers.lock().unwrap().clone();
                    for handler in handlers {
                        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
                            handler(stage.name(), &message)
                        }));
                    }
                    tracing::error!(stage = stage.name(), error = %message, "pipeline stage error");
                }
            }
        }

        PipelineOutcome::Passed(pe)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_drops_disallowed_type_with_reason() {
        let pipeline = Pipeline::new();
        pipeline.add_stage(Arc::new(
            ValidatorStage::new("types").allowed_types(["IP_ADDRESS", "DOMAIN_NAME"]),
        ));

        let root = Event::root("example.com");
        let event = Event::child("harvester", "EMAIL_ADDRESS", "a@b.com", &root)
            .build()
            .unwrap();

        match pipeline.execute(event) {
            PipelineOutcome::Dropped { reason, .. } => {
                assert!(reason.contains("Type 'EMAIL_ADDRESS' not allowed"));
            }
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[test]
    fn stats_sum_invariant_holds() {
        let pipeline = Pipeline::new();
        pipeline.add_stage(Arc::new(ValidatorStage::new("types").allowed_types(["IP_ADDRESS"])));
        pipeline.add_stage(Arc::new(FunctionStage::new("boom", |_| {
            StageOutcome::Error("synthetic failure".into())
        })));

        let root = Event::root("example.com");
        for i in 0..3 {
            let event = Event::child("dns", "IP_ADDRESS", format!("1.1.1.{i}"), &root)
                .build()
                .unwrap();
            pipeline.execute(event);
        }
        let event = Event::child("harvester", "EMAIL_ADDRESS", "a@b.com", &root)
            .build()
            .unwrap();
        pipeline.execute(event);

        let stats = pipeline.stats_snapshot();
        let types_stage = &stats["types"];
        assert_eq!(types_stage.processed, 4);
        assert_eq!(types_stage.passed + types_stage.dropped + types_stage.errors, types_stage.processed);
        assert_eq!(types_stage.dropped, 1);

        let boom_stage = &stats["boom"];
        assert_eq!(boom_stage.processed, 3);
        assert_eq!(boom_stage.errors, 3);
        assert_eq!(boom_stage.passed, 0, "ERROR is its own disjoint bucket, not also counted as passed");
        assert_eq!(boom_stage.passed + boom_stage.dropped + boom_stage.errors, boom_stage.processed);
    }

    #[test]
    fn tagger_and_router_stages_mutate_metadata() {
        let pipeline = Pipeline::new();
        pipeline.add_stage(Arc::new(TaggerStage::new(
            "tagger",
            vec![("MALICIOUS".to_string(), "risk:high".to_string())],
        )));
        pipeline.add_stage(Arc::new(
            RouterStage::new("router").route_if("alerts", |pe| pe.tags.iter().any(|t| t == "risk:high")),
        ));

        let root = Event::root("example.com");
        let event = Event::child("blacklist", "MALICIOUS_IP", "6.6.6.6", &root)
            .build()
            .unwrap();

        match pipeline.execute(event) {
            PipelineOutcome::Passed(pe) => {
                assert_eq!(pe.tags, vec!["risk:high".to_string()]);
                assert_eq!(pe.metadata["_routes"], serde_json::json!(["alerts"]));
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn a_panicking_stage_is_caught_and_treated_as_error() {
        let pipeline = Pipeline::new();
        pipeline.add_stage(Arc::new(FunctionStage::new("panics", |_| {
            panic!("boom");
        })));

        let root = Event::root("example.com");
        let event = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root).build().unwrap();

        match pipeline.execute(event) {
            PipelineOutcome::Passed(_) => {}
            other => panic!("expected pass-through after caught panic, got {other:?}"),
        }
        let stats = pipeline.stats_snapshot();
        assert_eq!(stats["panics"].errors, 1);
    }

    #[test]
    fn empty_pipeline_passes_everything() {
        let pipeline = Pipeline::new();
        let root = Event::root("example.com");
        let event = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root).build().unwrap();
        assert!(matches!(pipeline.execute(event), PipelineOutcome::Passed(_)));
    }
}
