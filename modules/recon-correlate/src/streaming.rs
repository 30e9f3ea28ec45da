//! The streaming (online) correlator: per-rule, per-group sliding-window
//! accumulation over the live event bus. Attaches via [`recon_bus::EventSink`]
//! so it sits alongside the event store as a direct bus consumer.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recon_bus::EventSink;
use recon_core::Event;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// The fixed group key used when a rule groups by a field absent from the
/// triggering event.
const UNGROUPED_KEY: &str = "_GLOBAL_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Eq,
    Ne,
    Contains,
    Matches,
    Gt,
    Lt,
    In,
    NotIn,
    Exists,
}

#[derive(Debug, Clone)]
pub enum ConditionValue {
    Str(String),
    Num(f64),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    pub value: ConditionValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    All,
    Any,
}

#[derive(Debug, Clone)]
pub struct CorrelationRule {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub mode: CombineMode,
    pub threshold_count: usize,
    pub window_seconds: Option<f64>,
    pub group_by: Option<String>,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct CorrelationMatch {
    pub rule_name: String,
    pub events: Vec<Event>,
    pub metadata: Value,
}

type MatchCallback = Arc<dyn Fn(&CorrelationMatch) + Send + Sync>;

struct RuleState {
    rule: CorrelationRule,
    accumulators: HashMap<String, Vec<Event>>,
}

/// `field` is read directly off the `Event` struct; `actual_source` and
/// `data_source` are the only fields that can be genuinely absent.
fn field_raw(event: &Event, field: &str) -> Option<String> {
    match field {
        "type" | "event_type" => Some(event.event_type.clone()),
        "module" => Some(event.module.clone()),
        "data" => Some(event.data.clone()),
        "hash" => Some(event.hash.clone()),
        "source_hash" => Some(event.source_hash.clone()),
        "risk" => Some(event.risk.to_string()),
        "confidence" => Some(event.confidence.to_string()),
        "visibility" => Some(event.visibility.to_string()),
        "generated" => Some(event.generated.to_string()),
        "actual_source" => event.actual_source.clone(),
        "data_source" => event.data_source.clone(),
        _ => None,
    }
}

/// A condition whose field is absent from the event never matches, except
/// `exists`, which is the only op well-defined against an absent field.
fn evaluate_condition(event: &Event, condition: &Condition) -> bool {
    if condition.op == ConditionOp::Exists {
        return field_raw(event, &condition.field).is_some();
    }
    let Some(actual) = field_raw(event, &condition.field) else {
        return false;
    };
    match condition.op {
        ConditionOp::Eq => matches!(&condition.value, ConditionValue::Str(v) if v == &actual),
        ConditionOp::Ne => !matches!(&condition.value, ConditionValue::Str(v) if v == &actual),
        ConditionOp::Contains => matches!(&condition.value, ConditionValue::Str(v) if actual.contains(v.as_str())),
        ConditionOp::Matches => match &condition.value {
            ConditionValue::Str(pattern) => Regex::new(pattern).map(|re| re.is_match(&actual)).unwrap_or(false),
            _ => false,
        },
        ConditionOp::Gt => match (&condition.value, actual.parse::<f64>()) {
            (ConditionValue::Num(bound), Ok(v)) => v > *bound,
            _ => false,
        },
        ConditionOp::Lt => match (&condition.value, actual.parse::<f64>()) {
            (ConditionValue::Num(bound), Ok(v)) => v < *bound,
            _ => false,
        },
        ConditionOp::In => matches!(&condition.value, ConditionValue::List(list) if list.contains(&actual)),
        ConditionOp::NotIn => matches!(&condition.value, ConditionValue::List(list) if !list.contains(&actual)),
        ConditionOp::Exists => unreachable!("handled above"),
    }
}

fn rule_matches(event: &Event, rule: &CorrelationRule) -> bool {
    match rule.mode {
        CombineMode::All => rule.conditions.iter().all(|c| evaluate_condition(event, c)),
        CombineMode::Any => !rule.conditions.is_empty() && rule.conditions.iter().any(|c| evaluate_condition(event, c)),
    }
}

fn group_key(event: &Event, rule: &CorrelationRule) -> String {
    match &rule.group_by {
        Some(field) => field_raw(event, field).unwrap_or_else(|| UNGROUPED_KEY.to_string()),
        None => UNGROUPED_KEY.to_string(),
    }
}

/// Online correlation over the live event stream. Window pruning uses the
/// most-recently-arrived event's `generated` timestamp as "now": events are
/// processed close to real time, so this keeps pruning deterministic and
/// testable without a wall-clock dependency.
#[derive(Default)]
pub struct CorrelationEngine {
    rules: Mutex<Vec<RuleState>>,
    matches: Mutex<Vec<CorrelationMatch>>,
    callbacks: Mutex<Vec<MatchCallback>>,
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_rule(&self, rule: CorrelationRule) {
        self.rules.lock().unwrap().push(RuleState { rule, accumulators: HashMap::new() });
    }

    pub fn on_match(&self, callback: impl Fn(&CorrelationMatch) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().push(Arc::new(callback));
    }

    pub fn matches(&self, rule_name: Option<&str>) -> Vec<CorrelationMatch> {
        let matches = self.matches.lock().unwrap();
        match rule_name {
            Some(name) => matches.iter().filter(|m| m.rule_name == name).cloned().collect(),
            None => matches.clone(),
        }
    }

    /// Evaluates every enabled rule against `event`, ordered by `priority`
    /// descending. A fired bucket resets to empty immediately afterward.
    pub fn handle_event(&self, event: &Event) {
        self.handle_event_at(event, event.generated);
    }

    /// Exposed so tests can drive the window clock deterministically
    /// through synthetic `generated` timestamps rather than wall time.
    pub fn handle_event_at(&self, event: &Event, now: f64) {
        let mut rules = self.rules.lock().unwrap();
        rules.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));

        let mut fired: Vec<CorrelationMatch> = Vec::new();
        for state in rules.iter_mut() {
            if !state.rule.enabled || !rule_matches(event, &state.rule) {
                continue;
            }
            let key = group_key(event, &state.rule);
            let acc = state.accumulators.entry(key.clone()).or_default();
            acc.push(event.clone());

            if let Some(window) = state.rule.window_seconds {
                let cutoff = now - window;
                acc.retain(|e| e.generated >= cutoff);
            }

            if acc.len() >= state.rule.threshold_count {
                let metadata = json!({
                    "count": acc.len(),
                    "group_key": key,
                });
                fired.push(CorrelationMatch { rule_name: state.rule.name.clone(), events: acc.clone(), metadata });
                acc.clear();
            }
        }
        drop(rules);

        for m in fired {
            debug!(rule = %m.rule_name, count = %m.events.len(), "correlation rule fired");
            self.matches.lock().unwrap().push(m.clone());
            let callbacks = self.callbacks.lock().unwrap().clone();
            for callback in callbacks {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(&m))) {
                    warn!(rule = %m.rule_name, ?panic, "correlation match callback panicked");
                }
            }
        }
    }
}

#[async_trait]
impl EventSink for CorrelationEngine {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.handle_event(event);
        Ok(())
    }
}
