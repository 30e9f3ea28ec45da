//! The correlation engine: two cooperating subsystems that both turn raw
//! events into named, scored findings.
//!
//! [`batch::RuleCorrelator`] runs declarative rule documents over a scan's
//! durable event history after the fact. [`streaming::CorrelationEngine`]
//! watches the live bus and fires on sliding-window thresholds as events
//! arrive. They share nothing at runtime: a deployment can run either,
//! both, or neither.

mod aggregate;
mod batch;
mod enrichment;
mod result;
mod rule;
mod streaming;

pub use aggregate::{aggregate, apply_analysis, render_headline, Bucket};
pub use batch::RuleCorrelator;
pub use enrichment::{extract_values, match_values, Enrichment, MatchedEvent};
pub use result::CorrelationResult;
pub use rule::{
    AggregationSpec, AnalysisStep, Collection, CorrelationRuleDoc, CrossCollectionMatchMethod, FieldPath,
    FieldRoot, MatchAllToFirstCollectionSpec, MatchMethod, MatchRule, OutlierSpec, RuleMeta, ThresholdSpec,
};
pub use streaming::{
    CombineMode, Condition, ConditionOp, ConditionValue, CorrelationEngine, CorrelationMatch, CorrelationRule,
};
