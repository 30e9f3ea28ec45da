//! The event bus, filter chain, and pipeline an event travels through
//! between a module producing it and every consumer downstream.

mod bus;
mod filter;
mod pipeline;

pub use bus::{BackpressurePolicy, BusStats, EventBus, EventSink};
pub use filter::{
    ChainMode, Filter, FilterChain, FilterStats, FilterVerdict, ModuleFilter, PatternFilter,
    PatternMode, PredicateFilter, RiskFilter, TypeFilter,
};
pub use pipeline::{
    Pipeline, PipelineEvent, PipelineOutcome, PipelineStage, StageOutcome, StageStats,
    FunctionStage, RouterStage, TaggerStage, TransformStage, ValidatorStage,
};
