//! The filter chain: a pre-pipeline gate of independent pass/block/skip
//! filters, run either standalone or wrapped as a pipeline stage.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use recon_core::Event;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass,
    Block,
    Skip,
}

pub trait Filter: Send + Sync {
    fn name(&self) -> &str;
    fn enabled(&self) -> bool {
        true
    }
    fn evaluate(&self, event: &Event) -> FilterVerdict;
}

pub struct TypeFilter {
    name: String,
    allowed: Vec<String>,
    enabled: bool,
}

impl TypeFilter {
    pub fn new(name: impl Into<String>, allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Filter for TypeFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn evaluate(&self, event: &Event) -> FilterVerdict {
        if self.allowed.iter().any(|t| t == &event.event_type) {
            FilterVerdict::Pass
        } else {
            FilterVerdict::Block
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMode {
    Allow,
    Deny,
}

pub struct PatternFilter {
    name: String,
    regex: Regex,
    mode: PatternMode,
}

impl PatternFilter {
    pub fn new(name: impl Into<String>, regex: Regex, mode: PatternMode) -> Self {
        Self {
            name: name.into(),
            regex,
            mode,
        }
    }
}

impl Filter for PatternFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, event: &Event) -> FilterVerdict {
        let matched = self.regex.is_match(&event.data);
        match (matched, self.mode) {
            (true, PatternMode::Allow) => FilterVerdict::Pass,
            (false, PatternMode::Allow) => FilterVerdict::Block,
            (true, PatternMode::Deny) => FilterVerdict::Block,
            (false, PatternMode::Deny) => FilterVerdict::Pass,
        }
    }
}

pub struct RiskFilter {
    name: String,
    min: u8,
    max: u8,
}

impl RiskFilter {
    pub fn new(name: impl Into<String>, min: u8, max: u8) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }
}

impl Filter for RiskFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, event: &Event) -> FilterVerdict {
        if event.risk >= self.min && event.risk <= self.max {
            FilterVerdict::Pass
        } else {
            FilterVerdict::Block
        }
    }
}

pub struct ModuleFilter {
    name: String,
    allowed: Vec<String>,
}

impl ModuleFilter {
    pub fn new(name: impl Into<String>, allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl Filter for ModuleFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, event: &Event) -> FilterVerdict {
        if self.allowed.iter().any(|m| m == &event.module) {
            FilterVerdict::Pass
        } else {
            FilterVerdict::Block
        }
    }
}

pub struct PredicateFilter {
    name: String,
    predicate: Box<dyn Fn(&Event) -> FilterVerdict + Send + Sync>,
}

impl PredicateFilter {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&Event) -> FilterVerdict + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }
}

impl Filter for PredicateFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, event: &Event) -> FilterVerdict {
        (self.predicate)(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    AllPass,
    AnyPass,
}

#[derive(Debug, Clone, Default)]
pub struct FilterStats {
    pub evaluated: u64,
    pub passed: u64,
    pub blocked: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// An ordered list of independent filters evaluated pre-pipeline.
pub struct FilterChain {
    mode: ChainMode,
    filters: Mutex<Vec<Arc<dyn Filter>>>,
    stats: Mutex<HashMap<String, FilterStats>>,
}

impl FilterChain {
    pub fn new(mode: ChainMode) -> Self {
        Self {
            mode,
            filters: Mutex::new(Vec::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_filter(&self, filter: Arc<dyn Filter>) {
        self.filters.lock().unwrap().push(filter);
    }

    pub fn stats_snapshot(&self) -> HashMap<String, FilterStats> {
        self.stats.lock().unwrap().clone()
    }

    fn evaluate_safe(&self, filter: &Arc<dyn Filter>, event: &Event) -> FilterVerdict {
        let verdict = panic::catch_unwind(AssertUnwindSafe(|| filter.evaluate(event)))
            .unwrap_or(FilterVerdict::Skip);

        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(filter.name().to_string()).or_default();
        entry.evaluated += 1;
        match verdict {
            FilterVerdict::Pass => entry.passed += 1,
            FilterVerdict::Block => entry.blocked += 1,
            FilterVerdict::Skip => entry.skipped += 1,
        }
        verdict
    }

    /// Evaluate the chain against `event`. Returns `true` iff the event
    /// passes, per the chain's mode (see `I5`).
    pub fn evaluate(&self, event: &Event) -> bool {
        let filters = self.filters.lock().unwrap().clone();

        match self.mode {
            ChainMode::AllPass => {
                for filter in &filters {
                    if !filter.enabled() {
                        continue;
                    }
                    if self.evaluate_safe(filter, event) == FilterVerdict::Block {
                        return false;
                    }
                }
                true
            }
            ChainMode::AnyPass => {
                let mut any_pass = false;
                for filter in &filters {
                    if !filter.enabled() {
                        continue;
                    }
                    if self.evaluate_safe(filter, event) == FilterVerdict::Pass {
                        any_pass = true;
                    }
                }
                any_pass
            }
        }
    }
}
