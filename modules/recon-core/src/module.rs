//! Static module metadata shared by the resolver, orchestrator, bus, and sandbox.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Wildcard consume entry meaning "deliver every event type to this module".
pub const CONSUMES_ALL: &str = "*";

/// Static descriptor for a module, declared once at registry build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub produces: HashSet<String>,
    pub consumes: HashSet<String>,
    /// Types this module can use but whose absence never blocks resolution.
    pub optional_consumes: HashSet<String>,
    pub priority: i32,
    pub capabilities: HashSet<String>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            produces: HashSet::new(),
            consumes: HashSet::new(),
            optional_consumes: HashSet::new(),
            priority: 0,
            capabilities: HashSet::new(),
        }
    }

    pub fn produces(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.produces.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn consumes(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.consumes.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn optional_consumes(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.optional_consumes
            .extend(types.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn capability(mut self, flag: impl Into<String>) -> Self {
        self.capabilities.insert(flag.into());
        self
    }

    /// Whether this module watches `event_type`, honoring the `"*"` wildcard.
    pub fn watches(&self, event_type: &str) -> bool {
        self.consumes.contains(CONSUMES_ALL)
            || self.consumes.contains(event_type)
            || self.optional_consumes.contains(event_type)
    }
}
