//! The Event model: the atomic unit of discovery that flows through the bus.
//!
//! Events are immutable once built. Only the scoring fields (`confidence`,
//! `visibility`, `risk`) may be supplied at construction time; there is no
//! setter afterwards. Equality and hashing are derived from `hash` alone, per
//! the data model's "equality and hashing are derived from hash only" rule.

use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Sentinel used for both `hash` and `source_hash` on the one root event per scan.
pub const ROOT_SENTINEL: &str = "ROOT";

/// Minimal parent reference carried for the legacy reporting projection
/// (`as_dict`). Distinct from the full `source_hash` based provenance chain
/// that the store resolves by lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentRef {
    pub hash: String,
    pub data: String,
}

/// The atomic unit of discovery produced and consumed by modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub data: String,
    /// Name of the producing module; empty only for the root event.
    pub module: String,
    /// Lightweight parent reference, present for every non-root event
    /// constructed with a known parent (absent for synthetic/test events).
    pub source_event: Option<ParentRef>,
    /// Content-addressed hash of the parent, or the literal sentinel `ROOT`.
    pub source_hash: String,
    /// SHA-256 over `event_type || generated || module || nonce`, or `ROOT`.
    pub hash: String,
    /// Wall-clock seconds at creation.
    pub generated: f64,
    pub confidence: u8,
    pub visibility: u8,
    pub risk: u8,
    pub actual_source: Option<String>,
    pub data_source: Option<String>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn compute_hash(event_type: &str, generated: f64, module: &str) -> String {
    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);
    let mut hasher = Sha256::new();
    hasher.update(event_type.as_bytes());
    hasher.update(format!("{generated:.6}").as_bytes());
    hasher.update(module.as_bytes());
    hasher.update(&nonce);
    hex::encode(hasher.finalize())
}

impl Event {
    /// Construct the one root event for a scan. Never fails: the target
    /// value becomes `data`, `event_type` is `ROOT`, `module` is empty, and
    /// `hash`/`source_hash` are both the `ROOT` sentinel.
    pub fn root(target_value: impl Into<String>) -> Event {
        Event {
            event_type: ROOT_SENTINEL.to_string(),
            data: target_value.into(),
            module: String::new(),
            source_event: None,
            source_hash: ROOT_SENTINEL.to_string(),
            hash: ROOT_SENTINEL.to_string(),
            generated: now_seconds(),
            confidence: 100,
            visibility: 100,
            risk: 0,
            actual_source: None,
            data_source: None,
        }
    }

    /// Start building a non-root event produced by `module` in response to
    /// `parent`.
    pub fn child(
        module: impl Into<String>,
        event_type: impl Into<String>,
        data: impl Into<String>,
        parent: &Event,
    ) -> EventBuilder {
        EventBuilder {
            event_type: event_type.into(),
            data: data.into(),
            module: module.into(),
            parent_hash: parent.hash.clone(),
            parent_data: Some(parent.data.clone()),
            confidence: 100,
            visibility: 100,
            risk: 0,
            actual_source: None,
            data_source: None,
            generated: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.hash == ROOT_SENTINEL
    }

    /// Legacy reporting projection: `{generated (integer seconds), type,
    /// data, module, source}` where `source` is the parent's `data`, or the
    /// empty string when there is no parent (i.e. for the root event).
    pub fn as_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "generated": self.generated as i64,
            "type": self.event_type,
            "data": self.data,
            "module": self.module,
            "source": self.source_event.as_ref().map(|p| p.data.as_str()).unwrap_or(""),
        })
    }
}

/// Builder for non-root events; validates scoring fields and emptiness on
/// `build()`.
pub struct EventBuilder {
    event_type: String,
    data: String,
    module: String,
    parent_hash: String,
    parent_data: Option<String>,
    confidence: u8,
    visibility: u8,
    risk: u8,
    actual_source: Option<String>,
    data_source: Option<String>,
    generated: Option<f64>,
}

impl EventBuilder {
    pub fn confidence(mut self, v: u8) -> Self {
        self.confidence = v;
        self
    }

    pub fn visibility(mut self, v: u8) -> Self {
        self.visibility = v;
        self
    }

    pub fn risk(mut self, v: u8) -> Self {
        self.risk = v;
        self
    }

    pub fn actual_source(mut self, v: impl Into<String>) -> Self {
        self.actual_source = Some(v.into());
        self
    }

    pub fn data_source(mut self, v: impl Into<String>) -> Self {
        self.data_source = Some(v.into());
        self
    }

    /// Override the creation timestamp. Only meant for tests and replay.
    pub fn generated_at(mut self, seconds: f64) -> Self {
        self.generated = Some(seconds);
        self
    }

    pub fn build(self) -> Result<Event, EngineError> {
        if self.event_type.is_empty() {
            return Err(EngineError::Validation("event_type must not be empty".into()));
        }
        if self.data.is_empty() {
            return Err(EngineError::Validation("data must not be empty".into()));
        }
        if self.module.is_empty() {
            return Err(EngineError::Validation(
                "module must not be empty for a non-root event".into(),
            ));
        }
        for (name, v) in [
            ("confidence", self.confidence),
            ("visibility", self.visibility),
            ("risk", self.risk),
        ] {
            if v > 100 {
                return Err(EngineError::Validation(format!(
                    "{name} must be in 0..=100, got {v}"
                )));
            }
        }

        let generated = self.generated.unwrap_or_else(now_seconds);
        let hash = compute_hash(&self.event_type, generated, &self.module);

        Ok(Event {
            event_type: self.event_type,
            data: self.data,
            module: self.module,
            source_event: self.parent_data.map(|data| ParentRef {
                hash: self.parent_hash.clone(),
                data,
            }),
            source_hash: self.parent_hash,
            hash,
            generated,
            confidence: self.confidence,
            visibility: self.visibility,
            risk: self.risk,
            actual_source: self.actual_source,
            data_source: self.data_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_event_has_sentinel_hashes() {
        let root = Event::root("example.com");
        assert_eq!(root.hash, ROOT_SENTINEL);
        assert_eq!(root.source_hash, ROOT_SENTINEL);
        assert!(root.module.is_empty());
        assert!(root.is_root());
    }

    #[test]
    fn child_event_points_at_parent_hash() {
        let root = Event::root("example.com");
        let child = Event::child("dns", "IP_ADDRESS", "93.184.216.34", &root)
            .build()
            .unwrap();
        assert_eq!(child.source_hash, root.hash);
        assert_ne!(child.hash, ROOT_SENTINEL);
        assert_eq!(child.source_event.unwrap().data, "example.com");
    }

    #[test]
    fn distinct_events_get_distinct_hashes() {
        let root = Event::root("example.com");
        let a = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root).build().unwrap();
        let b = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root).build().unwrap();
        assert_ne!(a.hash, b.hash, "nonce must decorrelate identical (type, module) pairs");
    }

    #[test]
    fn empty_data_fails_construction() {
        let root = Event::root("example.com");
        let err = Event::child("dns", "IP_ADDRESS", "", &root).build().unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn risk_out_of_range_fails_construction() {
        let root = Event::root("example.com");
        let err = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root)
            .risk(101)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn equality_and_hash_are_derived_from_hash_field_only() {
        let root = Event::root("example.com");
        let mut a = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root).build().unwrap();
        let b = a.clone();
        assert_eq!(a, b);
        a.data = "2.2.2.2".to_string(); // mutate a non-hash field
        assert_eq!(a, b, "equality must ignore everything but hash");
    }

    #[test]
    fn as_dict_projects_parent_data_as_source() {
        let root = Event::root("example.com");
        let child = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root).build().unwrap();
        let dict = child.as_dict();
        assert_eq!(dict["source"], "example.com");
        assert_eq!(dict["type"], "IP_ADDRESS");

        let root_dict = root.as_dict();
        assert_eq!(root_dict["source"], "");
    }
}
