//! Scan policy engine: target/module/event-type admission control plus
//! depth and budget enforcement.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use regex::Regex;
use serde_json::{json, Value};

/// Admission and budget rules for one scan. Some fields are accepted by
/// `from_dict` but deliberately not echoed back by `to_dict`: exclusion
/// patterns/networks, the allow-listed-target set, and per-module/global
/// rate limits are write-only configuration, not round-tripped state.
#[derive(Debug, Clone, Default)]
pub struct ScanPolicy {
    pub max_depth: Option<u32>,
    pub max_events_total: Option<u64>,
    pub max_events_per_module: Option<u64>,
    pub denied_modules: HashSet<String>,
    pub denied_event_types: HashSet<String>,
    pub allowed_event_types: Option<HashSet<String>>,

    /// Accepted by `from_dict`; never echoed by `to_dict`.
    pub exclusion_patterns: Vec<String>,
    /// Accepted by `from_dict`; never echoed by `to_dict`.
    pub exclusion_networks: Vec<String>,
    /// Accepted by `from_dict`; never echoed by `to_dict`.
    pub allowed_targets: HashSet<String>,
    /// Accepted by `from_dict`; never echoed by `to_dict`.
    pub rate_limit_per_module: HashMap<String, f64>,
    /// Accepted by `from_dict`; never echoed by `to_dict`.
    pub rate_limit_global: Option<f64>,
}

fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
    let Some((addr_str, prefix_str)) = cidr.split_once('/') else {
        return false;
    };
    let (Ok(network), Ok(prefix)) = (addr_str.parse::<IpAddr>(), prefix_str.parse::<u32>()) else {
        return false;
    };
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(host)) => {
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(net) & mask) == (u32::from(host) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(host)) => {
            if prefix > 128 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            (u128::from(net) & mask) == (u128::from(host) & mask)
        }
        _ => false,
    }
}

impl ScanPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a discovered target value is admitted. An empty
    /// `allowed_targets` set means no allow-list restriction. Exclusion
    /// patterns/networks always apply and override an allow-list match.
    pub fn admit_target(&self, value: &str) -> bool {
        if !self.allowed_targets.is_empty() && !self.allowed_targets.contains(value) {
            return false;
        }
        for pattern in &self.exclusion_patterns {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(value) {
                    return false;
                }
            }
        }
        if let Ok(ip) = value.parse::<IpAddr>() {
            for cidr in &self.exclusion_networks {
                if cidr_contains(cidr, ip) {
                    return false;
                }
            }
        }
        true
    }

    pub fn admit_module(&self, name: &str) -> bool {
        !self.denied_modules.contains(name)
    }

    pub fn admit_event_type(&self, event_type: &str) -> bool {
        if self.denied_event_types.contains(event_type) {
            return false;
        }
        match &self.allowed_event_types {
            Some(allowed) => allowed.contains(event_type),
            None => true,
        }
    }

    pub fn admit_depth(&self, depth: u32) -> bool {
        match self.max_depth {
            Some(limit) => depth <= limit,
            None => true,
        }
    }

    pub fn within_total_budget(&self, events_so_far: u64) -> bool {
        match self.max_events_total {
            Some(limit) => events_so_far < limit,
            None => true,
        }
    }

    pub fn within_module_budget(&self, events_from_module: u64) -> bool {
        match self.max_events_per_module {
            Some(limit) => events_from_module < limit,
            None => true,
        }
    }

    /// Serializes the symmetric subset of fields. Exclusion
    /// patterns/networks, the allow-listed-target set, and rate limits are
    /// intentionally omitted (see the struct doc and `R2`).
    pub fn to_dict(&self) -> Value {
        json!({
            "max_depth": self.max_depth,
            "max_events_total": self.max_events_total,
            "max_events_per_module": self.max_events_per_module,
            "denied_modules": sorted(&self.denied_modules),
            "denied_event_types": sorted(&self.denied_event_types),
            "allowed_event_types": self.allowed_event_types.as_ref().map(sorted),
        })
    }

    /// Parses a policy document. Accepts every field `to_dict` serializes,
    /// plus the asymmetric fields it never echoes back.
    pub fn from_dict(value: &Value) -> Self {
        let string_set = |key: &str| -> HashSet<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default()
        };

        Self {
            max_depth: value.get("max_depth").and_then(Value::as_u64).map(|v| v as u32),
            max_events_total: value.get("max_events_total").and_then(Value::as_u64),
            max_events_per_module: value.get("max_events_per_module").and_then(Value::as_u64),
            denied_modules: string_set("denied_modules"),
            denied_event_types: string_set("denied_event_types"),
            allowed_event_types: value
                .get("allowed_event_types")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect()),
            exclusion_patterns: value
                .get("exclusion_patterns")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            exclusion_networks: value
                .get("exclusion_networks")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            allowed_targets: string_set("allowed_targets"),
            rate_limit_per_module: value
                .get("rate_limit_per_module")
                .and_then(Value::as_object)
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_f64().map(|v| (k.clone(), v)))
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit_global: value.get("rate_limit_global").and_then(Value::as_f64),
        }
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_symmetric_fields_only() {
        let mut policy = ScanPolicy::new();
        policy.max_depth = Some(5);
        policy.max_events_total = Some(10_000);
        policy.denied_modules.insert("sfp_slow".to_string());
        policy.allowed_targets.insert("example.com".to_string());
        policy.exclusion_patterns.push("^internal\\.".to_string());
        policy.rate_limit_global = Some(2.0);

        let round_tripped = ScanPolicy::from_dict(&policy.to_dict());

        assert_eq!(round_tripped.max_depth, policy.max_depth);
        assert_eq!(round_tripped.max_events_total, policy.max_events_total);
        assert_eq!(round_tripped.denied_modules, policy.denied_modules);
        assert!(
            round_tripped.allowed_targets.is_empty(),
            "allow-listed targets are never echoed by to_dict"
        );
        assert!(round_tripped.exclusion_patterns.is_empty());
        assert!(round_tripped.rate_limit_global.is_none());
    }

    #[test]
    fn exclusion_pattern_denies_target() {
        let mut policy = ScanPolicy::new();
        policy.exclusion_patterns.push(r"^internal-".to_string());
        assert!(!policy.admit_target("internal-host.example.com"));
        assert!(policy.admit_target("www.example.com"));
    }

    #[test]
    fn exclusion_network_denies_ip() {
        let mut policy = ScanPolicy::new();
        policy.exclusion_networks.push("10.0.0.0/8".to_string());
        assert!(!policy.admit_target("10.1.2.3"));
        assert!(policy.admit_target("8.8.8.8"));
    }

    #[test]
    fn allow_list_restricts_to_named_targets_only() {
        let mut policy = ScanPolicy::new();
        policy.allowed_targets.insert("example.com".to_string());
        assert!(policy.admit_target("example.com"));
        assert!(!policy.admit_target("other.com"));
    }

    #[test]
    fn budgets_enforce_strict_less_than() {
        let mut policy = ScanPolicy::new();
        policy.max_events_total = Some(100);
        assert!(policy.within_total_budget(99));
        assert!(!policy.within_total_budget(100));
    }

    #[test]
    fn depth_admission_respects_max_depth() {
        let mut policy = ScanPolicy::new();
        policy.max_depth = Some(3);
        assert!(policy.admit_depth(3));
        assert!(!policy.admit_depth(4));
    }
}
