//! The scan seed and its scope rules.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    InternetName,
    IpAddress,
    Ipv6Address,
    NetblockOwner,
    NetblockMember,
    EmailAddr,
    PhoneNumber,
    HumanName,
    Username,
    BitcoinAddress,
    Other,
}

/// An alternate `(type, value)` pair the target is also known by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub target_type: TargetType,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub target_type: TargetType,
    pub value: String,
    pub aliases: Vec<Alias>,
    /// Whether an observation one DNS label up from `value` is still in scope.
    pub include_parent_domain: bool,
    /// Whether a subdomain of `value` is still in scope.
    pub include_child_domain: bool,
}

impl Target {
    pub fn new(target_type: TargetType, value: impl Into<String>) -> Self {
        Self {
            target_type,
            value: value.into(),
            aliases: Vec::new(),
            include_parent_domain: false,
            include_child_domain: true,
        }
    }

    pub fn with_alias(mut self, target_type: TargetType, value: impl Into<String>) -> Self {
        self.aliases.push(Alias {
            target_type,
            value: value.into(),
        });
        self
    }

    /// Exact alias match against `value` or any declared alias, regardless of
    /// observed type.
    fn matches_alias_exactly(&self, observed: &str) -> bool {
        observed.eq_ignore_ascii_case(&self.value)
            || self.aliases.iter().any(|a| a.value.eq_ignore_ascii_case(observed))
    }

    fn matches_domain_scope(&self, observed: &str) -> bool {
        let observed = observed.trim_end_matches('.').to_ascii_lowercase();
        let base = self.value.trim_end_matches('.').to_ascii_lowercase();

        if observed == base {
            return true;
        }
        if self.include_child_domain && observed.ends_with(&format!(".{base}")) {
            return true;
        }
        if self.include_parent_domain {
            if let Some(parent) = base.split_once('.').map(|(_, rest)| rest) {
                if observed == parent || observed.ends_with(&format!(".{parent}")) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether a CIDR string (`a.b.c.d/n`) contains `ip`.
    fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
        let Some((addr_str, prefix_str)) = cidr.split_once('/') else {
            return false;
        };
        let (Ok(network), Ok(prefix)) = (addr_str.parse::<IpAddr>(), prefix_str.parse::<u32>())
        else {
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
                let mask = if prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - prefix)
                };
                (u128::from(net) & mask) == (u128::from(host) & mask)
            }
            _ => false,
        }
    }

    /// Whether an observation value is considered on-scope for this target.
    pub fn in_scope(&self, observed_type: TargetType, observed_value: &str) -> bool {
        if self.matches_alias_exactly(observed_value) {
            return true;
        }

        match self.target_type {
            TargetType::NetblockOwner | TargetType::NetblockMember => {
                if let Ok(ip) = observed_value.parse::<IpAddr>() {
                    return Self::cidr_contains(&self.value, ip);
                }
                false
            }
            TargetType::InternetName => match observed_type {
                TargetType::InternetName => self.matches_domain_scope(observed_value),
                _ => false,
            },
            _ => false,
        }
    }
}
