//! Network security group rule-chain compilation and evaluation.
//!
//! Rules come from two shapes: `security_rule` blocks declared inline on an
//! `azurerm_network_security_group`, and standalone
//! `azurerm_network_security_rule` resources that name the group. Both are
//! normalized into `SecurityRule`, split by direction, and sorted by
//! ascending priority (stable, so declaration order breaks ties).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cloudsight_core::{Access, AttrValue, Direction, Resource, ResourceKey};
use cloudsight_index::ResourceIndex;

use crate::blocks;
use crate::firewall::{self, FirewallRuleSet};

pub const NSG_TYPE: &str = "azurerm_network_security_group";
pub const NSG_RULE_TYPE: &str = "azurerm_network_security_rule";

/// Priority of the platform deny-all rule in both directions.
pub const DEFAULT_DENY_PRIORITY: u32 = 65500;

const DEFAULT_PRIORITY: u32 = 100;

/// Where a rule was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    Inline,
    Standalone,
    Platform,
}

/// A normalized NSG rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub priority: u32,
    pub direction: Direction,
    pub access: Access,
    pub protocol: String,
    pub source_port_range: String,
    pub destination_port_range: String,
    pub source_address_prefix: String,
    pub destination_address_prefix: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_port_ranges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_port_ranges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_address_prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_address_prefixes: Vec<String>,
    pub origin: RuleOrigin,
}

impl SecurityRule {
    /// Normalize a rule from an attribute accessor. Absent fields default
    /// to priority 100, protocol `*`, and `*` ranges; a singular range is
    /// left empty when only its list form is declared.
    fn from_fields<'a>(
        get: impl Fn(&str) -> Option<&'a AttrValue>,
        fallback_name: &str,
        origin: RuleOrigin,
    ) -> Self {
        let text = |field: &str| {
            get(field)
                .map(|v| v.render())
                .filter(|s| !s.trim().is_empty())
        };
        let list = |field: &str| get(field).map(|v| v.string_list()).unwrap_or_default();
        let single_or_star = |field: &str, plural: &[String]| {
            text(field).unwrap_or_else(|| {
                if plural.is_empty() {
                    "*".to_string()
                } else {
                    String::new()
                }
            })
        };

        let source_port_ranges = list("source_port_ranges");
        let destination_port_ranges = list("destination_port_ranges");
        let source_address_prefixes = list("source_address_prefixes");
        let destination_address_prefixes = list("destination_address_prefixes");

        Self {
            name: text("name").unwrap_or_else(|| fallback_name.to_string()),
            priority: get("priority")
                .and_then(|v| v.as_f64())
                .filter(|p| *p >= 0.0)
                .map(|p| p as u32)
                .unwrap_or(DEFAULT_PRIORITY),
            direction: text("direction")
                .map(|d| Direction::parse(&d))
                .unwrap_or(Direction::Inbound),
            access: text("access")
                .map(|a| Access::parse(&a))
                .unwrap_or(Access::Allow),
            protocol: text("protocol").unwrap_or_else(|| "*".to_string()),
            source_port_range: single_or_star("source_port_range", &source_port_ranges),
            destination_port_range: single_or_star("destination_port_range", &destination_port_ranges),
            source_address_prefix: single_or_star("source_address_prefix", &source_address_prefixes),
            destination_address_prefix: single_or_star(
                "destination_address_prefix",
                &destination_address_prefixes,
            ),
            source_port_ranges,
            destination_port_ranges,
            source_address_prefixes,
            destination_address_prefixes,
            origin,
        }
    }

    fn platform(name: &str, priority: u32, direction: Direction, access: Access, src: &str, dst: &str) -> Self {
        Self {
            name: name.to_string(),
            priority,
            direction,
            access,
            protocol: "*".to_string(),
            source_port_range: "*".to_string(),
            destination_port_range: "*".to_string(),
            source_address_prefix: src.to_string(),
            destination_address_prefix: dst.to_string(),
            source_port_ranges: Vec::new(),
            destination_port_ranges: Vec::new(),
            source_address_prefixes: Vec::new(),
            destination_address_prefixes: Vec::new(),
            origin: RuleOrigin::Platform,
        }
    }

    /// `*`/`Any` or a case-insensitive match.
    pub fn matches_protocol(&self, protocol: &str) -> bool {
        let p = self.protocol.trim();
        p == "*" || p.eq_ignore_ascii_case("any") || p.eq_ignore_ascii_case(protocol)
    }

    /// True when any declared destination port spec admits `port`.
    pub fn matches_destination_port(&self, port: u16) -> bool {
        std::iter::once(&self.destination_port_range)
            .chain(self.destination_port_ranges.iter())
            .filter(|spec| !spec.is_empty())
            .any(|spec| port_spec_matches(spec, port))
    }
}

/// Match a port spec: `*`, an exact port, a numeric `start-end` range, or a
/// comma-separated list of those. Unparseable specs never match.
pub fn port_spec_matches(spec: &str, port: u16) -> bool {
    spec.split(',').map(str::trim).any(|part| {
        if part == "*" {
            return true;
        }
        match part.split_once('-') {
            Some((start, end)) => match (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
                (Ok(start), Ok(end)) => (start..=end).contains(&port),
                _ => false,
            },
            None => part.parse::<u16>().is_ok_and(|p| p == port),
        }
    })
}

/// The platform default rules, appended informationally to every NSG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDefaults(pub Vec<SecurityRule>);

impl PlatformDefaults {
    /// Azure's built-in NSG rules.
    pub fn azure() -> Self {
        use Access::{Allow, Deny};
        use Direction::{Inbound, Outbound};
        Self(vec![
            SecurityRule::platform("AllowVnetInBound", 65000, Inbound, Allow, "VirtualNetwork", "VirtualNetwork"),
            SecurityRule::platform("AllowAzureLoadBalancerInBound", 65001, Inbound, Allow, "AzureLoadBalancer", "*"),
            SecurityRule::platform("DenyAllInBound", DEFAULT_DENY_PRIORITY, Inbound, Deny, "*", "*"),
            SecurityRule::platform("AllowVnetOutBound", 65000, Outbound, Allow, "VirtualNetwork", "VirtualNetwork"),
            SecurityRule::platform("AllowInternetOutBound", 65001, Outbound, Allow, "*", "Internet"),
            SecurityRule::platform("DenyAllOutBound", DEFAULT_DENY_PRIORITY, Outbound, Deny, "*", "*"),
        ])
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.0
    }
}

impl Default for PlatformDefaults {
    fn default() -> Self {
        Self::azure()
    }
}

/// Outcome of probing a rule chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub allowed: bool,
    pub rule_name: String,
    pub priority: u32,
    /// True when no declared rule matched and the default deny decided.
    pub synthesized: bool,
}

/// The compiled rule chains of one NSG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRuleSet {
    pub nsg: ResourceKey,
    pub name: String,
    pub inbound: Vec<SecurityRule>,
    pub outbound: Vec<SecurityRule>,
}

impl CompiledRuleSet {
    pub fn chain(&self, direction: Direction) -> &[SecurityRule] {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    /// Walk the chain in ascending priority; the first rule matching both
    /// protocol and destination port decides. No match denies.
    pub fn evaluate(&self, direction: Direction, protocol: &str, port: u16) -> RuleDecision {
        evaluate_chain(self.chain(direction), direction, protocol, port)
    }
}

/// First-match evaluation over an already sorted chain.
pub fn evaluate_chain(
    chain: &[SecurityRule],
    direction: Direction,
    protocol: &str,
    port: u16,
) -> RuleDecision {
    chain
        .iter()
        .find(|rule| rule.matches_protocol(protocol) && rule.matches_destination_port(port))
        .map(|rule| RuleDecision {
            allowed: rule.access == Access::Allow,
            rule_name: rule.name.clone(),
            priority: rule.priority,
            synthesized: false,
        })
        .unwrap_or_else(|| RuleDecision {
            allowed: false,
            rule_name: match direction {
                Direction::Inbound => "DenyAllInBound",
                Direction::Outbound => "DenyAllOutBound",
            }
            .to_string(),
            priority: DEFAULT_DENY_PRIORITY,
            synthesized: true,
        })
}

/// Compiles NSG rule chains from a resource index.
pub struct RuleCompiler<'a> {
    index: &'a ResourceIndex,
    defaults: PlatformDefaults,
}

impl<'a> RuleCompiler<'a> {
    pub fn new(index: &'a ResourceIndex, defaults: PlatformDefaults) -> Self {
        Self { index, defaults }
    }

    pub fn defaults(&self) -> &PlatformDefaults {
        &self.defaults
    }

    /// Compile the NSG with local name (or `name` attribute) `nsg_name`.
    pub fn compile_rules(&self, nsg_name: &str) -> Option<CompiledRuleSet> {
        let direct = ResourceKey::new(NSG_TYPE, nsg_name);
        self.index
            .lookup(&direct)
            .or_else(|| self.index.of_type(NSG_TYPE).find(|r| r.display_name() == nsg_name))
            .map(|nsg| self.compile(nsg))
    }

    /// Compile every NSG in the index, keyed by NSG resource key.
    pub fn compile_all(&self) -> BTreeMap<ResourceKey, CompiledRuleSet> {
        self.index
            .of_type(NSG_TYPE)
            .map(|nsg| (nsg.key(), self.compile(nsg)))
            .collect()
    }

    /// Firewall and firewall-policy collections, keyed by owner key.
    pub fn compile_firewall_rules(&self) -> BTreeMap<ResourceKey, FirewallRuleSet> {
        let policies = firewall::compile_policies(self.index);
        let mut sets = firewall::compile_firewalls(self.index, &policies);
        sets.extend(policies);
        sets
    }

    pub fn compile(&self, nsg: &Resource) -> CompiledRuleSet {
        let mut rules: Vec<SecurityRule> = Vec::new();

        for (i, block) in blocks(nsg.attr("security_rule")).into_iter().enumerate() {
            rules.push(SecurityRule::from_fields(
                |p| block.get_path(p),
                &format!("{}-rule-{}", nsg.name, i),
                RuleOrigin::Inline,
            ));
        }

        for standalone in self.index.of_type(NSG_RULE_TYPE) {
            let targets_group = standalone
                .attr_str("network_security_group_name")
                .is_some_and(|v| v.contains(nsg.name.as_str()) || v == nsg.display_name());
            if targets_group {
                rules.push(SecurityRule::from_fields(
                    |p| standalone.attr(p),
                    &standalone.name,
                    RuleOrigin::Standalone,
                ));
            }
        }

        let (mut inbound, mut outbound): (Vec<_>, Vec<_>) = rules
            .into_iter()
            .partition(|r| r.direction == Direction::Inbound);
        inbound.sort_by_key(|r| r.priority);
        outbound.sort_by_key(|r| r.priority);

        tracing::debug!(
            nsg = %nsg.key(),
            inbound = inbound.len(),
            outbound = outbound.len(),
            "Compiled NSG rule chains"
        );

        CompiledRuleSet {
            nsg: nsg.key(),
            name: nsg.display_name().to_string(),
            inbound,
            outbound,
        }
    }
}
