//! Azure Firewall rule collections.
//!
//! Classic firewalls declare application, network, and NAT rule collections
//! as standalone resources naming the firewall. Firewall policies group
//! collections inside `azurerm_firewall_policy_rule_collection_group`
//! resources. Both compile to a flat list of collections that keeps the
//! group priority alongside the collection priority, so evaluation can
//! honour the two-level order.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use cloudsight_core::{AttrValue, Resource, ResourceKey};
use cloudsight_index::ResourceIndex;

use crate::blocks;
use crate::rules::port_spec_matches;

pub const FIREWALL_TYPE: &str = "azurerm_firewall";
pub const FIREWALL_POLICY_TYPE: &str = "azurerm_firewall_policy";
const POLICY_GROUP_TYPE: &str = "azurerm_firewall_policy_rule_collection_group";

const CLASSIC_COLLECTION_TYPES: &[(&str, CollectionKind)] = &[
    ("azurerm_firewall_nat_rule_collection", CollectionKind::Nat),
    ("azurerm_firewall_network_rule_collection", CollectionKind::Network),
    ("azurerm_firewall_application_rule_collection", CollectionKind::Application),
];

const POLICY_COLLECTION_BLOCKS: &[(&str, CollectionKind)] = &[
    ("nat_rule_collection", CollectionKind::Nat),
    ("network_rule_collection", CollectionKind::Network),
    ("application_rule_collection", CollectionKind::Application),
];

/// Collection kind. Declaration order is processing order: NAT rules are
/// consulted before network rules, network rules before application rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Nat,
    Network,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionAction {
    Allow,
    Deny,
    Dnat,
}

impl CollectionAction {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("deny") {
            CollectionAction::Deny
        } else if s.eq_ignore_ascii_case("dnat") {
            CollectionAction::Dnat
        } else {
            CollectionAction::Allow
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub protocols: Vec<String>,
    pub source_addresses: Vec<String>,
    pub destination_addresses: Vec<String>,
    pub destination_ports: Vec<String>,
    pub destination_fqdns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCollection {
    pub name: String,
    pub kind: CollectionKind,
    pub priority: u32,
    pub action: CollectionAction,
    /// Enclosing policy rule-collection group, when declared in a policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_priority: Option<u32>,
    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSetOwner {
    Firewall,
    Policy,
}

/// Every collection applying to one firewall or policy, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleSet {
    pub id: ResourceKey,
    pub name: String,
    pub owner: RuleSetOwner,
    pub collections: Vec<RuleCollection>,
}

/// A connection attempt to test against a rule set. Absent addresses match
/// any address filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirewallProbe {
    pub protocol: String,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallDecision {
    pub allowed: bool,
    /// `None` when no rule matched and the implicit deny applied.
    pub collection: Option<String>,
    pub rule: Option<String>,
    pub action: Option<CollectionAction>,
}

impl FirewallRuleSet {
    /// First match across collections in evaluation order, then rules in
    /// declaration order. No match denies.
    pub fn evaluate(&self, probe: &FirewallProbe) -> FirewallDecision {
        for collection in &self.collections {
            if let Some(rule) = collection.rules.iter().find(|r| r.matches(collection.kind, probe)) {
                return FirewallDecision {
                    allowed: collection.action != CollectionAction::Deny,
                    collection: Some(collection.name.clone()),
                    rule: Some(rule.name.clone()),
                    action: Some(collection.action),
                };
            }
        }
        FirewallDecision {
            allowed: false,
            collection: None,
            rule: None,
            action: None,
        }
    }

    fn sort(&mut self) {
        self.collections.sort_by_key(|c| (c.kind, c.group_priority.unwrap_or(0), c.priority));
    }
}

impl FirewallRule {
    fn from_block(block: &AttrValue, kind: CollectionKind, fallback_name: String) -> Self {
        let list = |field: &str| -> Vec<String> {
            block
                .get_path(field)
                .map(|v| v.string_list())
                .unwrap_or_default()
        };
        let text = |field: &str| block.get_path(field).and_then(|v| v.as_str()).map(String::from);

        // Application rules carry `protocol`/`protocols` blocks of {type, port}.
        let (protocols, destination_ports) = if kind == CollectionKind::Application {
            let ports: Vec<String> = ["protocol", "protocols"]
                .iter()
                .flat_map(|f| block.values_at(&format!("{f}.port")))
                .map(|v| v.render())
                .collect();
            (vec!["Tcp".to_string()], ports)
        } else {
            (list("protocols"), list("destination_ports"))
        };

        let mut destination_addresses = list("destination_addresses");
        destination_addresses.extend(text("destination_address"));
        let mut destination_fqdns = list("destination_fqdns");
        destination_fqdns.extend(list("target_fqdns"));

        Self {
            name: text("name").unwrap_or(fallback_name),
            protocols,
            source_addresses: list("source_addresses"),
            destination_addresses,
            destination_ports,
            destination_fqdns,
            translated_address: text("translated_address"),
            translated_port: block.get_path("translated_port").map(|v| v.render()),
        }
    }

    fn matches(&self, kind: CollectionKind, probe: &FirewallProbe) -> bool {
        let protocol_ok = self.protocols.is_empty()
            || self.protocols.iter().any(|p| {
                p == "*" || p.eq_ignore_ascii_case("any") || p.eq_ignore_ascii_case(&probe.protocol)
            });
        let port_ok = self.destination_ports.is_empty()
            || self.destination_ports.iter().any(|spec| port_spec_matches(spec, probe.port));
        let source_ok = address_matches(&self.source_addresses, probe.source.as_deref());
        let destination_ok = match (kind, probe.destination.as_deref()) {
            (_, None) => true,
            (CollectionKind::Application, Some(dest)) => fqdn_matches(&self.destination_fqdns, dest),
            (_, Some(dest)) => {
                address_matches(&self.destination_addresses, Some(dest))
                    || (!self.destination_fqdns.is_empty() && fqdn_matches(&self.destination_fqdns, dest))
            }
        };
        protocol_ok && port_ok && source_ok && destination_ok
    }
}

/// `*`, a CIDR containing the address, or an exact string match.
fn address_matches(filters: &[String], address: Option<&str>) -> bool {
    let Some(address) = address else {
        return true;
    };
    if filters.is_empty() {
        return true;
    }
    let ip = address.parse::<IpAddr>().ok();
    filters.iter().any(|f| {
        f == "*"
            || f == address
            || match (f.parse::<IpNet>(), ip) {
                (Ok(net), Some(ip)) => net.contains(&ip),
                _ => false,
            }
    })
}

/// Exact (case-insensitive) or `*.suffix` wildcard FQDN match.
fn fqdn_matches(filters: &[String], host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    filters.iter().any(|f| {
        let f = f.to_ascii_lowercase();
        f == "*"
            || f == host
            || f.strip_prefix("*.").is_some_and(|suffix| host.ends_with(&format!(".{suffix}")))
    })
}

fn collection_from<'a>(
    source: &dyn Fn(&str) -> Option<&'a AttrValue>,
    kind: CollectionKind,
    fallback_name: &str,
) -> RuleCollection {
    let name = source("name")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_name)
        .to_string();
    let rules = blocks(source("rule"))
        .into_iter()
        .enumerate()
        .map(|(i, block)| FirewallRule::from_block(block, kind, format!("{name}-rule-{i}")))
        .collect();
    RuleCollection {
        priority: source("priority")
            .and_then(|v| v.as_f64())
            .map(|p| p as u32)
            .unwrap_or(u32::MAX),
        action: source("action")
            .and_then(|v| v.as_str())
            .map(CollectionAction::parse)
            .unwrap_or(if kind == CollectionKind::Nat {
                CollectionAction::Dnat
            } else {
                CollectionAction::Allow
            }),
        group: None,
        group_priority: None,
        kind,
        name,
        rules,
    }
}

fn names_owner(reference: Option<&str>, owner: &Resource) -> bool {
    reference.is_some_and(|v| v.contains(owner.name.as_str()) || v == owner.display_name())
}

/// Collections of every policy, keyed by policy key.
pub fn compile_policies(index: &ResourceIndex) -> BTreeMap<ResourceKey, FirewallRuleSet> {
    let mut sets: BTreeMap<ResourceKey, FirewallRuleSet> = index
        .of_type(FIREWALL_POLICY_TYPE)
        .map(|p| {
            (
                p.key(),
                FirewallRuleSet {
                    id: p.key(),
                    name: p.display_name().to_string(),
                    owner: RuleSetOwner::Policy,
                    collections: Vec::new(),
                },
            )
        })
        .collect();

    for group in index.of_type(POLICY_GROUP_TYPE) {
        let Some(policy) = group
            .attr_str("firewall_policy_id")
            .and_then(|t| index.resolve_reference(t, Some(FIREWALL_POLICY_TYPE)))
            .filter(|k| sets.contains_key(k))
        else {
            tracing::debug!(group = %group.key(), "Rule collection group has no resolvable policy");
            continue;
        };
        let group_priority = group.attr("priority").and_then(|v| v.as_f64()).map(|p| p as u32);

        for (field, kind) in POLICY_COLLECTION_BLOCKS {
            for block in blocks(group.attr(field)) {
                let mut collection = collection_from(&|p: &str| block.get_path(p), *kind, field);
                collection.group = Some(group.display_name().to_string());
                collection.group_priority = group_priority;
                if let Some(set) = sets.get_mut(&policy) {
                    set.collections.push(collection);
                }
            }
        }
    }

    for set in sets.values_mut() {
        set.sort();
    }
    sets
}

/// Classic collections of every firewall, plus the collections of the
/// policy it links to, keyed by firewall key.
pub fn compile_firewalls(
    index: &ResourceIndex,
    policies: &BTreeMap<ResourceKey, FirewallRuleSet>,
) -> BTreeMap<ResourceKey, FirewallRuleSet> {
    index
        .of_type(FIREWALL_TYPE)
        .map(|fw| {
            let mut collections: Vec<RuleCollection> = Vec::new();
            for (resource_type, kind) in CLASSIC_COLLECTION_TYPES {
                for declared in index.of_type(resource_type) {
                    if names_owner(declared.attr_str("azure_firewall_name"), fw) {
                        collections.push(collection_from(&|p: &str| declared.attr(p), *kind, &declared.name));
                    }
                }
            }

            let linked = fw
                .attr_str("firewall_policy_id")
                .and_then(|t| index.resolve_reference(t, Some(FIREWALL_POLICY_TYPE)))
                .and_then(|k| policies.get(&k));
            if let Some(policy) = linked {
                collections.extend(policy.collections.iter().cloned());
            }

            let mut set = FirewallRuleSet {
                id: fw.key(),
                name: fw.display_name().to_string(),
                owner: RuleSetOwner::Firewall,
                collections,
            };
            set.sort();
            (fw.key(), set)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(t: &str, n: &str, attrs: serde_json::Value) -> Resource {
        Resource::new(t, n).with_attributes(attrs)
    }

    fn probe(dest: &str, port: u16) -> FirewallProbe {
        FirewallProbe {
            protocol: "Tcp".to_string(),
            source: Some("10.0.1.4".to_string()),
            destination: Some(dest.to_string()),
            port,
        }
    }

    #[test]
    fn test_classic_collections_ordered_by_priority() {
        let index = ResourceIndex::build(vec![
            res(FIREWALL_TYPE, "hub", json!({})),
            res("azurerm_firewall_network_rule_collection", "allow_dns", json!({
                "azure_firewall_name": "${azurerm_firewall.hub.name}",
                "priority": 200, "action": "Allow",
                "rule": [{"name": "dns", "protocols": ["UDP", "TCP"],
                          "source_addresses": ["10.0.0.0/16"],
                          "destination_addresses": ["*"], "destination_ports": ["53"]}]
            })),
            res("azurerm_firewall_network_rule_collection", "deny_smb", json!({
                "azure_firewall_name": "${azurerm_firewall.hub.name}",
                "priority": 100, "action": "Deny",
                "rule": {"name": "smb", "protocols": ["TCP"],
                         "source_addresses": ["*"], "destination_addresses": ["*"],
                         "destination_ports": ["445", "53"]}
            })),
        ])
        .unwrap();

        let firewalls = compile_firewalls(&index, &BTreeMap::new());
        let set = &firewalls[&ResourceKey::from("azurerm_firewall_hub")];
        let names: Vec<_> = set.collections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["deny_smb", "allow_dns"]);

        let dns = set.evaluate(&probe("8.8.8.8", 53));
        assert!(!dns.allowed);
        assert_eq!(dns.rule.as_deref(), Some("smb"));

        let denied = set.evaluate(&probe("8.8.8.8", 443));
        assert!(!denied.allowed);
        assert!(denied.collection.is_none());
    }

    #[test]
    fn test_policy_groups_keep_two_level_order() {
        let index = ResourceIndex::build(vec![
            res(FIREWALL_POLICY_TYPE, "base", json!({})),
            res(FIREWALL_TYPE, "hub", json!({
                "firewall_policy_id": "${azurerm_firewall_policy.base.id}"
            })),
            res(POLICY_GROUP_TYPE, "late", json!({
                "firewall_policy_id": "${azurerm_firewall_policy.base.id}",
                "priority": 500,
                "network_rule_collection": [{
                    "name": "allow-all", "priority": 100, "action": "Allow",
                    "rule": [{"name": "any", "protocols": ["Any"],
                              "destination_addresses": ["*"], "destination_ports": ["*"]}]
                }]
            })),
            res(POLICY_GROUP_TYPE, "early", json!({
                "firewall_policy_id": "${azurerm_firewall_policy.base.id}",
                "priority": 100,
                "network_rule_collection": [{
                    "name": "block-sql", "priority": 300, "action": "Deny",
                    "rule": [{"name": "sql", "protocols": ["TCP"],
                              "destination_addresses": ["10.1.0.0/16"], "destination_ports": ["1433"]}]
                }],
                "application_rule_collection": [{
                    "name": "web", "priority": 100, "action": "Allow",
                    "rule": [{"name": "microsoft",
                              "protocols": [{"type": "Https", "port": 443}],
                              "destination_fqdns": ["*.microsoft.com"]}]
                }]
            })),
        ])
        .unwrap();

        let policies = compile_policies(&index);
        let policy = &policies[&ResourceKey::from("azurerm_firewall_policy_base")];
        let order: Vec<_> = policy.collections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(order, vec!["block-sql", "allow-all", "web"]);
        assert_eq!(policy.collections[0].group.as_deref(), Some("early"));

        let firewalls = compile_firewalls(&index, &policies);
        let fw = &firewalls[&ResourceKey::from("azurerm_firewall_hub")];
        assert_eq!(fw.collections.len(), 3);

        let sql = fw.evaluate(&probe("10.1.2.3", 1433));
        assert!(!sql.allowed);
        assert_eq!(sql.collection.as_deref(), Some("block-sql"));

        let other = fw.evaluate(&probe("10.2.0.1", 1433));
        assert!(other.allowed);
        assert_eq!(other.rule.as_deref(), Some("any"));
    }

    #[test]
    fn test_application_rule_fqdn_wildcard() {
        let set = FirewallRuleSet {
            id: ResourceKey::from("azurerm_firewall_policy_p"),
            name: "p".to_string(),
            owner: RuleSetOwner::Policy,
            collections: vec![RuleCollection {
                name: "web".to_string(),
                kind: CollectionKind::Application,
                priority: 100,
                action: CollectionAction::Allow,
                group: None,
                group_priority: None,
                rules: vec![FirewallRule {
                    name: "ms".to_string(),
                    protocols: vec!["Tcp".to_string()],
                    source_addresses: vec!["10.0.0.0/8".to_string()],
                    destination_addresses: vec![],
                    destination_ports: vec!["443".to_string()],
                    destination_fqdns: vec!["*.microsoft.com".to_string()],
                    translated_address: None,
                    translated_port: None,
                }],
            }],
        };
        assert!(set.evaluate(&probe("login.microsoft.com", 443)).allowed);
        assert!(!set.evaluate(&probe("example.org", 443)).allowed);
        assert!(!set.evaluate(&probe("login.microsoft.com", 80)).allowed);

        let outside = FirewallProbe {
            source: Some("192.168.1.1".to_string()),
            ..probe("login.microsoft.com", 443)
        };
        assert!(!set.evaluate(&outside).allowed);
    }

    #[test]
    fn test_nat_collection_defaults_to_dnat() {
        let index = ResourceIndex::build(vec![
            res(FIREWALL_TYPE, "edge", json!({})),
            res("azurerm_firewall_nat_rule_collection", "inbound_rdp", json!({
                "azure_firewall_name": "edge",
                "priority": 100,
                "rule": [{"name": "rdp", "protocols": ["TCP"], "destination_ports": ["3389"],
                          "destination_addresses": ["20.1.1.1"],
                          "translated_address": "10.0.1.4", "translated_port": 3389}]
            })),
        ])
        .unwrap();
        let firewalls = compile_firewalls(&index, &BTreeMap::new());
        let set = &firewalls[&ResourceKey::from("azurerm_firewall_edge")];
        let collection = &set.collections[0];
        assert_eq!(collection.action, CollectionAction::Dnat);
        assert_eq!(collection.rules[0].translated_port.as_deref(), Some("3389"));
        let decision = set.evaluate(&probe("20.1.1.1", 3389));
        assert!(decision.allowed);
        assert_eq!(decision.action, Some(CollectionAction::Dnat));
    }
}
