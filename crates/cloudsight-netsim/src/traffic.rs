//! Traffic permission simulation.
//!
//! Every declared dependency is a candidate flow from the dependent resource
//! to its target. Ports and protocol come from an inference table keyed by
//! target type; the source's effective NSG decides each port.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use cloudsight_core::{Direction, Resource, ResourceKey};
use cloudsight_index::{reference, ResourceIndex};

use crate::rules::{CompiledRuleSet, RuleCompiler};
use crate::topology::PUBLIC_IP_TYPE;
use crate::types::{FlowType, NetworkTopology, TrafficFlowEdge};

/// Source id used for flows originating outside the analyzed network.
pub const INTERNET: &str = "Internet";

const PROTOCOL_TCP: &str = "Tcp";

/// Ports and flow class inferred for one target category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRule {
    pub category: &'static str,
    pub target_types: &'static [&'static str],
    pub ports: &'static [u16],
    pub flow_type: FlowType,
}

/// Target-type dispatch table for port inference. First matching rule wins.
#[derive(Debug, Clone)]
pub struct InferenceRegistry {
    rules: Vec<InferenceRule>,
}

impl InferenceRegistry {
    pub fn azure() -> Self {
        let rule = |category: &'static str,
                    target_types: &'static [&'static str],
                    ports: &'static [u16],
                    flow_type: FlowType| InferenceRule {
            category,
            target_types,
            ports,
            flow_type,
        };
        Self {
            rules: vec![
                rule(
                    "sql",
                    &[
                        "azurerm_mssql_server",
                        "azurerm_mssql_database",
                        "azurerm_mssql_managed_instance",
                        "azurerm_sql_server",
                        "azurerm_sql_database",
                    ],
                    &[1433],
                    FlowType::Data,
                ),
                rule(
                    "postgresql",
                    &["azurerm_postgresql_server", "azurerm_postgresql_flexible_server"],
                    &[5432],
                    FlowType::Data,
                ),
                rule(
                    "mysql",
                    &["azurerm_mysql_server", "azurerm_mysql_flexible_server"],
                    &[3306],
                    FlowType::Data,
                ),
                rule("cosmosdb", &["azurerm_cosmosdb_account"], &[443], FlowType::Data),
                rule("redis", &["azurerm_redis_cache"], &[6379, 6380], FlowType::Data),
                rule("storage", &["azurerm_storage_account"], &[443], FlowType::Data),
                rule("key_vault", &["azurerm_key_vault"], &[443], FlowType::Control),
                rule(
                    "messaging",
                    &["azurerm_servicebus_namespace", "azurerm_eventhub_namespace"],
                    &[5671, 443],
                    FlowType::Event,
                ),
                rule(
                    "web",
                    &[
                        "azurerm_app_service",
                        "azurerm_linux_web_app",
                        "azurerm_windows_web_app",
                        "azurerm_function_app",
                        "azurerm_linux_function_app",
                        "azurerm_windows_function_app",
                    ],
                    &[80, 443],
                    FlowType::Data,
                ),
                rule("kubernetes", &["azurerm_kubernetes_cluster"], &[443], FlowType::Control),
                rule("container_registry", &["azurerm_container_registry"], &[443], FlowType::Data),
            ],
        }
    }

    /// Append a rule consulted after the built-in ones.
    pub fn with_rule(mut self, rule: InferenceRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn infer(&self, target_type: &str) -> Option<&InferenceRule> {
        self.rules.iter().find(|r| r.target_types.contains(&target_type))
    }
}

impl Default for InferenceRegistry {
    fn default() -> Self {
        Self::azure()
    }
}

/// Simulates flows over one analysis run's read-only structures.
pub struct TrafficSimulator<'a> {
    index: &'a ResourceIndex,
    topology: &'a NetworkTopology,
    rule_sets: &'a BTreeMap<ResourceKey, CompiledRuleSet>,
    registry: InferenceRegistry,
    parallel: bool,
}

impl<'a> TrafficSimulator<'a> {
    pub fn new(
        index: &'a ResourceIndex,
        topology: &'a NetworkTopology,
        rule_sets: &'a BTreeMap<ResourceKey, CompiledRuleSet>,
    ) -> Self {
        Self {
            index,
            topology,
            rule_sets,
            registry: InferenceRegistry::azure(),
            parallel: true,
        }
    }

    pub fn with_registry(mut self, registry: InferenceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Every flow record, sorted by source, target, then lowest port.
    pub fn simulate(&self) -> Vec<TrafficFlowEdge> {
        let sources: Vec<&Resource> = self.index.iter().map(|(_, r)| r).collect();

        let mut flows: Vec<TrafficFlowEdge> = if self.parallel {
            sources
                .par_iter()
                .flat_map_iter(|r| self.flows_from(r))
                .collect()
        } else {
            sources.iter().flat_map(|r| self.flows_from(r)).collect()
        };

        flows.extend(self.internet_flows());
        flows.sort_by(|a, b| {
            (&a.source_id, &a.target_id, a.inferred_ports.first())
                .cmp(&(&b.source_id, &b.target_id, b.inferred_ports.first()))
        });

        tracing::debug!(flows = flows.len(), "Traffic simulation complete");
        flows
    }

    fn flows_from(&self, source: &Resource) -> Vec<TrafficFlowEdge> {
        let source_key = source.key();
        let mut flows = Vec::new();

        for dependency in &source.dependencies {
            let resolved = self.index.resolve_dependency(dependency);
            let target_type = match resolved.as_ref().and_then(|k| self.index.lookup(k)) {
                Some(target) => Some(target.resource_type.clone()),
                None => reference::infer_type(dependency),
            };
            let Some(inference) = target_type.as_deref().and_then(|t| self.registry.infer(t)) else {
                tracing::debug!(source = %source_key, dependency = %dependency, "No port inference for dependency");
                continue;
            };
            let target_id = resolved.map(|k| k.0).unwrap_or_else(|| dependency.clone());
            flows.extend(self.evaluate_edge(&source_key, &target_id, inference));
        }

        flows
    }

    /// Decide each inferred port against the source's effective outbound
    /// chain, grouping ports that share a decision into one record.
    fn evaluate_edge(&self, source: &ResourceKey, target_id: &str, inference: &InferenceRule) -> Vec<TrafficFlowEdge> {
        let rule_set = self
            .topology
            .effective_nsg(self.index, source)
            .and_then(|e| self.rule_sets.get(&e.nsg));

        let mut groups: Vec<(bool, Option<String>, BTreeSet<u16>)> = Vec::new();
        for &port in inference.ports {
            let (allowed, rule_name) = match rule_set {
                Some(set) => {
                    let decision = set.evaluate(Direction::Outbound, PROTOCOL_TCP, port);
                    (decision.allowed, Some(decision.rule_name))
                }
                None => (true, None),
            };
            match groups.iter_mut().find(|(a, r, _)| *a == allowed && *r == rule_name) {
                Some((_, _, ports)) => {
                    ports.insert(port);
                }
                None => groups.push((allowed, rule_name, BTreeSet::from([port]))),
            }
        }

        groups
            .into_iter()
            .map(|(allowed, deciding_rule_name, inferred_ports)| TrafficFlowEdge {
                source_id: source.0.clone(),
                target_id: target_id.to_string(),
                inferred_ports,
                protocol: PROTOCOL_TCP.to_string(),
                flow_type: inference.flow_type,
                direction: Direction::Outbound,
                allowed,
                deciding_rule_name,
                enforced_by: rule_set.map(|s| s.nsg.clone()),
            })
            .collect()
    }

    /// Public IPs accept inbound traffic from the Internet on any port.
    fn internet_flows(&self) -> Vec<TrafficFlowEdge> {
        self.index
            .of_type(PUBLIC_IP_TYPE)
            .map(|pip| TrafficFlowEdge {
                source_id: INTERNET.to_string(),
                target_id: pip.key().0,
                inferred_ports: BTreeSet::new(),
                protocol: "*".to_string(),
                flow_type: FlowType::Data,
                direction: Direction::Inbound,
                allowed: true,
                deciding_rule_name: None,
                enforced_by: None,
            })
            .collect()
    }
}

/// Simulate with the built-in inference table, compiling every NSG through
/// `compiler`.
pub fn simulate_flows(
    index: &ResourceIndex,
    topology: &NetworkTopology,
    compiler: &RuleCompiler<'_>,
) -> Vec<TrafficFlowEdge> {
    let rule_sets = compiler.compile_all();
    TrafficSimulator::new(index, topology, &rule_sets).simulate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{PlatformDefaults, NSG_TYPE};
    use crate::topology::build_topology;
    use serde_json::json;

    fn res(t: &str, n: &str, attrs: serde_json::Value) -> Resource {
        Resource::new(t, n).with_attributes(attrs)
    }

    fn run(resources: Vec<Resource>) -> Vec<TrafficFlowEdge> {
        let index = ResourceIndex::build(resources).unwrap();
        let topology = build_topology(&index);
        let compiler = RuleCompiler::new(&index, PlatformDefaults::azure());
        simulate_flows(&index, &topology, &compiler)
    }

    fn network_with(nsg_rules: serde_json::Value) -> Vec<Resource> {
        vec![
            res("azurerm_virtual_network", "main", json!({"address_space": ["10.0.0.0/16"]})),
            res("azurerm_subnet", "app", json!({
                "virtual_network_name": "${azurerm_virtual_network.main.name}",
                "network_security_group_id": "${azurerm_network_security_group.app.id}"
            })),
            res(NSG_TYPE, "app", json!({"security_rule": nsg_rules})),
            res("azurerm_linux_function_app", "api", json!({
                "virtual_network_subnet_id": "${azurerm_subnet.app.id}"
            }))
            .with_dependencies(["azurerm_redis_cache.cache", "azurerm_mssql_server.db"]),
            res("azurerm_redis_cache", "cache", json!({})),
            res("azurerm_mssql_server", "db", json!({})),
        ]
    }

    #[test]
    fn test_no_nsg_allows_flow() {
        let flows = run(vec![
            res("azurerm_linux_virtual_machine", "app", json!({}))
                .with_dependencies(["azurerm_mssql_server_db"]),
            res("azurerm_mssql_server", "db", json!({})),
        ]);
        assert_eq!(flows.len(), 1);
        let flow = &flows[0];
        assert_eq!(flow.source_id, "azurerm_linux_virtual_machine_app");
        assert_eq!(flow.target_id, "azurerm_mssql_server_db");
        assert_eq!(flow.inferred_ports, BTreeSet::from([1433]));
        assert_eq!(flow.protocol, "Tcp");
        assert!(flow.allowed);
        assert!(flow.deciding_rule_name.is_none());
        assert!(flow.enforced_by.is_none());
    }

    #[test]
    fn test_subnet_nsg_decides_and_groups_ports() {
        let flows = run(network_with(json!([
            {"name": "allow-redis-tls", "priority": 100, "direction": "Outbound",
             "access": "Allow", "protocol": "Tcp", "destination_port_range": "6380"}
        ])));

        let redis: Vec<_> = flows.iter().filter(|f| f.target_id.ends_with("cache")).collect();
        assert_eq!(redis.len(), 2);
        assert_eq!(redis[0].inferred_ports, BTreeSet::from([6379]));
        assert!(!redis[0].allowed);
        assert_eq!(redis[0].deciding_rule_name.as_deref(), Some("DenyAllOutBound"));
        assert_eq!(redis[1].inferred_ports, BTreeSet::from([6380]));
        assert!(redis[1].allowed);
        assert_eq!(redis[1].deciding_rule_name.as_deref(), Some("allow-redis-tls"));
        assert_eq!(
            redis[1].enforced_by,
            Some(ResourceKey::from("azurerm_network_security_group_app"))
        );

        let sql = flows.iter().find(|f| f.target_id.ends_with("_db")).unwrap();
        assert!(!sql.allowed);
    }

    #[test]
    fn test_unrecognized_target_yields_no_flow() {
        let flows = run(vec![
            res("azurerm_linux_virtual_machine", "app", json!({}))
                .with_dependencies(["azurerm_resource_group.rg", "azurerm_user_assigned_identity.id"]),
            res("azurerm_resource_group", "rg", json!({})),
        ]);
        assert!(flows.is_empty());
    }

    #[test]
    fn test_unresolved_dependency_keeps_raw_target() {
        let flows = run(vec![res("azurerm_linux_virtual_machine", "app", json!({}))
            .with_dependencies(["azurerm_key_vault.external"])]);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].target_id, "azurerm_key_vault.external");
        assert_eq!(flows[0].flow_type, FlowType::Control);
    }

    #[test]
    fn test_public_ip_inbound_from_internet() {
        let flows = run(vec![res(PUBLIC_IP_TYPE, "edge", json!({}))]);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].source_id, INTERNET);
        assert_eq!(flows[0].direction, Direction::Inbound);
        assert!(flows[0].allowed);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let index = ResourceIndex::build(network_with(json!([]))).unwrap();
        let topology = build_topology(&index);
        let sets = RuleCompiler::new(&index, PlatformDefaults::azure()).compile_all();
        let parallel = TrafficSimulator::new(&index, &topology, &sets).simulate();
        let sequential = TrafficSimulator::new(&index, &topology, &sets)
            .with_parallel(false)
            .simulate();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_custom_inference_rule() {
        let index = ResourceIndex::build(vec![
            res("azurerm_linux_virtual_machine", "app", json!({}))
                .with_dependencies(["azurerm_app_service_plan.plan"]),
            res("azurerm_app_service_plan", "plan", json!({})),
        ])
        .unwrap();
        let topology = build_topology(&index);
        let sets = BTreeMap::new();
        let registry = InferenceRegistry::azure().with_rule(InferenceRule {
            category: "plan",
            target_types: &["azurerm_app_service_plan"],
            ports: &[8443],
            flow_type: FlowType::Control,
        });
        let flows = TrafficSimulator::new(&index, &topology, &sets)
            .with_registry(registry)
            .simulate();
        assert_eq!(flows[0].inferred_ports, BTreeSet::from([8443]));
    }
}
