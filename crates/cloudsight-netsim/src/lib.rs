//! cloudsight-netsim: Network reconstruction and traffic simulation.
//!
//! Three stages over a shared `ResourceIndex`:
//! 1. `rules` / `firewall` compile NSG rule chains and firewall collections.
//! 2. `topology` reconstructs VNets, subnets, peerings, and edge devices.
//! 3. `traffic` infers ports per dependency edge and evaluates them against
//!    the source's effective NSG.

pub mod firewall;
pub mod rules;
pub mod topology;
pub mod traffic;
pub mod types;

use cloudsight_core::AttrValue;

pub use firewall::{FirewallDecision, FirewallProbe, FirewallRuleSet, RuleCollection};
pub use rules::{CompiledRuleSet, PlatformDefaults, RuleCompiler, RuleDecision, SecurityRule};
pub use topology::{build_topology, EffectiveNsg, NsgLevel};
pub use traffic::{simulate_flows, InferenceRegistry, InferenceRule, TrafficSimulator};
pub use types::{FlowType, NetworkTopology, TrafficFlowEdge};

/// Nested blocks at an attribute: a list of maps, or a single map.
pub(crate) fn blocks(value: Option<&AttrValue>) -> Vec<&AttrValue> {
    match value {
        Some(AttrValue::List(items)) => items.iter().filter(|i| i.as_map().is_some()).collect(),
        Some(single @ AttrValue::Map(_)) => vec![single],
        _ => Vec::new(),
    }
}
