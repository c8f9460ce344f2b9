//! Derived network entities and traffic flow records.
//!
//! All of these are read-only views rebuilt from the resource index on every
//! analysis run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cloudsight_core::{Direction, ResourceKey};

// ── Topology ─────────────────────────────────────────────────────

/// A virtual network with its resolved subnets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VNet {
    pub id: ResourceKey,
    pub name: String,
    pub address_space: BTreeSet<String>,
    pub location: Option<String>,
    pub subnets: Vec<Subnet>,
}

/// Which declaration supplied a subnet's NSG or route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationSource {
    /// A standalone association resource (takes precedence).
    Association,
    /// An attribute on the subnet itself.
    Inline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    /// Resource key, or `<vnet-key>/subnets/<name>` for inline subnet blocks.
    pub id: String,
    pub name: String,
    pub vnet_id: ResourceKey,
    pub address_prefix: Option<String>,
    pub nsg_id: Option<ResourceKey>,
    pub nsg_source: Option<AssociationSource>,
    pub route_table_id: Option<ResourceKey>,
    pub route_table_source: Option<AssociationSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<String>,
    pub resources: BTreeSet<ResourceKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeeringState {
    /// The remote network peers back within the analyzed set.
    Connected,
    /// The remote network is in the set but has no reverse peering.
    Initiated,
    /// The remote network is outside the analyzed set.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peering {
    pub id: ResourceKey,
    pub name: String,
    pub local_vnet_id: Option<ResourceKey>,
    /// Resolved key when the remote is in the set, otherwise the raw reference.
    pub remote_vnet_id: String,
    pub remote_vnet_name: Option<String>,
    pub remote_address_space: Option<Vec<String>>,
    pub allow_virtual_network_access: bool,
    pub allow_forwarded_traffic: bool,
    pub allow_gateway_transit: bool,
    pub use_remote_gateways: bool,
    pub state: PeeringState,
    /// Local and remote address spaces overlap.
    pub address_overlap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateEndpoint {
    pub id: ResourceKey,
    pub subnet_id: Option<String>,
    pub target_resource_id: Option<String>,
    pub target_type: Option<String>,
    pub group_ids: Vec<String>,
    pub linked_dns_zones: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "VPN")]
    Vpn,
    ExpressRoute,
    VNetPeering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Initiated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConnection {
    pub id: ResourceKey,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub source_id: String,
    pub target_id: String,
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualNetworkGateway {
    pub id: ResourceKey,
    pub name: String,
    pub gateway_type: String,
    pub sku: Option<String>,
    pub subnet_id: Option<String>,
    pub vnet_id: Option<ResourceKey>,
    pub public_ip_ids: Vec<ResourceKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontend {
    pub name: String,
    pub public_ip_id: Option<ResourceKey>,
    pub subnet_id: Option<String>,
    pub private_ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: ResourceKey,
    pub name: String,
    pub sku: Option<String>,
    pub frontends: Vec<Frontend>,
    pub backend_pools: Vec<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationGateway {
    pub id: ResourceKey,
    pub name: String,
    pub sku: Option<String>,
    pub waf_enabled: bool,
    pub subnet_id: Option<String>,
    pub public_ip_ids: Vec<ResourceKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallInstance {
    pub id: ResourceKey,
    pub name: String,
    pub sku_tier: Option<String>,
    pub subnet_id: Option<String>,
    pub public_ip_ids: Vec<ResourceKey>,
    pub policy_id: Option<ResourceKey>,
}

/// Two virtual networks declaring overlapping CIDRs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConflict {
    pub first_vnet: ResourceKey,
    pub first_cidr: String,
    pub second_vnet: ResourceKey,
    pub second_cidr: String,
}

/// The reconstructed network graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub vnets: Vec<VNet>,
    pub peerings: Vec<Peering>,
    pub private_endpoints: Vec<PrivateEndpoint>,
    pub gateways: Vec<VirtualNetworkGateway>,
    pub gateway_connections: Vec<GatewayConnection>,
    pub load_balancers: Vec<LoadBalancer>,
    pub application_gateways: Vec<ApplicationGateway>,
    pub firewalls: Vec<FirewallInstance>,
    pub address_conflicts: Vec<AddressConflict>,
}

// ── Traffic ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    Data,
    Control,
    Event,
}

/// One simulated traffic flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficFlowEdge {
    pub source_id: String,
    pub target_id: String,
    pub inferred_ports: BTreeSet<u16>,
    pub protocol: String,
    pub flow_type: FlowType,
    pub direction: Direction,
    pub allowed: bool,
    pub deciding_rule_name: Option<String>,
    /// NSG whose chain was evaluated; absent when no NSG governs the source.
    pub enforced_by: Option<ResourceKey>,
}
