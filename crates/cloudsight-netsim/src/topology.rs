//! Network topology reconstruction.
//!
//! Walks the resource index once per entity kind and links virtual networks,
//! subnets, peerings, private endpoints, gateways, and edge devices through
//! their textual references. Unresolvable references leave the link absent.

use std::collections::BTreeSet;

use ipnet::IpNet;

use cloudsight_core::{Resource, ResourceKey};
use cloudsight_index::{reference, ResourceIndex};

use crate::blocks;
use crate::rules::NSG_TYPE;
use crate::types::*;

pub const VNET_TYPE: &str = "azurerm_virtual_network";
pub const SUBNET_TYPE: &str = "azurerm_subnet";
pub const PEERING_TYPE: &str = "azurerm_virtual_network_peering";
pub const NIC_TYPE: &str = "azurerm_network_interface";
pub const PUBLIC_IP_TYPE: &str = "azurerm_public_ip";
pub const PRIVATE_ENDPOINT_TYPE: &str = "azurerm_private_endpoint";

const SUBNET_NSG_ASSOCIATION: &str = "azurerm_subnet_network_security_group_association";
const SUBNET_ROUTE_TABLE_ASSOCIATION: &str = "azurerm_subnet_route_table_association";
const NIC_NSG_ASSOCIATION: &str = "azurerm_network_interface_security_group_association";
const ROUTE_TABLE_TYPE: &str = "azurerm_route_table";
const GATEWAY_TYPE: &str = "azurerm_virtual_network_gateway";
const GATEWAY_CONNECTION_TYPE: &str = "azurerm_virtual_network_gateway_connection";
const LB_TYPE: &str = "azurerm_lb";
const LB_POOL_TYPE: &str = "azurerm_lb_backend_address_pool";
const APP_GATEWAY_TYPE: &str = "azurerm_application_gateway";
const FIREWALL_TYPE: &str = "azurerm_firewall";
const FIREWALL_POLICY_TYPE: &str = "azurerm_firewall_policy";
const DNS_ZONE_TYPE: &str = "azurerm_private_dns_zone";

/// Attribute paths whose values place a resource inside a subnet.
const MEMBERSHIP_PATHS: &[&str] = &[
    "subnet_id",
    "virtual_network_subnet_id",
    "vnet_subnet_id",
    "ip_configuration.subnet_id",
    "default_node_pool.vnet_subnet_id",
    "gateway_ip_configuration.subnet_id",
    "frontend_ip_configuration.subnet_id",
    "site_config.virtual_network_subnet_id",
];

/// Types that declare the network itself rather than living inside it.
const NON_MEMBER_TYPES: &[&str] = &[
    VNET_TYPE,
    SUBNET_TYPE,
    PEERING_TYPE,
    SUBNET_NSG_ASSOCIATION,
    SUBNET_ROUTE_TABLE_ASSOCIATION,
];

/// Which level of the network supplied the governing NSG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsgLevel {
    Interface,
    Subnet,
}

/// The NSG governing a resource's traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveNsg {
    pub nsg: ResourceKey,
    pub level: NsgLevel,
}

// ── Building ─────────────────────────────────────────────────────

/// Reconstruct the network topology from an index.
pub fn build_topology(index: &ResourceIndex) -> NetworkTopology {
    let builder = TopologyBuilder { index };

    let mut vnets = builder.vnets();
    builder.assign_members(&mut vnets);

    let mut topology = NetworkTopology {
        vnets,
        ..Default::default()
    };
    topology.peerings = builder.peerings(&topology);
    topology.private_endpoints = builder.private_endpoints(&topology);
    topology.gateways = builder.gateways(&topology);
    topology.gateway_connections = builder.gateway_connections(&topology);
    topology.load_balancers = builder.load_balancers(&topology);
    topology.application_gateways = builder.application_gateways(&topology);
    topology.firewalls = builder.firewalls(&topology);
    topology.address_conflicts = topology.compute_address_conflicts();

    tracing::debug!(
        vnets = topology.vnets.len(),
        subnets = topology.subnets().count(),
        peerings = topology.peerings.len(),
        private_endpoints = topology.private_endpoints.len(),
        "Topology built"
    );

    topology
}

struct TopologyBuilder<'a> {
    index: &'a ResourceIndex,
}

impl<'a> TopologyBuilder<'a> {
    fn resolve(&self, text: Option<&str>, prefix: &str) -> Option<ResourceKey> {
        text.and_then(|t| self.index.resolve_reference(t, Some(prefix)))
    }

    fn resolve_all(&self, texts: Vec<&str>, prefix: &str) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = Vec::new();
        for text in texts {
            if let Some(key) = self.index.resolve_reference(text, Some(prefix)) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    fn vnets(&self) -> Vec<VNet> {
        let mut vnets: Vec<VNet> = self
            .index
            .of_type(VNET_TYPE)
            .map(|r| VNet {
                id: r.key(),
                name: r.display_name().to_string(),
                address_space: r.attr_strings("address_space").into_iter().map(String::from).collect(),
                location: r.attr_str("location").map(String::from),
                subnets: self.inline_subnets(r),
            })
            .collect();

        for subnet in self.index.of_type(SUBNET_TYPE) {
            let parent = self.resolve(subnet.attr_str("virtual_network_name"), VNET_TYPE);
            match parent.and_then(|key| vnets.iter().position(|v| v.id == key)) {
                Some(i) => {
                    let entry = self.standalone_subnet(subnet, &vnets[i].id);
                    vnets[i].subnets.push(entry);
                }
                None => tracing::debug!(subnet = %subnet.key(), "Subnet has no resolvable virtual network"),
            }
        }

        vnets
    }

    fn inline_subnets(&self, vnet: &Resource) -> Vec<Subnet> {
        let vnet_id = vnet.key();
        blocks(vnet.attr("subnet"))
            .into_iter()
            .filter_map(|block| {
                let name = block.get_path("name")?.as_str()?.to_string();
                let nsg_id = block
                    .get_path("security_group")
                    .and_then(|v| v.as_str())
                    .and_then(|t| self.index.resolve_reference(t, Some(NSG_TYPE)));
                let address_prefix = block
                    .strings_at("address_prefixes")
                    .first()
                    .copied()
                    .or_else(|| block.get_path("address_prefix").and_then(|v| v.as_str()))
                    .map(String::from);
                Some(Subnet {
                    id: format!("{vnet_id}/subnets/{name}"),
                    address_prefix,
                    nsg_source: nsg_id.as_ref().map(|_| AssociationSource::Inline),
                    nsg_id,
                    route_table_id: None,
                    route_table_source: None,
                    service_endpoints: Vec::new(),
                    resources: BTreeSet::new(),
                    vnet_id: vnet_id.clone(),
                    name,
                })
            })
            .collect()
    }

    fn standalone_subnet(&self, subnet: &Resource, vnet_id: &ResourceKey) -> Subnet {
        let key = subnet.key();

        let (nsg_id, nsg_source) = self.association(
            &key,
            SUBNET_NSG_ASSOCIATION,
            "network_security_group_id",
            NSG_TYPE,
            subnet.attr_str("network_security_group_id"),
        );
        let (route_table_id, route_table_source) = self.association(
            &key,
            SUBNET_ROUTE_TABLE_ASSOCIATION,
            "route_table_id",
            ROUTE_TABLE_TYPE,
            subnet.attr_str("route_table_id"),
        );

        let prefixes = subnet.attr_strings("address_prefixes");
        let address_prefix = prefixes
            .first()
            .copied()
            .or_else(|| subnet.attr_str("address_prefix"))
            .map(String::from);

        Subnet {
            id: key.0.clone(),
            name: subnet.display_name().to_string(),
            vnet_id: vnet_id.clone(),
            address_prefix,
            nsg_id,
            nsg_source,
            route_table_id,
            route_table_source,
            service_endpoints: subnet.attr_strings("service_endpoints").into_iter().map(String::from).collect(),
            resources: BTreeSet::new(),
        }
    }

    /// An association resource naming `subnet` wins over the inline attribute.
    fn association(
        &self,
        subnet: &ResourceKey,
        association_type: &str,
        target_field: &str,
        target_type: &str,
        inline: Option<&str>,
    ) -> (Option<ResourceKey>, Option<AssociationSource>) {
        let associated = self
            .index
            .referrers_of_type(subnet, association_type)
            .into_iter()
            .filter(|a| self.resolve(a.attr_str("subnet_id"), SUBNET_TYPE).as_ref() == Some(subnet))
            .find_map(|a| self.resolve(a.attr_str(target_field), target_type));
        if let Some(key) = associated {
            return (Some(key), Some(AssociationSource::Association));
        }
        match self.resolve(inline, target_type) {
            Some(key) => (Some(key), Some(AssociationSource::Inline)),
            None => (None, None),
        }
    }

    /// Place every non-network resource into the subnets its membership
    /// fields point at. A value that resolves to a subnet resource is an
    /// exact match; otherwise the subnet's local name must appear in it.
    fn assign_members(&self, vnets: &mut [VNet]) {
        for (key, resource) in self.index.iter() {
            if NON_MEMBER_TYPES.contains(&resource.resource_type.as_str()) {
                continue;
            }
            let values: Vec<&str> = MEMBERSHIP_PATHS
                .iter()
                .flat_map(|path| resource.attr_strings(path))
                .collect();
            if values.is_empty() {
                continue;
            }
            let exact: Vec<Option<ResourceKey>> = values
                .iter()
                .map(|v| {
                    reference::scan_fragments(v)
                        .into_iter()
                        .filter(|f| f.resource_type == SUBNET_TYPE)
                        .map(|f| f.key())
                        .find(|k| self.index.contains(k))
                })
                .collect();

            for subnet in vnets.iter_mut().flat_map(|v| v.subnets.iter_mut()) {
                let local_name = subnet_local_name(subnet);
                let member = values.iter().zip(&exact).any(|(value, resolved)| match resolved {
                    Some(k) => k.as_str() == subnet.id,
                    None => !local_name.is_empty() && value.contains(local_name),
                });
                if member {
                    subnet.resources.insert(key.clone());
                }
            }
        }
    }

    fn peerings(&self, topology: &NetworkTopology) -> Vec<Peering> {
        struct Raw<'r> {
            resource: &'r Resource,
            local: Option<ResourceKey>,
            remote: Option<ResourceKey>,
            remote_raw: String,
        }

        let raws: Vec<Raw> = self
            .index
            .of_type(PEERING_TYPE)
            .map(|p| {
                let remote_raw = p.attr_str("remote_virtual_network_id").unwrap_or_default().to_string();
                Raw {
                    resource: p,
                    local: self.resolve(p.attr_str("virtual_network_name"), VNET_TYPE),
                    remote: self.index.resolve_reference(&remote_raw, Some(VNET_TYPE)),
                    remote_raw,
                }
            })
            .collect();

        raws.iter()
            .map(|raw| {
                let p = raw.resource;
                let remote_vnet = raw.remote.as_ref().and_then(|k| topology.vnet(k));
                let local_vnet = raw.local.as_ref().and_then(|k| topology.vnet(k));

                let state = match (&raw.local, &raw.remote) {
                    (Some(local), Some(remote))
                        if raws.iter().any(|other| {
                            other.local.as_ref() == Some(remote) && other.remote.as_ref() == Some(local)
                        }) =>
                    {
                        PeeringState::Connected
                    }
                    (_, Some(_)) => PeeringState::Initiated,
                    (_, None) => PeeringState::Unknown,
                };

                let address_overlap = match (local_vnet, remote_vnet) {
                    (Some(l), Some(r)) => l
                        .address_space
                        .iter()
                        .any(|a| r.address_space.iter().any(|b| cidrs_overlap(a, b))),
                    _ => false,
                };

                Peering {
                    id: p.key(),
                    name: p.display_name().to_string(),
                    local_vnet_id: raw.local.clone(),
                    remote_vnet_id: raw
                        .remote
                        .as_ref()
                        .map(|k| k.0.clone())
                        .unwrap_or_else(|| raw.remote_raw.clone()),
                    remote_vnet_name: remote_vnet.map(|v| v.name.clone()),
                    remote_address_space: remote_vnet.map(|v| v.address_space.iter().cloned().collect()),
                    allow_virtual_network_access: p.attr_bool("allow_virtual_network_access").unwrap_or(true),
                    allow_forwarded_traffic: p.attr_bool("allow_forwarded_traffic").unwrap_or(false),
                    allow_gateway_transit: p.attr_bool("allow_gateway_transit").unwrap_or(false),
                    use_remote_gateways: p.attr_bool("use_remote_gateways").unwrap_or(false),
                    state,
                    address_overlap,
                }
            })
            .collect()
    }

    fn private_endpoints(&self, topology: &NetworkTopology) -> Vec<PrivateEndpoint> {
        self.index
            .of_type(PRIVATE_ENDPOINT_TYPE)
            .map(|pe| {
                let raw_target = pe
                    .attr_strings("private_service_connection.private_connection_resource_id")
                    .first()
                    .map(|s| s.to_string());
                let inferred = raw_target.as_deref().and_then(reference::infer_type);
                let resolved = match (raw_target.as_deref(), inferred.as_deref()) {
                    (Some(raw), Some(t)) => self.index.resolve_reference(raw, Some(t)),
                    _ => None,
                };
                let target_type = resolved
                    .as_ref()
                    .and_then(|k| self.index.lookup(k))
                    .map(|r| r.resource_type.clone())
                    .or(inferred);

                let linked_dns_zones = pe
                    .attr_strings("private_dns_zone_group.private_dns_zone_ids")
                    .into_iter()
                    .map(|z| {
                        self.index
                            .resolve_reference(z, Some(DNS_ZONE_TYPE))
                            .and_then(|k| self.index.lookup(&k))
                            .map(|zone| zone.display_name().to_string())
                            .unwrap_or_else(|| z.to_string())
                    })
                    .collect();

                PrivateEndpoint {
                    id: pe.key(),
                    subnet_id: topology.subnet_of(&pe.key()).map(|s| s.id.clone()),
                    target_resource_id: resolved.map(|k| k.0).or(raw_target),
                    target_type,
                    group_ids: pe
                        .attr_strings("private_service_connection.subresource_names")
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    linked_dns_zones,
                }
            })
            .collect()
    }

    fn gateways(&self, topology: &NetworkTopology) -> Vec<VirtualNetworkGateway> {
        self.index
            .of_type(GATEWAY_TYPE)
            .map(|g| {
                let subnet = topology.subnet_of(&g.key());
                VirtualNetworkGateway {
                    id: g.key(),
                    name: g.display_name().to_string(),
                    gateway_type: g.attr_str("type").unwrap_or("Vpn").to_string(),
                    sku: g.attr_str("sku").map(String::from),
                    subnet_id: subnet.map(|s| s.id.clone()),
                    vnet_id: subnet.map(|s| s.vnet_id.clone()),
                    public_ip_ids: self.resolve_all(
                        g.attr_strings("ip_configuration.public_ip_address_id"),
                        PUBLIC_IP_TYPE,
                    ),
                }
            })
            .collect()
    }

    fn gateway_connections(&self, topology: &NetworkTopology) -> Vec<GatewayConnection> {
        let mut connections: Vec<GatewayConnection> = self
            .index
            .of_type(GATEWAY_CONNECTION_TYPE)
            .map(|c| {
                let connection_type = match c.attr_str("type") {
                    Some(t) if t.eq_ignore_ascii_case("expressroute") => ConnectionType::ExpressRoute,
                    _ => ConnectionType::Vpn,
                };
                let source_raw = c.attr_str("virtual_network_gateway_id").unwrap_or_default();
                let target_raw = [
                    "peer_virtual_network_gateway_id",
                    "local_network_gateway_id",
                    "express_route_circuit_id",
                ]
                .iter()
                .find_map(|f| c.attr_str(f))
                .unwrap_or_default();

                let source = self.index.resolve_reference(source_raw, Some(GATEWAY_TYPE));
                let target = reference::infer_type(target_raw)
                    .and_then(|t| self.index.resolve_reference(target_raw, Some(t.as_str())));
                let status = if source.is_some() && target.is_some() {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Unknown
                };

                GatewayConnection {
                    id: c.key(),
                    connection_type,
                    source_id: source.map(|k| k.0).unwrap_or_else(|| source_raw.to_string()),
                    target_id: target.map(|k| k.0).unwrap_or_else(|| target_raw.to_string()),
                    status,
                }
            })
            .collect();

        connections.extend(topology.peerings.iter().map(|p| GatewayConnection {
            id: p.id.clone(),
            connection_type: ConnectionType::VNetPeering,
            source_id: p.local_vnet_id.as_ref().map(|k| k.0.clone()).unwrap_or_default(),
            target_id: p.remote_vnet_id.clone(),
            status: match p.state {
                PeeringState::Connected => ConnectionStatus::Connected,
                PeeringState::Initiated => ConnectionStatus::Initiated,
                PeeringState::Unknown => ConnectionStatus::Unknown,
            },
        }));

        connections
    }

    fn load_balancers(&self, topology: &NetworkTopology) -> Vec<LoadBalancer> {
        self.index
            .of_type(LB_TYPE)
            .map(|lb| {
                let frontends: Vec<Frontend> = blocks(lb.attr("frontend_ip_configuration"))
                    .into_iter()
                    .enumerate()
                    .map(|(i, block)| {
                        let text = |p: &str| block.get_path(p).and_then(|v| v.as_str());
                        Frontend {
                            name: text("name").map(String::from).unwrap_or_else(|| format!("frontend-{i}")),
                            public_ip_id: self.resolve(text("public_ip_address_id"), PUBLIC_IP_TYPE),
                            subnet_id: text("subnet_id").and_then(|s| topology.find_subnet(self.index, s)),
                            private_ip_address: text("private_ip_address").map(String::from),
                        }
                    })
                    .collect();

                let key = lb.key();
                let backend_pools = self
                    .index
                    .referrers_of_type(&key, LB_POOL_TYPE)
                    .into_iter()
                    .map(|pool| pool.display_name().to_string())
                    .collect();

                LoadBalancer {
                    id: key,
                    name: lb.display_name().to_string(),
                    sku: lb.attr_str("sku").map(String::from),
                    is_public: frontends.iter().any(|f| f.public_ip_id.is_some()),
                    frontends,
                    backend_pools,
                }
            })
            .collect()
    }

    fn application_gateways(&self, topology: &NetworkTopology) -> Vec<ApplicationGateway> {
        self.index
            .of_type(APP_GATEWAY_TYPE)
            .map(|agw| {
                let tier = agw.attr_str("sku.tier").unwrap_or_default();
                let waf_enabled = tier.to_ascii_uppercase().contains("WAF")
                    || agw.attr_bool("waf_configuration.enabled").unwrap_or(false)
                    || agw.attr_str("firewall_policy_id").is_some();
                ApplicationGateway {
                    id: agw.key(),
                    name: agw.display_name().to_string(),
                    sku: agw.attr_str("sku.name").map(String::from),
                    waf_enabled,
                    subnet_id: topology.subnet_of(&agw.key()).map(|s| s.id.clone()),
                    public_ip_ids: self.resolve_all(
                        agw.attr_strings("frontend_ip_configuration.public_ip_address_id"),
                        PUBLIC_IP_TYPE,
                    ),
                }
            })
            .collect()
    }

    fn firewalls(&self, topology: &NetworkTopology) -> Vec<FirewallInstance> {
        self.index
            .of_type(FIREWALL_TYPE)
            .map(|fw| FirewallInstance {
                id: fw.key(),
                name: fw.display_name().to_string(),
                sku_tier: fw.attr_str("sku_tier").map(String::from),
                subnet_id: topology.subnet_of(&fw.key()).map(|s| s.id.clone()),
                public_ip_ids: self.resolve_all(
                    fw.attr_strings("ip_configuration.public_ip_address_id"),
                    PUBLIC_IP_TYPE,
                ),
                policy_id: self.resolve(fw.attr_str("firewall_policy_id"), FIREWALL_POLICY_TYPE),
            })
            .collect()
    }
}

/// Local name used for substring membership: the resource name for
/// standalone subnets, the block name for inline ones.
fn subnet_local_name(subnet: &Subnet) -> &str {
    subnet
        .id
        .strip_prefix(SUBNET_TYPE)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(&subnet.name)
}

fn cidrs_overlap(a: &str, b: &str) -> bool {
    match (a.parse::<IpNet>(), b.parse::<IpNet>()) {
        (Ok(a), Ok(b)) => a.contains(&b.network()) || b.contains(&a.network()),
        _ => false,
    }
}

// ── Navigation ───────────────────────────────────────────────────

impl NetworkTopology {
    pub fn is_empty(&self) -> bool {
        self.vnets.is_empty()
            && self.peerings.is_empty()
            && self.private_endpoints.is_empty()
            && self.gateways.is_empty()
            && self.load_balancers.is_empty()
            && self.application_gateways.is_empty()
            && self.firewalls.is_empty()
    }

    pub fn vnet(&self, id: &ResourceKey) -> Option<&VNet> {
        self.vnets.iter().find(|v| &v.id == id)
    }

    pub fn subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.vnets.iter().flat_map(|v| v.subnets.iter())
    }

    pub fn subnet(&self, id: &str) -> Option<&Subnet> {
        self.subnets().find(|s| s.id == id)
    }

    /// First subnet (in VNet order) that `resource` is a member of.
    pub fn subnet_of(&self, resource: &ResourceKey) -> Option<&Subnet> {
        self.subnets().find(|s| s.resources.contains(resource))
    }

    /// Peerings whose local side is `vnet`.
    pub fn peerings_of<'a>(&'a self, vnet: &'a ResourceKey) -> impl Iterator<Item = &'a Peering> + 'a {
        self.peerings
            .iter()
            .filter(move |p| p.local_vnet_id.as_ref() == Some(vnet))
    }

    /// Map a subnet reference to a topology subnet id.
    pub fn find_subnet(&self, index: &ResourceIndex, text: &str) -> Option<String> {
        if let Some(key) = index.resolve_reference(text, Some(SUBNET_TYPE)) {
            if let Some(s) = self.subnet(key.as_str()) {
                return Some(s.id.clone());
            }
        }
        self.subnets()
            .filter(|s| s.id.contains("/subnets/") && text.contains(s.name.as_str()))
            .max_by_key(|s| s.name.len())
            .map(|s| s.id.clone())
    }

    /// Every pair of VNets declaring overlapping CIDRs.
    pub fn address_conflicts(&self) -> &[AddressConflict] {
        &self.address_conflicts
    }

    fn compute_address_conflicts(&self) -> Vec<AddressConflict> {
        let mut conflicts = Vec::new();
        for (i, first) in self.vnets.iter().enumerate() {
            for second in &self.vnets[i + 1..] {
                for a in &first.address_space {
                    for b in &second.address_space {
                        if cidrs_overlap(a, b) {
                            conflicts.push(AddressConflict {
                                first_vnet: first.id.clone(),
                                first_cidr: a.clone(),
                                second_vnet: second.id.clone(),
                                second_cidr: b.clone(),
                            });
                        }
                    }
                }
            }
        }
        conflicts
    }

    /// The NSG governing `resource`: an interface-level NSG on the resource
    /// or one of its NICs first, else the NSG of its (or its NICs') subnet.
    pub fn effective_nsg(&self, index: &ResourceIndex, resource: &ResourceKey) -> Option<EffectiveNsg> {
        let source = index.lookup(resource)?;

        let mut anchors: Vec<ResourceKey> = vec![resource.clone()];
        for nic in source.attr_strings("network_interface_ids") {
            if let Some(key) = index.resolve_reference(nic, Some(NIC_TYPE)) {
                if !anchors.contains(&key) {
                    anchors.push(key);
                }
            }
        }

        for anchor in &anchors {
            let Some(anchor_resource) = index.lookup(anchor) else {
                continue;
            };
            let direct = anchor_resource
                .attr_str("network_security_group_id")
                .and_then(|t| index.resolve_reference(t, Some(NSG_TYPE)));
            let associated = || {
                index
                    .referrers_of_type(anchor, NIC_NSG_ASSOCIATION)
                    .into_iter()
                    .find_map(|a| {
                        a.attr_str("network_security_group_id")
                            .and_then(|t| index.resolve_reference(t, Some(NSG_TYPE)))
                    })
            };
            if let Some(nsg) = direct.or_else(associated) {
                return Some(EffectiveNsg {
                    nsg,
                    level: NsgLevel::Interface,
                });
            }
        }

        anchors
            .iter()
            .filter_map(|a| self.subnet_of(a))
            .find_map(|s| s.nsg_id.clone())
            .map(|nsg| EffectiveNsg {
                nsg,
                level: NsgLevel::Subnet,
            })
    }
}
