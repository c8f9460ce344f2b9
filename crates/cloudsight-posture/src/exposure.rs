//! Public network exposure table.
//!
//! Managed services are reachable from the internet unless their public
//! network access flag is explicitly turned off. Compute is public when a
//! public IP is wired to one of its interfaces. Network plumbing and
//! management scopes are never public. Types missing from the table are
//! public unless they explicitly disable public network access.

use cloudsight_core::{AttrValue, Resource, Scalar};
use cloudsight_index::ResourceIndex;
use cloudsight_netsim::rules::NSG_TYPE;
use cloudsight_netsim::topology::{
    NIC_TYPE, PRIVATE_ENDPOINT_TYPE, PUBLIC_IP_TYPE, SUBNET_TYPE, VNET_TYPE,
};
use cloudsight_netsim::NetworkTopology;

use crate::checks::VM_TYPES;

/// How a resource type's public reachability is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// Public unless `attribute` is explicitly `false`.
    PublicUnlessDisabled { attribute: &'static str },
    /// Public unless `attribute` is explicitly `true` (e.g. a private cluster flag).
    PublicUnlessPrivate { attribute: &'static str },
    /// Public when a network interface carries a public IP.
    PublicIpOnInterface,
    /// Public when the topology saw a public frontend.
    PublicFrontend,
    Always,
    /// Declares no reachable endpoint of its own.
    Never,
}

/// Resource type to exposure policy.
#[derive(Debug, Clone)]
pub struct ExposureTable {
    entries: Vec<(&'static str, Exposure)>,
}

const PUBLIC_NETWORK_ACCESS: &str = "public_network_access_enabled";

/// Types that scope or wire the network rather than expose an endpoint.
const NON_ENDPOINT_TYPES: &[&str] = &[
    "azurerm_resource_group",
    VNET_TYPE,
    SUBNET_TYPE,
    NSG_TYPE,
    "azurerm_network_security_rule",
    "azurerm_route_table",
    "azurerm_subnet_network_security_group_association",
    "azurerm_subnet_route_table_association",
    "azurerm_network_interface_security_group_association",
    "azurerm_virtual_network_peering",
    PRIVATE_ENDPOINT_TYPE,
    "azurerm_private_dns_zone",
    "azurerm_user_assigned_identity",
];

impl ExposureTable {
    pub fn azure() -> Self {
        let managed = [
            "azurerm_storage_account",
            "azurerm_key_vault",
            "azurerm_mssql_server",
            "azurerm_sql_server",
            "azurerm_postgresql_server",
            "azurerm_postgresql_flexible_server",
            "azurerm_mysql_server",
            "azurerm_mysql_flexible_server",
            "azurerm_cosmosdb_account",
            "azurerm_redis_cache",
            "azurerm_container_registry",
            "azurerm_servicebus_namespace",
            "azurerm_eventhub_namespace",
            "azurerm_linux_web_app",
            "azurerm_windows_web_app",
            "azurerm_linux_function_app",
            "azurerm_windows_function_app",
        ];
        let mut entries: Vec<(&'static str, Exposure)> = managed
            .into_iter()
            .map(|t| (t, Exposure::PublicUnlessDisabled { attribute: PUBLIC_NETWORK_ACCESS }))
            .collect();

        entries.push((
            "azurerm_kubernetes_cluster",
            Exposure::PublicUnlessPrivate { attribute: "private_cluster_enabled" },
        ));
        entries.extend(VM_TYPES.iter().map(|vm| (*vm, Exposure::PublicIpOnInterface)));
        entries.push((NIC_TYPE, Exposure::PublicIpOnInterface));
        entries.push(("azurerm_lb", Exposure::PublicFrontend));
        entries.push(("azurerm_application_gateway", Exposure::PublicFrontend));
        entries.push((PUBLIC_IP_TYPE, Exposure::Always));
        entries.extend(NON_ENDPOINT_TYPES.iter().map(|t| (*t, Exposure::Never)));

        Self { entries }
    }

    pub fn with_entry(mut self, resource_type: &'static str, exposure: Exposure) -> Self {
        self.entries.retain(|(t, _)| *t != resource_type);
        self.entries.push((resource_type, exposure));
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<Exposure> {
        self.entries
            .iter()
            .find(|(t, _)| *t == resource_type)
            .map(|(_, e)| *e)
    }

    pub fn is_public(&self, index: &ResourceIndex, topology: &NetworkTopology, resource: &Resource) -> bool {
        match self.get(&resource.resource_type) {
            Some(Exposure::PublicUnlessDisabled { attribute }) => resource.attr_bool(attribute) != Some(false),
            Some(Exposure::PublicUnlessPrivate { attribute }) => resource.attr_bool(attribute) != Some(true),
            Some(Exposure::PublicIpOnInterface) => has_public_ip(index, resource),
            Some(Exposure::PublicFrontend) => has_public_frontend(topology, resource),
            Some(Exposure::Always) => true,
            Some(Exposure::Never) => false,
            None => !explicitly_disabled(resource),
        }
    }
}

impl Default for ExposureTable {
    fn default() -> Self {
        Self::azure()
    }
}

fn explicitly_disabled(resource: &Resource) -> bool {
    match resource.attr(PUBLIC_NETWORK_ACCESS) {
        Some(AttrValue::Scalar(Scalar::Bool(b))) => !*b,
        _ => resource
            .attr_str("public_network_access")
            .is_some_and(|s| s.eq_ignore_ascii_case("disabled")),
    }
}

fn has_public_ip(index: &ResourceIndex, resource: &Resource) -> bool {
    let interface_has_ip = |nic: &Resource| {
        nic.attr_strings("ip_configuration.public_ip_address_id")
            .into_iter()
            .any(|id| !id.is_empty() && index.resolve_reference(id, Some(PUBLIC_IP_TYPE)).is_some())
    };

    if resource.is_type(NIC_TYPE) {
        return interface_has_ip(resource);
    }
    resource
        .attr_strings("network_interface_ids")
        .into_iter()
        .filter_map(|id| index.resolve_reference(id, Some(NIC_TYPE)))
        .filter_map(|key| index.lookup(&key))
        .any(interface_has_ip)
}

fn has_public_frontend(topology: &NetworkTopology, resource: &Resource) -> bool {
    let key = resource.key();
    topology.load_balancers.iter().any(|lb| lb.id == key && lb.is_public)
        || topology
            .application_gateways
            .iter()
            .any(|agw| agw.id == key && !agw.public_ip_ids.is_empty())
}
