//! Textual cross-references embedded in attribute values.
//!
//! Configuration encodes relationships as text (`${azurerm_subnet.app.id}`,
//! ARM ids, or bare names). The fixed type vocabulary below is the only set
//! of types the scanner recognizes in `<type>.<name>` fragments.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use cloudsight_core::ResourceKey;

/// Resource types recognized in `<type>.<name>` reference fragments.
pub const TYPE_VOCABULARY: &[&str] = &[
    "azurerm_application_gateway",
    "azurerm_app_service",
    "azurerm_app_service_plan",
    "azurerm_bastion_host",
    "azurerm_container_registry",
    "azurerm_cosmosdb_account",
    "azurerm_eventhub_namespace",
    "azurerm_express_route_circuit",
    "azurerm_firewall",
    "azurerm_firewall_application_rule_collection",
    "azurerm_firewall_nat_rule_collection",
    "azurerm_firewall_network_rule_collection",
    "azurerm_firewall_policy",
    "azurerm_firewall_policy_rule_collection_group",
    "azurerm_function_app",
    "azurerm_key_vault",
    "azurerm_key_vault_access_policy",
    "azurerm_key_vault_key",
    "azurerm_kubernetes_cluster",
    "azurerm_lb",
    "azurerm_lb_backend_address_pool",
    "azurerm_linux_function_app",
    "azurerm_linux_virtual_machine",
    "azurerm_linux_web_app",
    "azurerm_local_network_gateway",
    "azurerm_log_analytics_workspace",
    "azurerm_monitor_diagnostic_setting",
    "azurerm_mssql_database",
    "azurerm_mssql_server",
    "azurerm_mssql_server_security_alert_policy",
    "azurerm_mssql_server_transparent_data_encryption",
    "azurerm_mysql_flexible_server",
    "azurerm_mysql_server",
    "azurerm_network_interface",
    "azurerm_network_interface_security_group_association",
    "azurerm_network_security_group",
    "azurerm_network_security_rule",
    "azurerm_postgresql_flexible_server",
    "azurerm_postgresql_server",
    "azurerm_private_dns_zone",
    "azurerm_private_dns_zone_virtual_network_link",
    "azurerm_private_endpoint",
    "azurerm_public_ip",
    "azurerm_redis_cache",
    "azurerm_resource_group",
    "azurerm_route_table",
    "azurerm_servicebus_namespace",
    "azurerm_sql_database",
    "azurerm_sql_server",
    "azurerm_storage_account",
    "azurerm_storage_account_customer_managed_key",
    "azurerm_subnet",
    "azurerm_subnet_network_security_group_association",
    "azurerm_subnet_route_table_association",
    "azurerm_user_assigned_identity",
    "azurerm_virtual_machine",
    "azurerm_virtual_network",
    "azurerm_virtual_network_gateway",
    "azurerm_virtual_network_gateway_connection",
    "azurerm_virtual_network_peering",
    "azurerm_windows_function_app",
    "azurerm_windows_virtual_machine",
    "azurerm_windows_web_app",
];

/// ARM provider paths mapped onto vocabulary types, for targets given as
/// full resource ids instead of interpolations.
const ARM_PROVIDERS: &[(&str, &str)] = &[
    ("microsoft.storage/storageaccounts", "azurerm_storage_account"),
    ("microsoft.keyvault/vaults", "azurerm_key_vault"),
    ("microsoft.sql/servers", "azurerm_mssql_server"),
    ("microsoft.dbforpostgresql/flexibleservers", "azurerm_postgresql_flexible_server"),
    ("microsoft.dbforpostgresql/servers", "azurerm_postgresql_server"),
    ("microsoft.dbformysql/flexibleservers", "azurerm_mysql_flexible_server"),
    ("microsoft.dbformysql/servers", "azurerm_mysql_server"),
    ("microsoft.documentdb/databaseaccounts", "azurerm_cosmosdb_account"),
    ("microsoft.cache/redis", "azurerm_redis_cache"),
    ("microsoft.servicebus/namespaces", "azurerm_servicebus_namespace"),
    ("microsoft.eventhub/namespaces", "azurerm_eventhub_namespace"),
    ("microsoft.containerregistry/registries", "azurerm_container_registry"),
    ("microsoft.web/sites", "azurerm_linux_web_app"),
    ("microsoft.containerservice/managedclusters", "azurerm_kubernetes_cluster"),
    ("microsoft.network/virtualnetworks", "azurerm_virtual_network"),
];

/// How a reference was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A `<type>.<name>` fragment inside an attribute string.
    Interpolation,
    /// An entry in the resource's dependency list.
    Dependency,
}

/// A reference found at index build, with its resolution cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    /// Dot path of the attribute holding the reference (empty for dependencies).
    pub attribute_path: String,
    /// Referenced type as written.
    pub target_type: String,
    /// Referenced local name as written.
    pub target_name: String,
    /// Canonical key when the target exists in the analyzed set.
    pub resolved: Option<ResourceKey>,
}

/// A `<type>.<name>` fragment found in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedFragment {
    pub resource_type: String,
    pub name: String,
}

impl TypedFragment {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_type, &self.name)
    }
}

fn fragment_regex() -> &'static Regex {
    static FRAGMENT: OnceLock<Regex> = OnceLock::new();
    FRAGMENT.get_or_init(|| {
        // Longest alternatives first so `azurerm_subnet_route_table_association`
        // is not captured as `azurerm_subnet`.
        let mut types: Vec<&str> = TYPE_VOCABULARY.to_vec();
        types.sort_by_key(|t| std::cmp::Reverse(t.len()));
        let alternation = types
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?:^|[^A-Za-z0-9_])({alternation})\.([A-Za-z0-9_-]+)"))
            .expect("valid regex")
    })
}

/// Every `<type>.<name>` fragment in `text`, in order of appearance.
pub fn scan_fragments(text: &str) -> Vec<TypedFragment> {
    fragment_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            Some(TypedFragment {
                resource_type: caps.get(1)?.as_str().to_string(),
                name: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Infer a vocabulary type from a reference: first an interpolation
/// fragment, then an ARM provider path.
pub fn infer_type(text: &str) -> Option<String> {
    if let Some(fragment) = scan_fragments(text).into_iter().next() {
        return Some(fragment.resource_type);
    }
    let lower = text.to_ascii_lowercase();
    ARM_PROVIDERS
        .iter()
        .find(|(provider, _)| lower.contains(&format!("/providers/{provider}/")))
        .map(|(_, t)| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_interpolation() {
        let frags = scan_fragments("${azurerm_subnet.app.id}");
        assert_eq!(
            frags,
            vec![TypedFragment {
                resource_type: "azurerm_subnet".to_string(),
                name: "app".to_string()
            }]
        );
    }

    #[test]
    fn test_longest_type_wins() {
        let frags = scan_fragments("azurerm_subnet_network_security_group_association.web.id");
        assert_eq!(frags[0].resource_type, "azurerm_subnet_network_security_group_association");
        assert_eq!(frags[0].name, "web");
    }

    #[test]
    fn test_unknown_type_not_matched() {
        assert!(scan_fragments("aws_subnet.app.id").is_empty());
        assert!(scan_fragments("plain-name").is_empty());
    }

    #[test]
    fn test_multiple_fragments() {
        let frags = scan_fragments("[azurerm_subnet.a.id, azurerm_subnet.b.id]");
        let names: Vec<_> = frags.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_infer_type_from_arm_id() {
        let id = "/subscriptions/x/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/data";
        assert_eq!(infer_type(id).as_deref(), Some("azurerm_storage_account"));
        assert_eq!(
            infer_type("azurerm_key_vault.kv.id").as_deref(),
            Some("azurerm_key_vault")
        );
        assert_eq!(infer_type("something-else"), None);
    }
}
