//! Type-specific procedural checks.
//!
//! These look beyond a single attribute: at referencing resources (private
//! endpoints, CMK bindings, diagnostic settings, alert policies, access
//! policies) and at the reconstructed network. Each entry in the registry
//! names the types it applies to.

use cloudsight_core::{Resource, ResourceKey, Severity};
use cloudsight_index::ResourceIndex;
use cloudsight_netsim::NetworkTopology;

use crate::types::{Category, Finding};

/// Read-only structures shared by every check in one run.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub index: &'a ResourceIndex,
    pub topology: &'a NetworkTopology,
}

pub type CheckFn = fn(&CheckContext<'_>, &Resource) -> Vec<Finding>;

/// A procedural check bound to the types it inspects.
#[derive(Clone)]
pub struct TypeCheck {
    pub resource_types: &'static [&'static str],
    pub run: CheckFn,
}

/// Registry of procedural checks keyed by resource type.
#[derive(Clone)]
pub struct CheckRegistry {
    checks: Vec<TypeCheck>,
}

pub const STORAGE_TYPES: &[&str] = &["azurerm_storage_account"];
pub const AKS_TYPES: &[&str] = &["azurerm_kubernetes_cluster"];
pub const SQL_SERVER_TYPES: &[&str] = &["azurerm_mssql_server", "azurerm_sql_server"];
pub const KEY_VAULT_TYPES: &[&str] = &["azurerm_key_vault"];
pub const VM_TYPES: &[&str] = &[
    "azurerm_linux_virtual_machine",
    "azurerm_windows_virtual_machine",
    "azurerm_virtual_machine",
];

impl CheckRegistry {
    pub fn azure() -> Self {
        Self {
            checks: vec![
                TypeCheck { resource_types: STORAGE_TYPES, run: storage_checks },
                TypeCheck { resource_types: AKS_TYPES, run: aks_checks },
                TypeCheck { resource_types: SQL_SERVER_TYPES, run: sql_checks },
                TypeCheck { resource_types: KEY_VAULT_TYPES, run: key_vault_checks },
                TypeCheck { resource_types: VM_TYPES, run: vm_checks },
            ],
        }
    }

    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn with_check(mut self, check: TypeCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn run(&self, ctx: &CheckContext<'_>, resource: &Resource) -> Vec<Finding> {
        self.checks
            .iter()
            .filter(|c| c.resource_types.contains(&resource.resource_type.as_str()))
            .flat_map(|c| (c.run)(ctx, resource))
            .collect()
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::azure()
    }
}

struct FindingSpec<'s> {
    rule_id: &'s str,
    severity: Severity,
    category: Category,
    attribute_path: &'s str,
    expected: &'s str,
    title: &'s str,
    remediation: &'s str,
}

fn finding(resource: &Resource, spec: FindingSpec<'_>, current: Option<String>) -> Finding {
    Finding {
        rule_id: spec.rule_id.to_string(),
        severity: spec.severity,
        category: spec.category,
        resource_type: resource.resource_type.clone(),
        attribute_path: spec.attribute_path.to_string(),
        current_value: current,
        expected_value: Some(spec.expected.to_string()),
        title: spec.title.to_string(),
        remediation: spec.remediation.to_string(),
    }
}

fn has_referrer(ctx: &CheckContext<'_>, key: &ResourceKey, referrer_type: &str) -> bool {
    !ctx.index.referrers_of_type(key, referrer_type).is_empty()
}

// ── Storage ──────────────────────────────────────────────────────

fn storage_checks(ctx: &CheckContext<'_>, r: &Resource) -> Vec<Finding> {
    let key = r.key();
    let mut findings = Vec::new();

    let has_private_endpoint = ctx
        .topology
        .private_endpoints
        .iter()
        .any(|pe| pe.target_resource_id.as_deref() == Some(key.as_str()))
        || has_referrer(ctx, &key, "azurerm_private_endpoint");
    if !has_private_endpoint {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "storage-no-private-endpoint",
                severity: Severity::Medium,
                category: Category::Network,
                attribute_path: "private_endpoint",
                expected: "private endpoint attached",
                title: "Storage account has no private endpoint",
                remediation: "Add an azurerm_private_endpoint targeting this account",
            },
            None,
        ));
    }

    if let Some(replication) = r.attr_str("account_replication_type") {
        let geo = replication.to_ascii_uppercase().contains("GRS");
        let (title, remediation) = if geo {
            (
                "Data is replicated to a paired region",
                "Confirm the paired region satisfies data residency requirements",
            )
        } else {
            (
                "Data is not geo-replicated",
                "Use GRS, RA-GRS, or GZRS if regional outages must be survivable",
            )
        };
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "storage-geo-replication",
                severity: Severity::Info,
                category: Category::Backup,
                attribute_path: "account_replication_type",
                expected: "GRS",
                title,
                remediation,
            },
            Some(replication.to_string()),
        ));
    }

    let has_cmk = r.has_block("customer_managed_key")
        || has_referrer(ctx, &key, "azurerm_storage_account_customer_managed_key");
    if !has_cmk {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "storage-no-cmk",
                severity: Severity::Low,
                category: Category::Encryption,
                attribute_path: "customer_managed_key",
                expected: "customer-managed key",
                title: "Storage encrypted with platform-managed keys only",
                remediation: "Configure a customer_managed_key backed by Key Vault",
            },
            None,
        ));
    }

    if r.attr_bool("blob_properties.versioning_enabled") != Some(true) {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "storage-no-blob-versioning",
                severity: Severity::Low,
                category: Category::Backup,
                attribute_path: "blob_properties.versioning_enabled",
                expected: "true",
                title: "Blob versioning is disabled",
                remediation: "Set blob_properties.versioning_enabled = true",
            },
            r.attr("blob_properties.versioning_enabled").map(|v| v.render()),
        ));
    }

    findings
}

// ── AKS ──────────────────────────────────────────────────────────

fn aks_checks(_ctx: &CheckContext<'_>, r: &Resource) -> Vec<Finding> {
    let mut findings = Vec::new();

    if !r.has_block("azure_active_directory_role_based_access_control") {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "aks-no-aad",
                severity: Severity::Medium,
                category: Category::Identity,
                attribute_path: "azure_active_directory_role_based_access_control",
                expected: "Entra ID RBAC block",
                title: "Cluster is not integrated with Entra ID",
                remediation: "Add an azure_active_directory_role_based_access_control block",
            },
            None,
        ));
    }

    if !r.has_block("microsoft_defender") {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "aks-no-defender",
                severity: Severity::Info,
                category: Category::Logging,
                attribute_path: "microsoft_defender",
                expected: "Defender profile",
                title: "Microsoft Defender for Containers is not enabled",
                remediation: "Add a microsoft_defender block with a Log Analytics workspace",
            },
            None,
        ));
    }

    if !r.has_block("key_vault_secrets_provider") {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "aks-no-secrets-store",
                severity: Severity::Info,
                category: Category::Configuration,
                attribute_path: "key_vault_secrets_provider",
                expected: "secrets store CSI driver",
                title: "Key Vault secrets store CSI driver is not enabled",
                remediation: "Add a key_vault_secrets_provider block",
            },
            None,
        ));
    }

    findings
}

// ── SQL ──────────────────────────────────────────────────────────

fn sql_checks(ctx: &CheckContext<'_>, r: &Resource) -> Vec<Finding> {
    let key = r.key();
    let mut findings = Vec::new();

    let tde_disabled = ctx
        .index
        .referrers(&key)
        .filter(|db| db.is_type("azurerm_mssql_database") || db.is_type("azurerm_sql_database"))
        .any(|db| db.attr_bool("transparent_data_encryption_enabled") == Some(false));
    if tde_disabled {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "sql-database-tde-disabled",
                severity: Severity::High,
                category: Category::Encryption,
                attribute_path: "transparent_data_encryption_enabled",
                expected: "true",
                title: "A database on this server has TDE disabled",
                remediation: "Enable transparent data encryption on every database",
            },
            Some("false".to_string()),
        ));
    }

    let alert_policy_enabled = ctx
        .index
        .referrers_of_type(&key, "azurerm_mssql_server_security_alert_policy")
        .iter()
        .any(|p| p.attr_str("state").map_or(true, |s| s.eq_ignore_ascii_case("enabled")));
    let inline_enabled = r
        .attr_str("threat_detection_policy.state")
        .is_some_and(|s| s.eq_ignore_ascii_case("enabled"));
    if !alert_policy_enabled && !inline_enabled {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "sql-no-threat-detection",
                severity: Severity::Medium,
                category: Category::Logging,
                attribute_path: "threat_detection_policy",
                expected: "security alert policy enabled",
                title: "Advanced threat protection is not enabled",
                remediation: "Add an azurerm_mssql_server_security_alert_policy with state = \"Enabled\"",
            },
            None,
        ));
    }

    findings
}

// ── Key Vault ────────────────────────────────────────────────────

/// Permissions that make an access policy broad.
const BROAD_PERMISSIONS: &[&str] = &["all", "purge"];

fn key_vault_checks(ctx: &CheckContext<'_>, r: &Resource) -> Vec<Finding> {
    let key = r.key();
    let mut findings = Vec::new();

    if !has_referrer(ctx, &key, "azurerm_monitor_diagnostic_setting") {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "keyvault-no-diagnostics",
                severity: Severity::Low,
                category: Category::Logging,
                attribute_path: "diagnostic_setting",
                expected: "diagnostic setting attached",
                title: "Key vault audit events are not exported",
                remediation: "Add an azurerm_monitor_diagnostic_setting targeting this vault",
            },
            None,
        ));
    }

    let broad = |policy: &Resource, prefix: &str| {
        ["key_permissions", "secret_permissions", "certificate_permissions"]
            .iter()
            .flat_map(|field| {
                let path = if prefix.is_empty() {
                    field.to_string()
                } else {
                    format!("{prefix}.{field}")
                };
                policy.attr_strings(&path).into_iter().map(str::to_ascii_lowercase).collect::<Vec<_>>()
            })
            .find(|p| BROAD_PERMISSIONS.contains(&p.as_str()))
    };

    let standalone = ctx.index.referrers_of_type(&key, "azurerm_key_vault_access_policy");
    let offending = broad(r, "access_policy").or_else(|| standalone.iter().find_map(|p| broad(*p, "")));
    if let Some(permission) = offending {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "keyvault-broad-access-policy",
                severity: Severity::High,
                category: Category::Identity,
                attribute_path: "access_policy",
                expected: "least-privilege permissions",
                title: "An access policy grants broad permissions",
                remediation: "Replace \"All\"/\"Purge\" grants with the specific operations required",
            },
            Some(permission),
        ));
    }

    findings
}

// ── Virtual machines ─────────────────────────────────────────────

fn vm_checks(ctx: &CheckContext<'_>, r: &Resource) -> Vec<Finding> {
    let key = r.key();
    let mut findings = Vec::new();

    if !r.has_block("boot_diagnostics") {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "vm-no-boot-diagnostics",
                severity: Severity::Low,
                category: Category::Logging,
                attribute_path: "boot_diagnostics",
                expected: "boot diagnostics enabled",
                title: "Boot diagnostics are disabled",
                remediation: "Add a boot_diagnostics block",
            },
            None,
        ));
    }

    if ctx.topology.effective_nsg(ctx.index, &key).is_none() {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "vm-no-nsg",
                severity: Severity::Medium,
                category: Category::Network,
                attribute_path: "network_interface_ids",
                expected: "NSG on the interface or subnet",
                title: "No network security group governs this VM",
                remediation: "Associate an NSG with the VM's network interface or subnet",
            },
            None,
        ));
    }

    let password_flag = r
        .attr_bool("disable_password_authentication")
        .or_else(|| r.attr_bool("os_profile_linux_config.disable_password_authentication"));
    let linux = !r.is_type("azurerm_windows_virtual_machine");
    if linux && password_flag == Some(false) {
        findings.push(finding(
            r,
            FindingSpec {
                rule_id: "vm-password-auth",
                severity: Severity::High,
                category: Category::Identity,
                attribute_path: "disable_password_authentication",
                expected: "true",
                title: "Linux VM allows password authentication",
                remediation: "Set disable_password_authentication = true and use SSH keys",
            },
            Some("false".to_string()),
        ));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsight_netsim::build_topology;
    use serde_json::json;

    fn run(resources: Vec<Resource>, key: &str) -> Vec<Finding> {
        let index = ResourceIndex::build(resources).unwrap();
        let topology = build_topology(&index);
        let ctx = CheckContext {
            index: &index,
            topology: &topology,
        };
        let resource = index.lookup(&ResourceKey::from(key)).unwrap();
        CheckRegistry::azure().run(&ctx, resource)
    }

    fn ids(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.rule_id.as_str()).collect()
    }

    #[test]
    fn test_storage_without_private_endpoint() {
        let findings = run(
            vec![Resource::new("azurerm_storage_account", "data")
                .with_attributes(json!({"account_replication_type": "GRS"}))],
            "azurerm_storage_account_data",
        );
        let pe = findings
            .iter()
            .find(|f| f.rule_id == "storage-no-private-endpoint")
            .unwrap();
        assert_eq!(pe.severity, Severity::Medium);
        let geo = findings.iter().find(|f| f.rule_id == "storage-geo-replication").unwrap();
        assert_eq!(geo.severity, Severity::Info);
        assert_eq!(geo.current_value.as_deref(), Some("GRS"));
    }

    #[test]
    fn test_storage_with_private_endpoint_and_cmk() {
        let findings = run(
            vec![
                Resource::new("azurerm_storage_account", "data").with_attributes(json!({
                    "blob_properties": [{"versioning_enabled": true}]
                })),
                Resource::new("azurerm_private_endpoint", "data").with_attributes(json!({
                    "private_service_connection": {
                        "private_connection_resource_id": "${azurerm_storage_account.data.id}"
                    }
                })),
                Resource::new("azurerm_storage_account_customer_managed_key", "data").with_attributes(json!({
                    "storage_account_id": "${azurerm_storage_account.data.id}"
                })),
            ],
            "azurerm_storage_account_data",
        );
        assert!(findings.is_empty(), "unexpected findings: {:?}", ids(&findings));
    }

    #[test]
    fn test_aks_without_aad() {
        let findings = run(
            vec![Resource::new("azurerm_kubernetes_cluster", "main").with_attributes(json!({}))],
            "azurerm_kubernetes_cluster_main",
        );
        let aad = findings.iter().find(|f| f.rule_id == "aks-no-aad").unwrap();
        assert_eq!(aad.severity, Severity::Medium);
        assert!(findings
            .iter()
            .filter(|f| f.rule_id != "aks-no-aad")
            .all(|f| f.severity == Severity::Info));
    }

    #[test]
    fn test_sql_threat_detection_via_alert_policy() {
        let findings = run(
            vec![
                Resource::new("azurerm_mssql_server", "db").with_attributes(json!({})),
                Resource::new("azurerm_mssql_server_security_alert_policy", "db").with_attributes(json!({
                    "server_name": "${azurerm_mssql_server.db.name}",
                    "state": "Enabled"
                })),
                Resource::new("azurerm_mssql_database", "app").with_attributes(json!({
                    "server_id": "${azurerm_mssql_server.db.id}",
                    "transparent_data_encryption_enabled": false
                })),
            ],
            "azurerm_mssql_server_db",
        );
        assert_eq!(ids(&findings), vec!["sql-database-tde-disabled"]);
    }

    #[test]
    fn test_key_vault_broad_policy() {
        let findings = run(
            vec![
                Resource::new("azurerm_key_vault", "kv").with_attributes(json!({
                    "access_policy": [{"secret_permissions": ["Get", "List"]}]
                })),
                Resource::new("azurerm_key_vault_access_policy", "ops").with_attributes(json!({
                    "key_vault_id": "${azurerm_key_vault.kv.id}",
                    "key_permissions": ["Get", "Purge"]
                })),
            ],
            "azurerm_key_vault_kv",
        );
        assert_eq!(ids(&findings), vec!["keyvault-no-diagnostics", "keyvault-broad-access-policy"]);
        assert_eq!(findings[1].current_value.as_deref(), Some("purge"));
    }

    #[test]
    fn test_vm_without_nsg_and_with_password() {
        let findings = run(
            vec![Resource::new("azurerm_linux_virtual_machine", "app").with_attributes(json!({
                "disable_password_authentication": false
            }))],
            "azurerm_linux_virtual_machine_app",
        );
        assert_eq!(
            ids(&findings),
            vec!["vm-no-boot-diagnostics", "vm-no-nsg", "vm-password-auth"]
        );
    }
}
