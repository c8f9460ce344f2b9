//! Declarative posture rules.
//!
//! Each rule is a single predicate over one attribute path. A rule fires
//! (produces a finding) when its predicate holds. Comparisons against an
//! absent attribute or a value of the wrong shape never fire; only
//! `exists` / `not_exists` look at presence.
//!
//! The built-in table can be replaced by a TOML file of `[[rules]]` entries:
//!
//! ```toml
//! [[rules]]
//! id = "storage-https-disabled"
//! resource_types = ["azurerm_storage_account"]
//! attribute_path = "https_traffic_only_enabled"
//! operator = "equals"
//! value = false
//! severity = "high"
//! category = "encryption"
//! title = "Storage account accepts plain HTTP"
//! remediation = "Set https_traffic_only_enabled = true"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use cloudsight_core::{AttrValue, Resource, Scalar, Severity};

use crate::error::{PostureError, Result};
use crate::types::{Category, Finding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    LessThan,
    GreaterThan,
    Exists,
    NotExists,
}

impl Operator {
    fn needs_value(self) -> bool {
        !matches!(self, Operator::Exists | Operator::NotExists)
    }

    /// Evaluate against the attribute found at the rule's path. `None`
    /// means the comparison was not meaningful for the value's shape.
    pub fn apply(self, actual: Option<&AttrValue>, expected: Option<&AttrValue>) -> Option<bool> {
        let compare = |f: fn(&AttrValue, &AttrValue) -> Option<bool>| match (actual, expected) {
            (Some(a), Some(e)) => f(a, e),
            _ => Some(false),
        };
        match self {
            Operator::Exists => Some(actual.is_some()),
            Operator::NotExists => Some(actual.is_none()),
            Operator::Equals => compare(scalar_eq),
            Operator::NotEquals => compare(|a, e| scalar_eq(a, e).map(|eq| !eq)),
            Operator::Contains => compare(contains),
            Operator::NotContains => compare(|a, e| contains(a, e).map(|c| !c)),
            Operator::LessThan => compare(|a, e| Some(a.as_f64()? < e.as_f64()?)),
            Operator::GreaterThan => compare(|a, e| Some(a.as_f64()? > e.as_f64()?)),
        }
    }
}

fn scalar_eq(actual: &AttrValue, expected: &AttrValue) -> Option<bool> {
    match expected {
        AttrValue::Scalar(Scalar::Bool(b)) => actual.as_bool().map(|a| a == *b),
        AttrValue::Scalar(Scalar::Number(n)) => actual.as_f64().map(|a| (a - n).abs() < f64::EPSILON),
        AttrValue::Scalar(Scalar::String(s)) => actual.as_str().map(|a| a.eq_ignore_ascii_case(s)),
        _ => None,
    }
}

fn contains(actual: &AttrValue, expected: &AttrValue) -> Option<bool> {
    match actual {
        AttrValue::List(items) => Some(items.iter().any(|i| scalar_eq(i, expected) == Some(true))),
        AttrValue::Scalar(Scalar::String(s)) => {
            let needle = expected.as_str()?;
            Some(s.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
        }
        _ => None,
    }
}

/// A single-predicate posture rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureRule {
    pub id: String,
    pub resource_types: Vec<String>,
    pub attribute_path: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Option<AttrValue>,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    #[serde(default)]
    pub remediation: String,
    /// Compliant state shown in findings; derived from the predicate when unset.
    #[serde(default)]
    pub expected: Option<String>,
}

impl PostureRule {
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.resource_types.iter().any(|t| t == "*" || t == resource_type)
    }

    /// The finding this rule produces for `resource`, if it fires.
    pub fn evaluate(&self, resource: &Resource) -> Option<Finding> {
        let actual = resource.attr(&self.attribute_path);
        match self.operator.apply(actual, self.value.as_ref()) {
            Some(true) => Some(Finding {
                rule_id: self.id.clone(),
                severity: self.severity,
                category: self.category,
                resource_type: resource.resource_type.clone(),
                attribute_path: self.attribute_path.clone(),
                current_value: actual.map(AttrValue::render),
                expected_value: self.expected.clone().or_else(|| self.derived_expectation()),
                title: self.title.clone(),
                remediation: self.remediation.clone(),
            }),
            Some(false) => None,
            None => {
                tracing::debug!(
                    rule = %self.id,
                    resource = %resource.key(),
                    path = %self.attribute_path,
                    "Attribute shape does not fit rule; not firing"
                );
                None
            }
        }
    }

    fn derived_expectation(&self) -> Option<String> {
        let value = self.value.as_ref().map(AttrValue::render);
        match self.operator {
            Operator::Exists => Some("absent".to_string()),
            Operator::NotExists => Some("present".to_string()),
            Operator::Equals => value.map(|v| format!("not {v}")),
            Operator::NotEquals => value,
            Operator::Contains => value.map(|v| format!("excludes {v}")),
            Operator::NotContains => value.map(|v| format!("includes {v}")),
            Operator::LessThan => value.map(|v| format!(">= {v}")),
            Operator::GreaterThan => value.map(|v| format!("<= {v}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<PostureRule>,
}

/// An ordered posture rule table.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    rules: Vec<PostureRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<PostureRule>) -> Result<Self> {
        for rule in &rules {
            if rule.operator.needs_value() && rule.value.is_none() {
                return Err(PostureError::InvalidRule {
                    id: rule.id.clone(),
                    reason: format!("operator {:?} requires a value", rule.operator),
                });
            }
            if rule.resource_types.is_empty() {
                return Err(PostureError::InvalidRule {
                    id: rule.id.clone(),
                    reason: "no resource types".to_string(),
                });
            }
        }
        Ok(Self { rules })
    }

    /// Load a TOML rule table. Replaces, not extends, the built-in table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PostureError::RuleTable {
                path: path.display().to_string(),
                reason: "file not found".to_string(),
            });
        }
        let file: RuleFile = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        tracing::debug!(path = %path.display(), rules = file.rules.len(), "Loaded posture rule table");
        Self::new(file.rules)
    }

    pub fn rules(&self) -> &[PostureRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every firing rule's finding, in table order.
    pub fn evaluate(&self, resource: &Resource) -> Vec<Finding> {
        self.rules
            .iter()
            .filter(|r| r.applies_to(&resource.resource_type))
            .filter_map(|r| r.evaluate(resource))
            .collect()
    }

    /// The built-in Azure rule table.
    pub fn builtin() -> Self {
        use Category::*;
        use Operator::*;

        const STORAGE: &[&str] = &["azurerm_storage_account"];
        const KEY_VAULT: &[&str] = &["azurerm_key_vault"];
        const SQL_SERVER: &[&str] = &["azurerm_mssql_server", "azurerm_sql_server"];
        const SQL_DATABASE: &[&str] = &["azurerm_mssql_database", "azurerm_sql_database"];
        const AKS: &[&str] = &["azurerm_kubernetes_cluster"];
        const WEB: &[&str] = &[
            "azurerm_app_service",
            "azurerm_linux_web_app",
            "azurerm_windows_web_app",
            "azurerm_function_app",
            "azurerm_linux_function_app",
            "azurerm_windows_function_app",
        ];
        const POSTGRES_MYSQL: &[&str] = &["azurerm_postgresql_server", "azurerm_mysql_server"];

        let rule = |id: &str,
                    types: &[&str],
                    path: &str,
                    operator: Operator,
                    value: Option<AttrValue>,
                    severity: Severity,
                    category: Category,
                    title: &str,
                    remediation: &str| PostureRule {
            id: id.to_string(),
            resource_types: types.iter().map(|t| t.to_string()).collect(),
            attribute_path: path.to_string(),
            operator,
            value,
            severity,
            category,
            title: title.to_string(),
            remediation: remediation.to_string(),
            expected: None,
        };
        let yes = || Some(AttrValue::from(serde_json::Value::Bool(true)));
        let no = || Some(AttrValue::from(serde_json::Value::Bool(false)));
        let text = |s: &str| Some(AttrValue::string(s));

        Self {
            rules: vec![
                rule(
                    "storage-https-disabled",
                    STORAGE,
                    "https_traffic_only_enabled",
                    Equals,
                    no(),
                    Severity::High,
                    Encryption,
                    "Storage account accepts plain HTTP",
                    "Set https_traffic_only_enabled = true",
                ),
                rule(
                    "storage-weak-tls",
                    STORAGE,
                    "min_tls_version",
                    NotEquals,
                    text("TLS1_2"),
                    Severity::Medium,
                    Encryption,
                    "Storage account allows TLS below 1.2",
                    "Set min_tls_version = \"TLS1_2\"",
                ),
                rule(
                    "storage-public-blob-access",
                    STORAGE,
                    "allow_nested_items_to_be_public",
                    Equals,
                    yes(),
                    Severity::Medium,
                    Network,
                    "Blob containers may be made public",
                    "Set allow_nested_items_to_be_public = false",
                ),
                rule(
                    "storage-shared-key-enabled",
                    STORAGE,
                    "shared_access_key_enabled",
                    Equals,
                    yes(),
                    Severity::Low,
                    Identity,
                    "Shared key authorization is enabled",
                    "Set shared_access_key_enabled = false and use Entra ID auth",
                ),
                rule(
                    "keyvault-no-purge-protection",
                    KEY_VAULT,
                    "purge_protection_enabled",
                    Equals,
                    no(),
                    Severity::Medium,
                    Backup,
                    "Key vault purge protection is disabled",
                    "Set purge_protection_enabled = true",
                ),
                rule(
                    "keyvault-short-soft-delete",
                    KEY_VAULT,
                    "soft_delete_retention_days",
                    LessThan,
                    Some(AttrValue::from(serde_json::json!(30))),
                    Severity::Low,
                    Backup,
                    "Key vault soft-delete retention under 30 days",
                    "Raise soft_delete_retention_days to at least 30",
                ),
                rule(
                    "keyvault-public-network",
                    KEY_VAULT,
                    "public_network_access_enabled",
                    Equals,
                    yes(),
                    Severity::Low,
                    Network,
                    "Key vault reachable from public networks",
                    "Set public_network_access_enabled = false and use a private endpoint",
                ),
                rule(
                    "sql-public-network",
                    SQL_SERVER,
                    "public_network_access_enabled",
                    Equals,
                    yes(),
                    Severity::Medium,
                    Network,
                    "SQL server reachable from public networks",
                    "Set public_network_access_enabled = false",
                ),
                rule(
                    "sql-weak-tls",
                    SQL_SERVER,
                    "minimum_tls_version",
                    NotEquals,
                    text("1.2"),
                    Severity::Medium,
                    Encryption,
                    "SQL server allows TLS below 1.2",
                    "Set minimum_tls_version = \"1.2\"",
                ),
                rule(
                    "sql-no-tde",
                    SQL_DATABASE,
                    "transparent_data_encryption_enabled",
                    Equals,
                    no(),
                    Severity::High,
                    Encryption,
                    "Transparent data encryption is disabled",
                    "Set transparent_data_encryption_enabled = true",
                ),
                rule(
                    "aks-rbac-disabled",
                    AKS,
                    "role_based_access_control_enabled",
                    Equals,
                    no(),
                    Severity::High,
                    Identity,
                    "Kubernetes RBAC is disabled",
                    "Set role_based_access_control_enabled = true",
                ),
                rule(
                    "aks-local-accounts",
                    AKS,
                    "local_account_disabled",
                    Equals,
                    no(),
                    Severity::Low,
                    Identity,
                    "Local cluster accounts are enabled",
                    "Set local_account_disabled = true",
                ),
                rule(
                    "web-https-only-disabled",
                    WEB,
                    "https_only",
                    Equals,
                    no(),
                    Severity::High,
                    Encryption,
                    "App accepts plain HTTP",
                    "Set https_only = true",
                ),
                rule(
                    "web-ftps-allowed",
                    WEB,
                    "site_config.ftps_state",
                    Equals,
                    text("AllAllowed"),
                    Severity::Medium,
                    Encryption,
                    "Unencrypted FTP deployment is allowed",
                    "Set site_config.ftps_state = \"FtpsOnly\" or \"Disabled\"",
                ),
                rule(
                    "redis-non-ssl-port",
                    &["azurerm_redis_cache"],
                    "enable_non_ssl_port",
                    Equals,
                    yes(),
                    Severity::High,
                    Encryption,
                    "Redis non-TLS port 6379 is enabled",
                    "Set enable_non_ssl_port = false",
                ),
                rule(
                    "db-ssl-disabled",
                    POSTGRES_MYSQL,
                    "ssl_enforcement_enabled",
                    Equals,
                    no(),
                    Severity::High,
                    Encryption,
                    "Database does not enforce SSL connections",
                    "Set ssl_enforcement_enabled = true",
                ),
                rule(
                    "acr-admin-enabled",
                    &["azurerm_container_registry"],
                    "admin_enabled",
                    Equals,
                    yes(),
                    Severity::Medium,
                    Identity,
                    "Container registry admin user is enabled",
                    "Set admin_enabled = false and use role assignments",
                ),
                rule(
                    "cosmos-local-auth",
                    &["azurerm_cosmosdb_account"],
                    "local_authentication_disabled",
                    Equals,
                    no(),
                    Severity::Low,
                    Identity,
                    "Cosmos DB key-based authentication is enabled",
                    "Set local_authentication_disabled = true",
                ),
            ],
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage(attrs: serde_json::Value) -> Resource {
        Resource::new("azurerm_storage_account", "data").with_attributes(attrs)
    }

    fn value(v: serde_json::Value) -> Option<AttrValue> {
        Some(AttrValue::from(v))
    }

    #[test]
    fn test_operators() {
        let list = AttrValue::from(json!(["Blob", "File"]));
        let text = AttrValue::from(json!("Standard_GRS"));
        let num = AttrValue::from(json!(7));

        assert_eq!(Operator::Contains.apply(Some(&list), value(json!("blob")).as_ref()), Some(true));
        assert_eq!(Operator::Contains.apply(Some(&text), value(json!("grs")).as_ref()), Some(true));
        assert_eq!(Operator::NotContains.apply(Some(&text), value(json!("LRS")).as_ref()), Some(true));
        assert_eq!(Operator::LessThan.apply(Some(&num), value(json!(30)).as_ref()), Some(true));
        assert_eq!(Operator::GreaterThan.apply(Some(&num), value(json!(30)).as_ref()), Some(false));
        assert_eq!(Operator::Exists.apply(None, None), Some(false));
        assert_eq!(Operator::NotExists.apply(None, None), Some(true));
    }

    #[test]
    fn test_absent_and_mismatched_never_fire() {
        let map = AttrValue::from(json!({"a": 1}));
        assert_eq!(Operator::Equals.apply(None, value(json!(false)).as_ref()), Some(false));
        assert_eq!(Operator::NotEquals.apply(None, value(json!("x")).as_ref()), Some(false));
        assert_eq!(Operator::Equals.apply(Some(&map), value(json!(true)).as_ref()), None);
        assert_eq!(Operator::LessThan.apply(Some(&map), value(json!(3)).as_ref()), None);
    }

    #[test]
    fn test_builtin_rule_fires_with_values() {
        let table = RuleTable::builtin();
        let findings = table.evaluate(&storage(json!({
            "https_traffic_only_enabled": false,
            "min_tls_version": "TLS1_0"
        })));
        let ids: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["storage-https-disabled", "storage-weak-tls"]);
        assert_eq!(findings[0].current_value.as_deref(), Some("false"));
        assert_eq!(findings[0].expected_value.as_deref(), Some("not false"));
        assert_eq!(findings[1].expected_value.as_deref(), Some("TLS1_2"));
    }

    #[test]
    fn test_builtin_quiet_on_minimal_resource() {
        let table = RuleTable::builtin();
        assert!(table.evaluate(&storage(json!({}))).is_empty());
        let aks = Resource::new("azurerm_kubernetes_cluster", "k8s").with_attributes(json!({}));
        assert!(table.evaluate(&aks).is_empty());
    }

    #[test]
    fn test_string_bools_compare() {
        let table = RuleTable::builtin();
        let findings = table.evaluate(&storage(json!({"https_traffic_only_enabled": "false"})));
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let mut rule = RuleTable::builtin().rules()[0].clone();
        rule.value = None;
        assert!(matches!(
            RuleTable::new(vec![rule]),
            Err(PostureError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_load_toml_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[[rules]]
id = "storage-lrs-only"
resource_types = ["azurerm_storage_account"]
attribute_path = "account_replication_type"
operator = "equals"
value = "LRS"
severity = "low"
category = "backup"
title = "Locally redundant storage only"

[[rules]]
id = "any-no-identity"
resource_types = ["*"]
attribute_path = "identity"
operator = "not_exists"
severity = "info"
category = "identity"
title = "No managed identity"
"#,
        )
        .unwrap();

        let table = RuleTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        let findings = table.evaluate(&storage(json!({"account_replication_type": "LRS"})));
        let ids: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["storage-lrs-only", "any-no-identity"]);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = RuleTable::load(Path::new("/nonexistent/rules.toml")).unwrap_err();
        assert!(matches!(err, PostureError::RuleTable { .. }));
    }
}
