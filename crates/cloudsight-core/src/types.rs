//! Core domain types shared across cloudsight crates.
//!
//! Resources are immutable inputs produced by the parsing collaborator.
//! Everything else in the workspace is derived from them on every run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attr::{self, AttrValue};

// ── Resource identity ────────────────────────────────────────────

/// Canonical resource identity: `<type>_<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(pub String);

impl ResourceKey {
    pub fn new(resource_type: &str, name: &str) -> Self {
        Self(format!("{resource_type}_{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Resource ─────────────────────────────────────────────────────

/// A typed resource declaration with a free-form attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Keys (or `type.name` references) of resources this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Build a resource from a JSON attribute object. Non-object values
    /// produce an empty attribute bag.
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        if let AttrValue::Map(map) = AttrValue::from(attributes) {
            self.attributes = map;
        }
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_type, &self.name)
    }

    /// The `name` attribute when present, otherwise the local name.
    pub fn display_name(&self) -> &str {
        self.attr_str("name").unwrap_or(&self.name)
    }

    pub fn attr(&self, path: &str) -> Option<&AttrValue> {
        attr::lookup(&self.attributes, path)
    }

    pub fn attr_all(&self, path: &str) -> Vec<&AttrValue> {
        attr::lookup_all(&self.attributes, path)
    }

    pub fn attr_str(&self, path: &str) -> Option<&str> {
        self.attr(path).and_then(|v| v.as_str())
    }

    pub fn attr_bool(&self, path: &str) -> Option<bool> {
        self.attr(path).and_then(|v| v.as_bool())
    }

    /// Every string at `path`, across lists of blocks and string lists.
    pub fn attr_strings(&self, path: &str) -> Vec<&str> {
        self.attr_all(path)
            .into_iter()
            .flat_map(|v| match v {
                AttrValue::List(items) => items.iter().filter_map(|i| i.as_str()).collect::<Vec<_>>(),
                other => other.as_str().into_iter().collect::<Vec<_>>(),
            })
            .collect()
    }

    /// True when a nested block (or any non-empty value) is declared at `path`.
    pub fn has_block(&self, path: &str) -> bool {
        self.attr(path).is_some_and(|v| !v.is_empty())
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }

    /// Visit every string leaf in the attribute bag with its dot path.
    pub fn walk_strings(&self, visit: &mut dyn FnMut(&str, &str)) {
        for (k, v) in &self.attributes {
            v.walk_strings(k, visit);
        }
    }
}

// ── Severity ─────────────────────────────────────────────────────

/// Finding severity. Ordering is total: `Info < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posture classification derived from the highest finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compliance {
    Compliant,
    Warning,
    NonCompliant,
}

impl Compliance {
    pub const ALL: [Compliance; 3] = [Compliance::Compliant, Compliance::Warning, Compliance::NonCompliant];
}

// ── Network enums ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Case-insensitive parse; anything other than "outbound" is inbound.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("outbound") {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    Allow,
    Deny,
}

impl Access {
    /// Case-insensitive parse; anything other than "allow" denies.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("allow") {
            Access::Allow
        } else {
            Access::Deny
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_joins_type_and_name() {
        let r = Resource::new("azurerm_subnet", "app");
        assert_eq!(r.key().as_str(), "azurerm_subnet_app");
    }

    #[test]
    fn test_resource_deserializes_with_optional_fields() {
        let json = r#"{"type":"azurerm_virtual_network","name":"main",
                       "attributes":{"address_space":["10.0.0.0/16"]}}"#;
        let r: Resource = serde_json::from_str(json).unwrap();
        assert!(r.tags.is_empty());
        assert!(r.dependencies.is_empty());
        assert_eq!(r.attr_strings("address_space"), vec!["10.0.0.0/16"]);
    }

    #[test]
    fn test_resource_requires_attributes() {
        let json = r#"{"type":"azurerm_virtual_network","name":"main"}"#;
        assert!(serde_json::from_str::<Resource>(json).is_err());
    }

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }

    #[test]
    fn test_display_name_prefers_attribute() {
        let r = Resource::new("azurerm_virtual_network", "a")
            .with_attributes(serde_json::json!({"name": "vnet-a"}));
        assert_eq!(r.display_name(), "vnet-a");
        assert_eq!(Resource::new("azurerm_virtual_network", "b").display_name(), "b");
    }

    #[test]
    fn test_direction_and_access_parse_case_insensitive() {
        assert_eq!(Direction::parse("OUTBOUND"), Direction::Outbound);
        assert_eq!(Direction::parse("Inbound"), Direction::Inbound);
        assert_eq!(Access::parse("allow"), Access::Allow);
        assert_eq!(Access::parse("Deny"), Access::Deny);
    }
}
