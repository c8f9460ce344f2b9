//! Posture findings and per-resource results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cloudsight_core::{Compliance, ResourceKey, Severity};

/// Finding category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Encryption,
    Network,
    Identity,
    Logging,
    Backup,
    Configuration,
}

/// One failed (or informational) security check against a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub category: Category,
    pub resource_type: String,
    pub attribute_path: String,
    pub current_value: Option<String>,
    pub expected_value: Option<String>,
    pub title: String,
    pub remediation: String,
}

/// Security posture of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posture {
    pub resource_id: ResourceKey,
    pub resource_type: String,
    pub findings: Vec<Finding>,
    pub is_encrypted: bool,
    pub has_public_endpoint: bool,
    pub has_nsg: bool,
    /// 0..=100, higher is better.
    pub score: u32,
    /// Highest finding severity, `low` when there are none.
    pub grade: Severity,
    pub compliance: Compliance,
}

/// Aggregate statistics over a posture map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_resources: usize,
    pub compliance_counts: BTreeMap<Compliance, usize>,
    /// Number of findings per severity.
    pub severity_counts: BTreeMap<Severity, usize>,
    /// Unweighted mean of per-resource scores; 100 when there are none.
    pub overall_score: f64,
}
