//! cloudsight-posture: Per-resource security posture.
//!
//! A resource is scored by running the declarative rule table and the
//! procedural check registry over it, then deducting severity weights from
//! 100. `aggregate` folds a posture map into summary statistics.

pub mod aggregate;
pub mod checks;
pub mod error;
pub mod exposure;
pub mod scoring;
pub mod table;
pub mod types;

pub use aggregate::aggregate;
pub use checks::{CheckContext, CheckRegistry, TypeCheck};
pub use error::PostureError;
pub use exposure::{Exposure, ExposureTable};
pub use table::{Operator, PostureRule, RuleTable};
pub use types::{Category, Finding, Posture, Summary};

use std::collections::BTreeMap;

use rayon::prelude::*;

use cloudsight_core::{Resource, ResourceKey, SeverityWeights};
use cloudsight_index::ResourceIndex;
use cloudsight_netsim::NetworkTopology;

/// Scores resources against a rule table and check registry.
///
/// Holds only shared references and immutable configuration, so one scorer
/// serves every worker thread of a run.
pub struct PostureScorer<'a> {
    index: &'a ResourceIndex,
    topology: &'a NetworkTopology,
    table: RuleTable,
    checks: CheckRegistry,
    exposure: ExposureTable,
    weights: SeverityWeights,
    parallel: bool,
}

impl<'a> PostureScorer<'a> {
    /// Built-in rules and checks with default severity weights.
    pub fn new(index: &'a ResourceIndex, topology: &'a NetworkTopology) -> Self {
        Self {
            index,
            topology,
            table: RuleTable::builtin(),
            checks: CheckRegistry::azure(),
            exposure: ExposureTable::azure(),
            weights: SeverityWeights::default(),
            parallel: true,
        }
    }

    /// Replace the declarative rule table.
    pub fn with_rules(mut self, table: RuleTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_checks(mut self, checks: CheckRegistry) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_exposure(mut self, exposure: ExposureTable) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_weights(mut self, weights: SeverityWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn score(&self, resource: &Resource) -> Posture {
        let key = resource.key();
        let ctx = CheckContext {
            index: self.index,
            topology: self.topology,
        };

        let mut findings = self.table.evaluate(resource);
        findings.extend(self.checks.run(&ctx, resource));

        let score = scoring::compute_score(&findings, &self.weights);
        let grade = scoring::grade(&findings);

        tracing::debug!(
            resource = %key,
            findings = findings.len(),
            score,
            "Scored resource"
        );

        Posture {
            is_encrypted: scoring::is_encrypted(&findings),
            has_public_endpoint: self.exposure.is_public(self.index, self.topology, resource),
            has_nsg: self.topology.effective_nsg(self.index, &key).is_some(),
            resource_type: resource.resource_type.clone(),
            resource_id: key,
            findings,
            score,
            grade,
            compliance: scoring::compliance(grade),
        }
    }

    /// Score every indexed resource.
    pub fn score_all(&self) -> BTreeMap<ResourceKey, Posture> {
        let resources: Vec<&Resource> = self.index.iter().map(|(_, r)| r).collect();
        let postures: Vec<Posture> = if self.parallel {
            resources.par_iter().map(|r| self.score(r)).collect()
        } else {
            resources.iter().map(|r| self.score(r)).collect()
        };
        postures.into_iter().map(|p| (p.resource_id.clone(), p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsight_core::{Compliance, Severity};
    use cloudsight_netsim::build_topology;
    use serde_json::json;

    fn setup(resources: Vec<Resource>) -> (ResourceIndex, NetworkTopology) {
        let index = ResourceIndex::build(resources).unwrap();
        let topology = build_topology(&index);
        (index, topology)
    }

    #[test]
    fn test_storage_posture() {
        let (index, topology) = setup(vec![Resource::new("azurerm_storage_account", "data")
            .with_attributes(json!({"account_replication_type": "GRS"}))]);
        let scorer = PostureScorer::new(&index, &topology);
        let posture = scorer.score(index.lookup(&"azurerm_storage_account_data".into()).unwrap());

        let pe = posture
            .findings
            .iter()
            .find(|f| f.rule_id == "storage-no-private-endpoint")
            .unwrap();
        assert_eq!(pe.severity, Severity::Medium);
        assert!(posture.findings.iter().any(|f| f.rule_id == "storage-geo-replication"));
        assert!(posture.has_public_endpoint);
        assert!(posture.is_encrypted);
        assert_eq!(posture.compliance, Compliance::Warning);
        assert!(posture.score <= 100);
    }

    #[test]
    fn test_aks_without_aad_scores_minus_medium() {
        let (index, topology) = setup(vec![
            Resource::new("azurerm_kubernetes_cluster", "main").with_attributes(json!({}))
        ]);
        let scorer = PostureScorer::new(&index, &topology);
        let posture = scorer.score(index.lookup(&"azurerm_kubernetes_cluster_main".into()).unwrap());

        assert!(posture.findings.iter().any(|f| f.rule_id == "aks-no-aad"));
        assert_eq!(posture.score, 100 - SeverityWeights::default().medium);
        assert_eq!(posture.grade, Severity::Medium);
    }

    #[test]
    fn test_custom_weights() {
        let (index, topology) = setup(vec![
            Resource::new("azurerm_kubernetes_cluster", "main").with_attributes(json!({}))
        ]);
        let weights = SeverityWeights {
            medium: 30,
            ..SeverityWeights::default()
        };
        let scorer = PostureScorer::new(&index, &topology).with_weights(weights);
        let posture = scorer.score(index.lookup(&"azurerm_kubernetes_cluster_main".into()).unwrap());
        assert_eq!(posture.score, 70);
    }

    #[test]
    fn test_resource_group_scores_100_and_is_never_public() {
        let (index, topology) = setup(vec![
            Resource::new("azurerm_resource_group", "rg").with_attributes(json!({"location": "westeurope"}))
        ]);
        let scorer = PostureScorer::new(&index, &topology);
        let posture = scorer.score(index.lookup(&"azurerm_resource_group_rg".into()).unwrap());
        assert!(posture.findings.is_empty());
        assert_eq!(posture.score, 100);
        assert_eq!(posture.grade, Severity::Low);
        assert_eq!(posture.compliance, Compliance::Compliant);
        // Explicit never-public entry, not the unknown-type fallback.
        assert!(!posture.has_public_endpoint);
    }

    #[test]
    fn test_score_all_parallel_matches_sequential() {
        let (index, topology) = setup(vec![
            Resource::new("azurerm_storage_account", "a").with_attributes(json!({})),
            Resource::new("azurerm_key_vault", "kv").with_attributes(json!({})),
            Resource::new("azurerm_kubernetes_cluster", "k").with_attributes(json!({})),
            Resource::new("azurerm_linux_virtual_machine", "vm").with_attributes(json!({})),
        ]);
        let parallel = PostureScorer::new(&index, &topology).score_all();
        let sequential = PostureScorer::new(&index, &topology).with_parallel(false).score_all();
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.len(), 4);
        assert!(parallel.values().all(|p| p.score <= 100));
    }

    #[test]
    fn test_empty_index() {
        let (index, topology) = setup(Vec::new());
        let postures = PostureScorer::new(&index, &topology).score_all();
        assert!(postures.is_empty());
        assert_eq!(aggregate(&postures).overall_score, 100.0);
    }
}
