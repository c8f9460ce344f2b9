//! Summary statistics over a posture map.

use std::collections::BTreeMap;

use cloudsight_core::{Compliance, ResourceKey, Severity};

use crate::types::{Posture, Summary};

/// Every compliance state and severity appears in the result, zero when unseen.
pub fn aggregate(postures: &BTreeMap<ResourceKey, Posture>) -> Summary {
    let mut compliance_counts: BTreeMap<Compliance, usize> =
        Compliance::ALL.iter().map(|c| (*c, 0)).collect();
    let mut severity_counts: BTreeMap<Severity, usize> = Severity::ALL.iter().map(|s| (*s, 0)).collect();

    for posture in postures.values() {
        *compliance_counts.entry(posture.compliance).or_default() += 1;
        for finding in &posture.findings {
            *severity_counts.entry(finding.severity).or_default() += 1;
        }
    }

    let overall_score = if postures.is_empty() {
        100.0
    } else {
        postures.values().map(|p| f64::from(p.score)).sum::<f64>() / postures.len() as f64
    };

    Summary {
        total_resources: postures.len(),
        compliance_counts,
        severity_counts,
        overall_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Finding};

    fn posture(key: &str, score: u32, compliance: Compliance, severities: &[Severity]) -> (ResourceKey, Posture) {
        let findings = severities
            .iter()
            .map(|s| Finding {
                rule_id: "r".into(),
                severity: *s,
                category: Category::Configuration,
                resource_type: "t".into(),
                attribute_path: "a".into(),
                current_value: None,
                expected_value: None,
                title: String::new(),
                remediation: String::new(),
            })
            .collect();
        (
            ResourceKey::from(key),
            Posture {
                resource_id: ResourceKey::from(key),
                resource_type: "t".into(),
                findings,
                is_encrypted: true,
                has_public_endpoint: false,
                has_nsg: false,
                score,
                grade: Severity::Low,
                compliance,
            },
        )
    }

    #[test]
    fn test_empty_map() {
        let summary = aggregate(&BTreeMap::new());
        assert_eq!(summary.total_resources, 0);
        assert_eq!(summary.overall_score, 100.0);
        assert_eq!(summary.compliance_counts.len(), 3);
        assert!(summary.severity_counts.values().all(|c| *c == 0));
    }

    #[test]
    fn test_counts_and_mean() {
        let map: BTreeMap<_, _> = [
            posture("a", 90, Compliance::Warning, &[Severity::Medium]),
            posture("b", 100, Compliance::Compliant, &[]),
            posture("c", 65, Compliance::NonCompliant, &[Severity::High, Severity::Medium]),
        ]
        .into_iter()
        .collect();

        let summary = aggregate(&map);
        assert_eq!(summary.total_resources, 3);
        assert_eq!(summary.compliance_counts[&Compliance::Compliant], 1);
        assert_eq!(summary.compliance_counts[&Compliance::Warning], 1);
        assert_eq!(summary.compliance_counts[&Compliance::NonCompliant], 1);
        assert_eq!(summary.severity_counts[&Severity::Medium], 2);
        assert_eq!(summary.severity_counts[&Severity::High], 1);
        assert_eq!(summary.severity_counts[&Severity::Critical], 0);
        assert!((summary.overall_score - 85.0).abs() < 1e-9);
    }
}
