//! Severity-weighted scoring.
//!
//! Formula: `score = 100 - min(100, Σ weight(finding.severity))`.
//! Grade is the highest finding severity; compliance follows the grade.

use cloudsight_core::{Compliance, Severity, SeverityWeights};

use crate::types::{Category, Finding};

/// Score in `[0, 100]`. No findings scores 100.
pub fn compute_score(findings: &[Finding], weights: &SeverityWeights) -> u32 {
    let deduction: u32 = findings
        .iter()
        .map(|f| weights.weight(f.severity))
        .fold(0u32, u32::saturating_add);
    100 - deduction.min(100)
}

/// Highest severity among the findings, `Low` when there are none.
pub fn grade(findings: &[Finding]) -> Severity {
    findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(Severity::Low)
}

pub fn compliance(grade: Severity) -> Compliance {
    match grade {
        Severity::Critical | Severity::High => Compliance::NonCompliant,
        Severity::Medium => Compliance::Warning,
        Severity::Low | Severity::Info => Compliance::Compliant,
    }
}

/// Encrypted unless an encryption finding of medium severity or worse fired.
pub fn is_encrypted(findings: &[Finding]) -> bool {
    !findings
        .iter()
        .any(|f| f.category == Category::Encryption && f.severity >= Severity::Medium)
}
