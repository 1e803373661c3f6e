//! Cross-run digest comparison.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivergenceReport {
    pub identical: bool,
    /// First run whose digest differs from run 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_divergence_index: Option<usize>,
    pub distinct_digests: usize,
    pub summary: String,
}

/// Compare an ordered digest sequence against its first element.
pub fn detect_divergence(digests: &[Digest]) -> DivergenceReport {
    let Some(first) = digests.first() else {
        return DivergenceReport {
            identical: true,
            first_divergence_index: None,
            distinct_digests: 0,
            summary: "No runs recorded".to_owned(),
        };
    };

    let distinct = digests.iter().collect::<BTreeSet<_>>().len();
    match digests.iter().position(|d| d != first) {
        None => DivergenceReport {
            identical: true,
            first_divergence_index: None,
            distinct_digests: 1,
            summary: format!(
                "All {} runs produced identical digest {}",
                digests.len(),
                first.fragment()
            ),
        },
        Some(index) => DivergenceReport {
            identical: false,
            first_divergence_index: Some(index),
            distinct_digests: distinct,
            summary: format!(
                "Divergence at run {index}: {distinct} distinct digests across {} runs",
                digests.len()
            ),
        },
    }
}
