//! Run artifacts written next to the evidence log.
//!
//! - `run_digests.txt`: one `Run <n>: <digest>` line per run, `n` 1-based
//! - `divergence.json`: written only when runs disagree; the first run, the
//!   first diverging run and a per-check comparison

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::digest::{Digest, check_digest};
use crate::divergence::DivergenceReport;
use crate::model::{CheckResult, RunRecord};
use crate::stable_json::stable_to_string_pretty;
use crate::{HarnessError, Result};

pub const DIVERGENCE_SCHEMA_VERSION: &str = "1.0.0";

// ── Digest display file ────────────────────────────────────────────────

pub fn render_digest_lines(digests: &[Digest]) -> String {
    digests
        .iter()
        .enumerate()
        .map(|(i, d)| format!("Run {}: {d}\n", i + 1))
        .collect()
}

/// # Errors
///
/// Returns [`HarnessError::ArtifactWrite`] on any filesystem failure.
pub fn write_digest_file(path: &Path, digests: &[Digest]) -> Result<()> {
    write_artifact(path, &render_digest_lines(digests))
}

// ── Divergence artifact ────────────────────────────────────────────────

/// One check whose digest differs between the baseline and diverging run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDelta {
    pub check_id: String,
    /// `None` when the check is absent from that run.
    pub baseline_fragment: Option<String>,
    pub diverging_fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivergenceArtifact {
    pub schema_version: String,
    pub seed: u64,
    pub frozen_time_ms: u64,
    pub report: DivergenceReport,
    pub changed_checks: Vec<CheckDelta>,
    pub baseline: RunRecord,
    pub diverging: RunRecord,
}

impl DivergenceArtifact {
    /// # Errors
    ///
    /// Propagates digest serialization errors.
    pub fn build<S: AsRef<str>>(
        seed: u64,
        frozen_time_ms: u64,
        report: &DivergenceReport,
        baseline: &RunRecord,
        diverging: &RunRecord,
        normalize_fields: &[S],
    ) -> Result<Self> {
        Ok(Self {
            schema_version: DIVERGENCE_SCHEMA_VERSION.to_owned(),
            seed,
            frozen_time_ms,
            report: report.clone(),
            changed_checks: changed_checks(&baseline.checks, &diverging.checks, normalize_fields)?,
            baseline: baseline.clone(),
            diverging: diverging.clone(),
        })
    }

    /// # Errors
    ///
    /// Returns [`HarnessError::ArtifactWrite`] or a serialization error.
    pub fn write(&self, path: &Path) -> Result<()> {
        let no_normalization: [&str; 0] = [];
        let mut text = stable_to_string_pretty(self, &no_normalization)?;
        text.push('\n');
        write_artifact(path, &text)
    }
}

fn changed_checks<S: AsRef<str>>(
    baseline: &[CheckResult],
    diverging: &[CheckResult],
    normalize_fields: &[S],
) -> Result<Vec<CheckDelta>> {
    let fragments = |checks: &[CheckResult]| -> Result<std::collections::BTreeMap<String, String>> {
        checks
            .iter()
            .map(|c| {
                let fragment = check_digest(c, normalize_fields)?.fragment().to_owned();
                Ok::<_, HarnessError>((c.check_id.clone(), fragment))
            })
            .collect()
    };
    let left = fragments(baseline)?;
    let right = fragments(diverging)?;

    let mut ids: Vec<&String> = left.keys().chain(right.keys()).collect();
    ids.sort();
    ids.dedup();

    Ok(ids
        .into_iter()
        .filter_map(|id| {
            let a = left.get(id);
            let b = right.get(id);
            (a != b).then(|| CheckDelta {
                check_id: id.clone(),
                baseline_fragment: a.cloned(),
                diverging_fragment: b.cloned(),
            })
        })
        .collect())
}

fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    let to_err = |source| HarnessError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(to_err)?;
        }
    }
    fs::write(path, contents).map_err(to_err)
}
