//! Audit report generation.
//!
//! Pure function of the evidence log: the report is rebuilt from JSONL text
//! alone, contains no wall-clock data, and orders everything by stable keys,
//! so regenerating from an unchanged log is byte-identical.
//!
//! # Sections
//!
//! 1. Header with rollup verdict and record counts
//! 2. Per-category PASS/FAIL/UNKNOWN table
//! 3. Digest stability per check (distinct fragments across runs)
//! 4. Blockers & limitations (every UNKNOWN)
//! 5. Residual risk matrix
//! 6. Per-check detail, one entry per record
//!
//! Malformed lines are counted and skipped; they never abort generation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{CheckStatus, EvidenceRecord};
use crate::stable_json::stable_to_string;
use crate::{HarnessError, Result};

const UNCATEGORIZED: &str = "(uncategorized)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pass: usize,
    pub fail: usize,
    pub unknown: usize,
}

impl StatusCounts {
    fn add(&mut self, status: CheckStatus) {
        match status {
            CheckStatus::Pass => self.pass += 1,
            CheckStatus::Fail => self.fail += 1,
            CheckStatus::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.unknown
    }
}

/// Residual risk for a check's worst observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Critical,
    Medium,
    None,
}

impl RiskLevel {
    pub const fn for_status(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Fail => Self::Critical,
            CheckStatus::Unknown => Self::Medium,
            CheckStatus::Pass => Self::None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Medium => "MEDIUM",
            Self::None => "NONE",
        }
    }
}

/// Records of one check, ordered by run index then log order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSection {
    pub category: String,
    pub check_id: String,
    /// First non-empty title among the records.
    #[serde(default)]
    pub title: String,
    pub records: Vec<EvidenceRecord>,
}

impl CheckSection {
    /// FAIL over UNKNOWN over PASS.
    pub fn worst_status(&self) -> CheckStatus {
        let statuses: BTreeSet<CheckStatus> = self.records.iter().map(|r| r.status).collect();
        if statuses.contains(&CheckStatus::Fail) {
            CheckStatus::Fail
        } else if statuses.contains(&CheckStatus::Unknown) {
            CheckStatus::Unknown
        } else {
            CheckStatus::Pass
        }
    }

    pub fn distinct_fragments(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.digest_fragment.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub rollup: CheckStatus,
    pub total_records: usize,
    pub skipped_lines: usize,
    /// Runs in log order; a new run starts whenever the run index changes,
    /// so sessions appended to the same log are counted separately.
    pub run_count: usize,
    pub totals: StatusCounts,
    pub by_category: BTreeMap<String, StatusCounts>,
    pub checks: Vec<CheckSection>,
}

impl VerificationReport {
    /// Parse JSONL text; blank lines are ignored, malformed lines counted.
    pub fn from_log_text(text: &str) -> Self {
        Self::from_log_bytes(text.as_bytes())
    }

    /// Parse raw JSONL bytes. Lines that are not UTF-8 or not a record are
    /// counted in `skipped_lines`.
    pub fn from_log_bytes(bytes: &[u8]) -> Self {
        let mut records = Vec::new();
        let mut skipped_lines = 0;
        for (index, line) in bytes.split(|b| *b == b'\n').enumerate() {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(record) => records.push(record),
                Err(error) => {
                    skipped_lines += 1;
                    tracing::debug!(line = index + 1, %error, "skipping malformed evidence line");
                }
            }
        }
        Self::from_records(records, skipped_lines)
    }

    /// # Errors
    ///
    /// [`HarnessError::EvidenceRead`] if the log cannot be read.
    pub fn from_path(log_path: &Path) -> Result<Self> {
        let bytes = fs::read(log_path).map_err(|source| HarnessError::EvidenceRead {
            path: log_path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_log_bytes(&bytes))
    }

    pub fn from_records(records: Vec<EvidenceRecord>, skipped_lines: usize) -> Self {
        let mut totals = StatusCounts::default();
        let mut by_category: BTreeMap<String, StatusCounts> = BTreeMap::new();
        let mut grouped: BTreeMap<(String, String), Vec<EvidenceRecord>> = BTreeMap::new();
        let mut run_count = 0;
        let mut previous_run = None;

        let total_records = records.len();
        for record in records {
            if previous_run != Some(record.run_index) {
                run_count += 1;
                previous_run = Some(record.run_index);
            }
            let category = if record.category.is_empty() {
                UNCATEGORIZED.to_owned()
            } else {
                record.category.clone()
            };
            totals.add(record.status);
            by_category.entry(category.clone()).or_default().add(record.status);
            grouped
                .entry((category, record.check_id.clone()))
                .or_default()
                .push(record);
        }

        let checks = grouped
            .into_iter()
            .map(|((category, check_id), mut records)| {
                // Stable sort keeps log order for equal run indices.
                records.sort_by_key(|r| r.run_index);
                let title = records
                    .iter()
                    .map(|r| r.title.as_str())
                    .find(|t| !t.is_empty())
                    .unwrap_or_default()
                    .to_owned();
                CheckSection {
                    category,
                    check_id,
                    title,
                    records,
                }
            })
            .collect();

        Self {
            rollup: rollup(&totals),
            total_records,
            skipped_lines,
            run_count,
            totals,
            by_category,
            checks,
        }
    }

    pub fn blockers(&self) -> Vec<&CheckSection> {
        self.checks
            .iter()
            .filter(|c| c.records.iter().any(|r| r.status == CheckStatus::Unknown))
            .collect()
    }

    /// Render the markdown document.
    #[must_use]
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Verification Report");
        let _ = writeln!(out);
        let _ = writeln!(out, "**Rollup**: {}", self.rollup);
        let _ = writeln!(
            out,
            "**Records**: {} | **Runs**: {} | **Checks**: {} | **Skipped lines**: {}",
            self.total_records,
            self.run_count,
            self.checks.len(),
            self.skipped_lines,
        );
        let _ = writeln!(out);

        self.render_category_table(&mut out);
        self.render_stability(&mut out);
        self.render_blockers(&mut out);
        self.render_risk(&mut out);
        self.render_details(&mut out);
        out
    }

    fn render_category_table(&self, out: &mut String) {
        let _ = writeln!(out, "## Summary by Category");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Category | PASS | FAIL | UNKNOWN | Total |");
        let _ = writeln!(out, "|----------|------|------|---------|-------|");
        for (category, counts) in &self.by_category {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(category),
                counts.pass,
                counts.fail,
                counts.unknown,
                counts.total(),
            );
        }
        let _ = writeln!(
            out,
            "| **Total** | {} | {} | {} | {} |",
            self.totals.pass,
            self.totals.fail,
            self.totals.unknown,
            self.totals.total(),
        );
        let _ = writeln!(out);
    }

    fn render_stability(&self, out: &mut String) {
        let _ = writeln!(out, "## Digest Stability");
        let _ = writeln!(out);
        if self.checks.is_empty() {
            let _ = writeln!(out, "No records.");
            let _ = writeln!(out);
            return;
        }
        let _ = writeln!(out, "| Check | Records | Distinct fragments | Stable |");
        let _ = writeln!(out, "|-------|---------|--------------------|--------|");
        for check in &self.checks {
            let distinct = check.distinct_fragments();
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                cell(&check.check_id),
                check.records.len(),
                distinct,
                if distinct == 1 { "yes" } else { "no" },
            );
        }
        let _ = writeln!(out);
    }

    fn render_blockers(&self, out: &mut String) {
        let _ = writeln!(out, "## Blockers & Limitations");
        let _ = writeln!(out);
        let blockers = self.blockers();
        if blockers.is_empty() {
            let _ = writeln!(out, "None.");
        }
        for check in blockers {
            let reasons: BTreeSet<String> = check
                .records
                .iter()
                .filter(|r| r.status == CheckStatus::Unknown)
                .map(|r| match &r.error {
                    Some(error) => format!("{} ({})", one_line(&r.reason), one_line(error)),
                    None => one_line(&r.reason),
                })
                .collect();
            for reason in reasons {
                let _ = writeln!(out, "- `{}` [{}]: {reason}", check.check_id, check.category);
            }
        }
        let _ = writeln!(out);
    }

    fn render_risk(&self, out: &mut String) {
        let _ = writeln!(out, "## Residual Risk");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Check | Category | Worst status | Risk |");
        let _ = writeln!(out, "|-------|----------|--------------|------|");
        let mut rows: Vec<(RiskLevel, &CheckSection)> = self
            .checks
            .iter()
            .map(|c| (RiskLevel::for_status(c.worst_status()), c))
            .collect();
        rows.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.category.cmp(&b.1.category))
                .then_with(|| a.1.check_id.cmp(&b.1.check_id))
        });
        for (risk, check) in rows {
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                cell(&check.check_id),
                cell(&check.category),
                check.worst_status(),
                risk.as_str(),
            );
        }
        let _ = writeln!(out);
    }

    fn render_details(&self, out: &mut String) {
        let _ = writeln!(out, "## Check Details");
        let _ = writeln!(out);
        let no_normalization: [&str; 0] = [];
        for check in &self.checks {
            if check.title.is_empty() {
                let _ = writeln!(out, "### `{}` ({})", check.check_id, check.category);
            } else {
                let _ = writeln!(
                    out,
                    "### `{}`: {} ({})",
                    check.check_id,
                    one_line(&check.title),
                    check.category
                );
            }
            let _ = writeln!(out);
            for record in &check.records {
                let _ = writeln!(
                    out,
                    "- Run {}: **{}** {} (digest `{}`)",
                    record.run_index,
                    record.status,
                    one_line(&record.reason),
                    record.digest_fragment,
                );
                if !record.metrics.is_empty() {
                    let metrics = stable_to_string(&record.metrics, &no_normalization)
                        .unwrap_or_else(|_| "<unrenderable>".to_owned());
                    let _ = writeln!(out, "  - metrics: `{metrics}`");
                }
                if !record.evidence_refs.is_empty() {
                    let refs: Vec<String> =
                        record.evidence_refs.iter().map(ToString::to_string).collect();
                    let _ = writeln!(out, "  - evidence: {}", refs.join(", "));
                }
                if let Some(error) = &record.error {
                    let _ = writeln!(out, "  - error: {}", one_line(error));
                }
            }
            let _ = writeln!(out);
        }
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` on serialization failure.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn parse_line(line: &[u8]) -> std::result::Result<EvidenceRecord, String> {
    let text = std::str::from_utf8(line).map_err(|e| e.to_string())?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// FAIL if anything failed; PASS only for a non-empty all-PASS log.
fn rollup(totals: &StatusCounts) -> CheckStatus {
    if totals.fail > 0 {
        CheckStatus::Fail
    } else if totals.pass > 0 && totals.unknown == 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Unknown
    }
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cell(s: &str) -> String {
    one_line(s).replace('|', "\\|")
}

/// Read `log_path` and render the report.
///
/// # Errors
///
/// [`HarnessError::EvidenceRead`] if the log cannot be read.
pub fn generate(log_path: &Path) -> Result<String> {
    Ok(VerificationReport::from_path(log_path)?.render_markdown())
}

/// [`generate`] and write the result to `out_path`.
///
/// # Errors
///
/// Read errors, or [`HarnessError::ArtifactWrite`] on write failure.
pub fn write_report(log_path: &Path, out_path: &Path) -> Result<VerificationReport> {
    let report = VerificationReport::from_path(log_path)?;
    let to_err = |source| HarnessError::ArtifactWrite {
        path: out_path.to_path_buf(),
        source,
    };
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(to_err)?;
        }
    }
    fs::write(out_path, report.render_markdown()).map_err(to_err)?;
    Ok(report)
}
