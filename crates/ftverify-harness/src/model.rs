//! Check results and evidence records.
//!
//! Status is tri-state everywhere. `UNKNOWN` means the check could not
//! establish an answer and is never folded into `PASS`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::Digest;

/// Ordered metric map. Values must be run-invariant unless their key is in
/// the normalize list.
pub type Metrics = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Unknown,
}

impl CheckStatus {
    pub const ALL: [Self; 3] = [Self::Pass, Self::Fail, Self::Unknown];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer to supporting evidence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub file: String,
    /// Line range such as `"10-42"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<String>,
}

impl EvidenceRef {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            lines: None,
        }
    }

    pub fn lines(file: impl Into<String>, lines: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            lines: Some(lines.into()),
        }
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lines {
            Some(lines) => write!(f, "{}:{lines}", self.file),
            None => f.write_str(&self.file),
        }
    }
}

/// What a check function returns.
///
/// The orchestrator attaches the check id, category and error text.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub reason: String,
    pub metrics: Metrics,
    pub evidence_refs: Vec<EvidenceRef>,
}

impl CheckOutcome {
    fn with_status(status: CheckStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            metrics: Metrics::new(),
            evidence_refs: Vec::new(),
        }
    }

    #[must_use]
    pub fn pass(reason: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Pass, reason)
    }

    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Fail, reason)
    }

    #[must_use]
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Unknown, reason)
    }

    /// PASS when `ok`, otherwise FAIL; each with its own reason.
    #[must_use]
    pub fn verdict(
        ok: bool,
        pass_reason: impl Into<String>,
        fail_reason: impl Into<String>,
    ) -> Self {
        if ok {
            Self::pass(pass_reason)
        } else {
            Self::fail(fail_reason)
        }
    }

    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: EvidenceRef) -> Self {
        self.evidence_refs.push(evidence);
        self
    }
}

/// Outcome of one check in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub check_id: String,
    pub category: String,
    /// Human-readable title from the registry.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub status: CheckStatus,
    pub reason: String,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
    /// Set only when the check itself errored or panicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn from_outcome(
        check_id: impl Into<String>,
        category: impl Into<String>,
        outcome: CheckOutcome,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            category: category.into(),
            title: String::new(),
            status: outcome.status,
            reason: outcome.reason,
            metrics: outcome.metrics,
            evidence_refs: outcome.evidence_refs,
            error: None,
        }
    }

    /// Result for a check that errored instead of returning an outcome.
    pub fn errored(
        check_id: impl Into<String>,
        category: impl Into<String>,
        status: CheckStatus,
        reason: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            category: category.into(),
            title: String::new(),
            status,
            reason: reason.into(),
            metrics: Metrics::new(),
            evidence_refs: Vec::new(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// One iteration over the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_index: usize,
    /// Wall time at run start. Display only; never digested.
    pub timestamp: String,
    /// Registration order.
    pub checks: Vec<CheckResult>,
    pub digest: Digest,
}

/// One persisted line of the evidence log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRecord {
    pub run_index: usize,
    #[serde(default)]
    pub category: String,
    pub check_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub status: CheckStatus,
    pub reason: String,
    #[serde(default)]
    pub metrics: Metrics,
    /// Display prefix of the check's own digest.
    pub digest_fragment: String,
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvidenceRecord {
    pub fn from_result(run_index: usize, result: &CheckResult, check_digest: &Digest) -> Self {
        Self {
            run_index,
            category: result.category.clone(),
            check_id: result.check_id.clone(),
            title: result.title.clone(),
            status: result.status,
            reason: result.reason.clone(),
            metrics: result.metrics.clone(),
            digest_fragment: check_digest.fragment().to_owned(),
            evidence_refs: result.evidence_refs.clone(),
            error: result.error.clone(),
        }
    }
}
