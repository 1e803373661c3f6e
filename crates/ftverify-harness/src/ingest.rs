//! Ingest read path.
//!
//! The harness does not own event storage; it consumes a read path that,
//! given an organization key and a `yyyy-mm-dd` date, reports how many
//! events were ingested that day, the most recent event ids and which
//! counter shards were touched.
//!
//! [`FailureSpec`] scripts the upstream failures a read path can hit
//! (rate limiting, server errors, permission errors, storage write
//! failures) so their classification can be exercised under frozen time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prng::SeededRng;
use crate::{HarnessError, Result};

/// Upper bound on `recent_event_ids`.
pub const MAX_RECENT_EVENTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSnapshot {
    pub event_count: u64,
    /// Newest first, at most [`MAX_RECENT_EVENTS`].
    pub recent_event_ids: Vec<String>,
    /// `shard_<n>`, sorted.
    pub shard_ids: Vec<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadPathError {
    /// Storage cannot be reached from this environment.
    #[error("read path unavailable: {0}")]
    Unavailable(String),
    /// Storage answered, but with something invalid.
    #[error("read path failed: {0}")]
    Failed(String),
}

pub trait IngestReadPath {
    /// # Errors
    ///
    /// [`ReadPathError::Unavailable`] when storage cannot be queried,
    /// [`ReadPathError::Failed`] when it returns invalid data.
    fn snapshot(
        &self,
        org_key: &str,
        date: &str,
    ) -> std::result::Result<IngestSnapshot, ReadPathError>;

    /// Per-shard event counters for one org/day, keyed by
    /// [`shard_counter_key`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::snapshot`].
    fn shard_counters(
        &self,
        org_key: &str,
        date: &str,
    ) -> std::result::Result<BTreeMap<String, u64>, ReadPathError>;
}

/// Storage key of one per-day counter shard.
pub fn shard_counter_key(org_key: &str, date: &str, shard: u32) -> String {
    format!("rawshard_counter/{org_key}/{date}/shard_{shard}")
}

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

/// Upper bound (exclusive) on delays drawn by [`FailureSpec::seeded`].
pub const MAX_INJECTED_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimit,
    ServerError,
    PermissionDenied,
    StorageWriteFail,
}

impl FailureKind {
    pub const ALL: [Self; 4] = [
        Self::RateLimit,
        Self::ServerError,
        Self::PermissionDenied,
        Self::StorageWriteFail,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::PermissionDenied => "permission_denied",
            Self::StorageWriteFail => "storage_write_fail",
        }
    }

    /// HTTP status the upstream answers with, if any.
    pub const fn status_code(self) -> Option<u16> {
        match self {
            Self::RateLimit => Some(429),
            Self::ServerError => Some(500),
            Self::PermissionDenied => Some(403),
            Self::StorageWriteFail => None,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::RateLimit => "Too Many Requests",
            Self::ServerError => "Internal Server Error",
            Self::PermissionDenied => "Forbidden",
            Self::StorageWriteFail => "Storage write failed",
        }
    }

    /// Rate limiting and server errors say nothing about the system under
    /// verification and map to [`ReadPathError::Unavailable`]; the others
    /// are real failures.
    pub fn to_error(self) -> ReadPathError {
        let detail = match self.status_code() {
            Some(code) => format!("{} {code} {}", self.as_str(), self.message()),
            None => format!("{} {}", self.as_str(), self.message()),
        };
        match self {
            Self::RateLimit | Self::ServerError => ReadPathError::Unavailable(detail),
            Self::PermissionDenied | Self::StorageWriteFail => ReadPathError::Failed(detail),
        }
    }

    fn from_draw(draw: u64) -> Self {
        match draw {
            0 => Self::RateLimit,
            1 => Self::ServerError,
            2 => Self::PermissionDenied,
            _ => Self::StorageWriteFail,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scripted failure: advance frozen time by `delay_ms`, then fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSpec {
    pub scenario: String,
    pub kind: FailureKind,
    #[serde(default)]
    pub delay_ms: u64,
}

impl FailureSpec {
    pub fn new(scenario: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            scenario: scenario.into(),
            kind,
            delay_ms: 0,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Kind and delay drawn from `rng`.
    pub fn seeded(scenario: impl Into<String>, rng: &mut SeededRng) -> Self {
        let kind = FailureKind::from_draw(rng.next_int(4));
        Self::new(scenario, kind).with_delay(rng.next_int(MAX_INJECTED_DELAY_MS))
    }
}

// ---------------------------------------------------------------------------
// Fixture implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureEvent {
    pub org_key: String,
    pub date: String,
    pub event_id: String,
    pub shard: u32,
}

/// In-memory read path backed by an ordered event list (oldest first).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureReadPath {
    #[serde(default)]
    events: Vec<FixtureEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unavailable: Option<String>,
}

impl FixtureReadPath {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A read path that always reports [`ReadPathError::Unavailable`].
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            unavailable: Some(reason.into()),
        }
    }

    /// Load a fixture written as JSON (`{"events": [...]}`).
    ///
    /// # Errors
    ///
    /// [`HarnessError::FixtureRead`] if the file is missing or malformed.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::fixture(path, e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| HarnessError::fixture(path, e.to_string()))
    }

    pub fn record(
        &mut self,
        org_key: impl Into<String>,
        date: impl Into<String>,
        event_id: impl Into<String>,
        shard: u32,
    ) {
        self.events.push(FixtureEvent {
            org_key: org_key.into(),
            date: date.into(),
            event_id: event_id.into(),
            shard,
        });
    }

    fn matching<'a>(
        &'a self,
        org_key: &'a str,
        date: &'a str,
    ) -> impl Iterator<Item = &'a FixtureEvent> + 'a {
        self.events
            .iter()
            .filter(move |e| e.org_key == org_key && e.date == date)
    }

    fn ensure_available(&self) -> std::result::Result<(), ReadPathError> {
        match &self.unavailable {
            Some(reason) => Err(ReadPathError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

impl IngestReadPath for FixtureReadPath {
    fn snapshot(
        &self,
        org_key: &str,
        date: &str,
    ) -> std::result::Result<IngestSnapshot, ReadPathError> {
        self.ensure_available()?;
        let events: Vec<&FixtureEvent> = self.matching(org_key, date).collect();
        let recent_event_ids = events
            .iter()
            .rev()
            .take(MAX_RECENT_EVENTS)
            .map(|e| e.event_id.clone())
            .collect();
        let shards: BTreeSet<u32> = events.iter().map(|e| e.shard).collect();
        Ok(IngestSnapshot {
            event_count: events.len() as u64,
            recent_event_ids,
            shard_ids: shards.into_iter().map(|s| format!("shard_{s}")).collect(),
        })
    }

    fn shard_counters(
        &self,
        org_key: &str,
        date: &str,
    ) -> std::result::Result<BTreeMap<String, u64>, ReadPathError> {
        self.ensure_available()?;
        let mut counters = BTreeMap::new();
        for event in self.matching(org_key, date) {
            *counters
                .entry(shard_counter_key(org_key, date, event.shard))
                .or_insert(0) += 1;
        }
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn fixture() -> FixtureReadPath {
        let mut fx = FixtureReadPath::new();
        for i in 0..8_u32 {
            fx.record("org-a", "2025-12-22", format!("evt-{i}"), i % 3);
        }
        fx.record("org-a", "2025-12-21", "old", 9);
        fx.record("org-b", "2025-12-22", "other", 0);
        fx
    }

    #[test]
    fn snapshot_bounds_recent_ids_newest_first() {
        let snap = fixture().snapshot("org-a", "2025-12-22").unwrap();
        assert_eq!(snap.event_count, 8);
        assert_eq!(
            snap.recent_event_ids,
            vec!["evt-7", "evt-6", "evt-5", "evt-4", "evt-3"]
        );
        assert_eq!(snap.shard_ids, vec!["shard_0", "shard_1", "shard_2"]);
    }

    #[test]
    fn empty_day_is_empty_snapshot() {
        let snap = fixture().snapshot("org-c", "2025-12-22").unwrap();
        assert_eq!(snap.event_count, 0);
        assert!(snap.recent_event_ids.is_empty());
        assert!(snap.shard_ids.is_empty());
    }

    #[test]
    fn shard_counter_keys() {
        let counters = fixture().shard_counters("org-a", "2025-12-22").unwrap();
        assert_eq!(counters["rawshard_counter/org-a/2025-12-22/shard_0"], 3);
        assert_eq!(counters.values().sum::<u64>(), 8);
    }

    #[test]
    fn unavailable_read_path() {
        let fx = FixtureReadPath::unavailable("no storage");
        let err = fx.snapshot("org-a", "2025-12-22").unwrap_err();
        assert_eq!(err, ReadPathError::Unavailable("no storage".to_owned()));
        assert!(fx.shard_counters("org-a", "2025-12-22").is_err());
    }

    #[test]
    fn failure_kinds_classify() {
        let classes: Vec<(FailureKind, bool)> = FailureKind::ALL
            .iter()
            .map(|k| (*k, matches!(k.to_error(), ReadPathError::Unavailable(_))))
            .collect();
        assert_eq!(
            classes,
            vec![
                (FailureKind::RateLimit, true),
                (FailureKind::ServerError, true),
                (FailureKind::PermissionDenied, false),
                (FailureKind::StorageWriteFail, false),
            ]
        );
        assert_eq!(
            FailureKind::RateLimit.to_error().to_string(),
            "read path unavailable: rate_limit 429 Too Many Requests"
        );
        assert_eq!(
            FailureKind::StorageWriteFail.to_error(),
            ReadPathError::Failed("storage_write_fail Storage write failed".to_owned())
        );
    }

    #[test]
    fn seeded_failure_specs_replay() {
        let a = FailureSpec::seeded("drill", &mut SeededRng::new(7));
        let b = FailureSpec::seeded("drill", &mut SeededRng::new(7));
        assert_eq!(a, b);
        assert!(a.delay_ms < MAX_INJECTED_DELAY_MS);

        let mut rng = SeededRng::new(42);
        let kinds: BTreeSet<FailureKind> = (0..64)
            .map(|i| FailureSpec::seeded(format!("s{i}"), &mut rng).kind)
            .collect();
        assert_eq!(kinds.len(), FailureKind::ALL.len());
    }

    #[test]
    fn failure_spec_wire_shape() {
        let spec: FailureSpec =
            serde_json::from_str(r#"{"scenario":"s","kind":"permission_denied"}"#).unwrap();
        assert_eq!(spec.kind, FailureKind::PermissionDenied);
        assert_eq!(spec.delay_ms, 0);
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ingest.json");
        std::fs::write(
            &path,
            r#"{"events":[{"orgKey":"o","date":"2025-12-22","eventId":"e1","shard":4}]}"#,
        )
        .unwrap();
        let fx = FixtureReadPath::from_json_file(&path).unwrap();
        assert_eq!(fx.snapshot("o", "2025-12-22").unwrap().shard_ids, vec!["shard_4"]);

        let err = FixtureReadPath::from_json_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, HarnessError::FixtureRead { .. }));
    }
}
