//! Harness configuration.
//!
//! # Environment Variables
//!
//! [`HarnessConfig::from_env`] layers these over the defaults:
//! - `FTV_FROZEN_TIME_MS`: frozen instant, milliseconds since the Unix epoch
//! - `FTV_SEED`: PRNG seed (u64)
//! - `FTV_RUNS`: number of runs (at least [`MIN_RUNS`])
//! - `FTV_AUDIT_DIR`: directory for evidence, digests and reports
//! - `RUST_LOG`: tracing filter directives (see [`crate::logging`])

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::network_trap::AllowRule;
use crate::{HarnessError, Result};

/// 2025-12-22T10:00:00Z.
pub const DEFAULT_FROZEN_TIME_MS: u64 = 1_766_397_600_000;

pub const DEFAULT_SEED: u64 = 42;

/// Fewer runs than this cannot demonstrate determinism.
pub const MIN_RUNS: usize = 10;

/// Field names whose values are run-variant and always normalized.
pub const DEFAULT_NORMALIZE_FIELDS: [&str; 3] = ["timestamp", "generatedAt", "executedAt"];

pub const EVIDENCE_FILE_NAME: &str = "verification_results.jsonl";
pub const DIGEST_FILE_NAME: &str = "run_digests.txt";
pub const DIVERGENCE_FILE_NAME: &str = "divergence.json";
pub const REPORT_FILE_NAME: &str = "VERIFICATION_REPORT.md";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub frozen_time_ms: u64,
    pub seed: u64,
    pub runs: usize,
    pub normalize_fields: Vec<String>,
    pub audit_dir: PathBuf,
    pub allow_rules: Vec<AllowRule>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let mut allow_rules = vec![AllowRule::RelativePath];
        allow_rules.extend(AllowRule::loopback_defaults());
        Self {
            frozen_time_ms: DEFAULT_FROZEN_TIME_MS,
            seed: DEFAULT_SEED,
            runs: MIN_RUNS,
            normalize_fields: DEFAULT_NORMALIZE_FIELDS
                .iter()
                .map(|f| (*f).to_owned())
                .collect(),
            audit_dir: PathBuf::from("audit_artifacts"),
            allow_rules,
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `FTV_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] when a variable is set but
    /// does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] on unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(raw) = lookup("FTV_FROZEN_TIME_MS") {
            cfg.frozen_time_ms = parse_var("FTV_FROZEN_TIME_MS", &raw)?;
        }
        if let Some(raw) = lookup("FTV_SEED") {
            cfg.seed = parse_var("FTV_SEED", &raw)?;
        }
        if let Some(raw) = lookup("FTV_RUNS") {
            cfg.runs = parse_var("FTV_RUNS", &raw)?;
        }
        if let Some(raw) = lookup("FTV_AUDIT_DIR") {
            if raw.trim().is_empty() {
                return Err(HarnessError::invalid_config("FTV_AUDIT_DIR is empty"));
            }
            cfg.audit_dir = PathBuf::from(raw);
        }
        Ok(cfg)
    }

    /// Validate internal consistency.
    ///
    /// Returns a list of violations (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.runs < MIN_RUNS {
            errors.push(format!("runs must be >= {MIN_RUNS}, got {}", self.runs));
        }
        for field in &self.normalize_fields {
            if field.is_empty() {
                errors.push("normalize field names must be non-empty".to_owned());
            }
        }
        errors
    }

    /// [`Self::validate`] folded into a single error.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] listing every violation.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::invalid_config(errors.join("; ")))
        }
    }

    pub fn evidence_path(&self) -> PathBuf {
        self.audit_dir.join(EVIDENCE_FILE_NAME)
    }

    pub fn digest_path(&self) -> PathBuf {
        self.audit_dir.join(DIGEST_FILE_NAME)
    }

    pub fn divergence_path(&self) -> PathBuf {
        self.audit_dir.join(DIVERGENCE_FILE_NAME)
    }

    pub fn report_path(&self) -> PathBuf {
        self.audit_dir.join(REPORT_FILE_NAME)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| HarnessError::invalid_config(format!("invalid {key} value: {raw}")))
}
