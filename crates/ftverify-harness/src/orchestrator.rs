//! N-run orchestration.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Running(i) -> Collecting(i) -> Idle     (repeated N times)
//! Idle -> Comparing -> Done
//! ```
//!
//! - **Running**: a fresh [`HarnessContext`] is armed (frozen clock, PRNG
//!   reseeded, trap armed with an empty call list) and every registered
//!   check runs in registration order. A check that errors or panics is
//!   recorded, never allowed to abort its siblings.
//! - **Collecting**: the run digest is computed, every result is appended to
//!   the evidence sink, and the context is disarmed.
//! - **Comparing**: the digest sequence goes through
//!   [`detect_divergence`]; optional artifacts are written.
//!
//! Infrastructure failures (evidence write, fixture read) abort at once.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifacts::{DivergenceArtifact, write_digest_file};
use crate::clock::{Clock, SystemClock, format_iso8601_from_ms};
use crate::config::{HarnessConfig, MIN_RUNS};
use crate::context::HarnessContext;
use crate::digest::{Digest, check_digest, run_digest};
use crate::divergence::{DivergenceReport, detect_divergence};
use crate::evidence_sink::{EvidenceSink, MemoryEvidenceSink};
use crate::model::{CheckResult, CheckStatus, EvidenceRecord, RunRecord};
use crate::network_trap::{Egress, NetworkTrap, SystemEgress};
use crate::registry::{CheckError, CheckRegistry, RegisteredCheck};
use crate::{HarnessError, Result};

/// Metric added when a check triggered the trap.
pub const BLOCKED_CALLS_METRIC: &str = "networkCallsBlocked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorPhase {
    Idle,
    Running { run_index: usize },
    Collecting { run_index: usize },
    Comparing,
    Done,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running { run_index } => write!(f, "running({run_index})"),
            Self::Collecting { run_index } => write!(f, "collecting({run_index})"),
            Self::Comparing => f.write_str("comparing"),
            Self::Done => f.write_str("done"),
        }
    }
}

// ---------------------------------------------------------------------------
// Series result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSeries {
    pub runs: Vec<RunRecord>,
    pub digests: Vec<Digest>,
    pub divergence: DivergenceReport,
}

impl RunSeries {
    pub fn identical(&self) -> bool {
        self.divergence.identical
    }

    /// Count of results with `status` across every run.
    pub fn count(&self, status: CheckStatus) -> usize {
        self.runs
            .iter()
            .flat_map(|r| &r.checks)
            .filter(|c| c.status == status)
            .count()
    }

    /// Deterministic and free of FAIL results.
    pub fn passed(&self) -> bool {
        self.identical() && self.count(CheckStatus::Fail) == 0
    }

    /// # Errors
    ///
    /// [`HarnessError::Nondeterminism`] when the runs diverged.
    pub fn ensure_deterministic(&self) -> Result<()> {
        match self.divergence.first_divergence_index {
            Some(first_divergence_index) if !self.divergence.identical => {
                Err(HarnessError::Nondeterminism {
                    first_divergence_index,
                    distinct_digests: self.divergence.distinct_digests,
                })
            }
            _ => Ok(()),
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

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct RunOrchestrator<S: EvidenceSink> {
    config: HarnessConfig,
    sink: S,
    trap: Arc<NetworkTrap>,
    wall_clock: Box<dyn Clock>,
    write_artifacts: bool,
    phase: OrchestratorPhase,
}

impl<S: EvidenceSink> fmt::Debug for RunOrchestrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("config", &self.config)
            .field("sink", &self.sink.describe())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<S: EvidenceSink> RunOrchestrator<S> {
    /// Orchestrator over the real transport, wrapped by the trap.
    #[must_use]
    pub fn new(config: HarnessConfig, sink: S) -> Self {
        let trap = Arc::new(NetworkTrap::new(
            Arc::new(SystemEgress),
            config.allow_rules.clone(),
        ));
        Self {
            config,
            sink,
            trap,
            wall_clock: Box::new(SystemClock),
            write_artifacts: false,
            phase: OrchestratorPhase::Idle,
        }
    }

    /// Replace the transport the trap wraps.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Egress>) -> Self {
        self.trap = Arc::new(NetworkTrap::new(transport, self.config.allow_rules.clone()));
        self
    }

    /// Clock used for display-only run timestamps.
    #[must_use]
    pub fn with_wall_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.wall_clock = clock;
        self
    }

    /// Write the digest file (and divergence artifact when needed) under
    /// the configured audit directory.
    #[must_use]
    pub fn with_artifacts(mut self, enabled: bool) -> Self {
        self.write_artifacts = enabled;
        self
    }

    pub fn phase(&self) -> OrchestratorPhase {
        self.phase
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run every check in `registry` `n` times.
    ///
    /// Divergence is reported in the returned series, not as an error; use
    /// [`RunSeries::ensure_deterministic`] to turn it into one.
    ///
    /// # Errors
    ///
    /// [`HarnessError::InvalidConfig`] for `n` below [`MIN_RUNS`] or an
    /// invalid config; any infrastructure error raised while running.
    pub fn run_n(&mut self, registry: &CheckRegistry, n: usize) -> Result<RunSeries> {
        if n < MIN_RUNS {
            return Err(HarnessError::invalid_config(format!(
                "at least {MIN_RUNS} runs are required, got {n}"
            )));
        }
        self.config.ensure_valid()?;

        tracing::info!(
            runs = n,
            checks = registry.len(),
            seed = self.config.seed,
            frozen_time_ms = self.config.frozen_time_ms,
            sink = %self.sink.describe(),
            "verification session started"
        );

        let mut runs = Vec::with_capacity(n);
        for run_index in 0..n {
            let record = self.run_once(registry, run_index);
            // Never leave the trap armed after an aborted run.
            self.trap.disarm();
            let record = record.inspect_err(|error| {
                self.phase = OrchestratorPhase::Idle;
                tracing::warn!(run_index, %error, "verification session aborted");
            })?;
            runs.push(record);
        }

        self.phase = OrchestratorPhase::Comparing;
        let digests: Vec<Digest> = runs.iter().map(|r| r.digest.clone()).collect();
        let divergence = detect_divergence(&digests);
        if divergence.identical {
            tracing::info!(summary = %divergence.summary, "runs are deterministic");
        } else {
            tracing::warn!(
                first_divergence_index = ?divergence.first_divergence_index,
                distinct_digests = divergence.distinct_digests,
                summary = %divergence.summary,
                "runs diverged"
            );
        }

        if self.write_artifacts {
            self.write_run_artifacts(&runs, &digests, &divergence)?;
        }

        self.phase = OrchestratorPhase::Done;
        Ok(RunSeries {
            runs,
            digests,
            divergence,
        })
    }

    fn run_once(&mut self, registry: &CheckRegistry, run_index: usize) -> Result<RunRecord> {
        self.phase = OrchestratorPhase::Running { run_index };
        let timestamp = format_iso8601_from_ms(self.wall_clock.now_ms());
        let mut ctx = HarnessContext::armed(
            run_index,
            self.config.frozen_time_ms,
            self.config.seed,
            Arc::clone(&self.trap),
        );

        let mut checks = Vec::with_capacity(registry.len());
        for check in registry.iter() {
            let result = execute_check(check, &mut ctx)?;
            tracing::debug!(
                run_index,
                check_id = %result.check_id,
                status = %result.status,
                "check finished"
            );
            checks.push(result);
        }

        self.phase = OrchestratorPhase::Collecting { run_index };
        let normalize = &self.config.normalize_fields;
        let digest = run_digest(&checks, normalize)?;
        for result in &checks {
            let fragment = check_digest(result, normalize)?;
            self.sink
                .append(&EvidenceRecord::from_result(run_index, result, &fragment))?;
        }
        ctx.disarm();
        self.phase = OrchestratorPhase::Idle;

        tracing::info!(run_index, digest = %digest.fragment(), "run complete");
        Ok(RunRecord {
            run_index,
            timestamp,
            checks,
            digest,
        })
    }

    fn write_run_artifacts(
        &self,
        runs: &[RunRecord],
        digests: &[Digest],
        divergence: &DivergenceReport,
    ) -> Result<()> {
        let digest_path = self.config.digest_path();
        write_digest_file(&digest_path, digests)?;
        tracing::info!(path = %digest_path.display(), "digest file written");

        if let Some(index) = divergence.first_divergence_index {
            if let (Some(baseline), Some(diverging)) = (runs.first(), runs.get(index)) {
                let path = self.config.divergence_path();
                DivergenceArtifact::build(
                    self.config.seed,
                    self.config.frozen_time_ms,
                    divergence,
                    baseline,
                    diverging,
                    &self.config.normalize_fields,
                )?
                .write(&path)?;
                tracing::warn!(path = %path.display(), "divergence artifact written");
            }
        }
        Ok(())
    }
}

/// Run one check, turning errors and panics into results.
fn execute_check(check: &RegisteredCheck, ctx: &mut HarnessContext) -> Result<CheckResult> {
    let spec = &check.spec;
    let blocked_before = ctx.network().recorded_count();
    let outcome = catch_unwind(AssertUnwindSafe(|| (check.run)(&mut *ctx)));

    let mut result = match outcome {
        Ok(Ok(outcome)) => CheckResult::from_outcome(&spec.id, &spec.category, outcome),
        Ok(Err(CheckError::Failed(message))) => CheckResult::errored(
            &spec.id,
            &spec.category,
            CheckStatus::Fail,
            "check reported an error",
            message,
        ),
        Ok(Err(CheckError::MissingInfrastructure(message))) => CheckResult::errored(
            &spec.id,
            &spec.category,
            CheckStatus::Unknown,
            "required infrastructure unavailable",
            message,
        ),
        Ok(Err(CheckError::Fixture { path, detail })) => {
            return Err(HarnessError::fixture(path, detail));
        }
        Err(payload) => CheckResult::errored(
            &spec.id,
            &spec.category,
            CheckStatus::Fail,
            "check panicked",
            panic_message(payload.as_ref()),
        ),
    };

    result.title.clone_from(&spec.title);

    let blocked = ctx.network().recorded_count().saturating_sub(blocked_before);
    if blocked > 0 {
        result
            .metrics
            .entry(BLOCKED_CALLS_METRIC.to_owned())
            .or_insert_with(|| blocked.into());
    }
    Ok(result)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Run `registry` `n` times under the default configuration, keeping
/// evidence in memory.
///
/// # Errors
///
/// See [`RunOrchestrator::run_n`].
pub fn run_n(registry: &CheckRegistry, n: usize) -> Result<RunSeries> {
    RunOrchestrator::new(HarnessConfig::default(), MemoryEvidenceSink::new()).run_n(registry, n)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::model::CheckOutcome;

    fn registry_with(id: &str) -> CheckRegistry {
        let mut registry = CheckRegistry::new();
        registry
            .register(id, "L1", "frozen time", |ctx: &mut HarnessContext| {
                Ok(CheckOutcome::pass("time is frozen").with_metric("now", ctx.now_ms()))
            })
            .unwrap();
        registry
    }

    #[test]
    fn too_few_runs_is_config_error() {
        let err = run_n(&registry_with("a"), 3).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig { .. }));
    }

    #[test]
    fn deterministic_registry_is_identical() {
        let series = run_n(&registry_with("a"), 10).unwrap();
        assert!(series.identical());
        assert_eq!(series.digests.len(), 10);
        assert!(series.ensure_deterministic().is_ok());
        assert!(series.passed());
    }

    #[test]
    fn evidence_records_per_check_per_run() {
        let mut orchestrator =
            RunOrchestrator::new(HarnessConfig::default(), MemoryEvidenceSink::new());
        let series = orchestrator.run_n(&registry_with("a"), 12).unwrap();
        assert_eq!(orchestrator.phase(), OrchestratorPhase::Done);
        assert_eq!(orchestrator.sink().lines().len(), 12);
        assert_eq!(series.runs[11].run_index, 11);
    }

    #[test]
    fn leaking_state_diverges() {
        let counter = Rc::new(Cell::new(0_u64));
        let leak = Rc::clone(&counter);
        let mut registry = CheckRegistry::new();
        registry
            .register("leaky", "L1", "", move |_ctx: &mut HarnessContext| {
                leak.set(leak.get() + 1);
                // Run-variant value on the third run only.
                let v = if leak.get() == 3 { 1 } else { 0 };
                Ok(CheckOutcome::pass("ok").with_metric("v", v))
            })
            .unwrap();
        let series = run_n(&registry, 10).unwrap();
        assert!(!series.identical());
        assert_eq!(series.divergence.first_divergence_index, Some(2));
        let err = series.ensure_deterministic().unwrap_err();
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn missing_infrastructure_is_unknown() {
        let mut registry = CheckRegistry::new();
        registry
            .register("needs.db", "L2", "", |_ctx: &mut HarnessContext| {
                Err(CheckError::missing("no database configured"))
            })
            .unwrap();
        let series = run_n(&registry, 10).unwrap();
        let check = &series.runs[0].checks[0];
        assert_eq!(check.status, CheckStatus::Unknown);
        assert_eq!(check.error.as_deref(), Some("no database configured"));
        assert!(series.identical());
        assert!(series.passed());
    }

    #[test]
    fn fixture_error_aborts_and_disarms() {
        let mut registry = CheckRegistry::new();
        registry
            .register("fixture", "L1", "", |_ctx: &mut HarnessContext| {
                Err(CheckError::Fixture {
                    path: "fixtures/a.json".to_owned(),
                    detail: "not found".to_owned(),
                })
            })
            .unwrap();
        let mut orchestrator =
            RunOrchestrator::new(HarnessConfig::default(), MemoryEvidenceSink::new());
        let err = orchestrator.run_n(&registry, 10).unwrap_err();
        assert!(matches!(err, HarnessError::FixtureRead { .. }));
        assert!(!orchestrator.trap.is_armed());
        assert!(orchestrator.sink().lines().is_empty());
    }

    #[test]
    fn blocked_calls_are_counted_in_metrics() {
        let mut registry = CheckRegistry::new();
        registry
            .register("egress", "L1", "", |ctx: &mut HarnessContext| {
                let blocked = ctx.fetch("https://example.com", "GET").is_err();
                Ok(CheckOutcome::verdict(blocked, "blocked", "escaped"))
            })
            .unwrap();
        let series = run_n(&registry, 10).unwrap();
        let check = &series.runs[0].checks[0];
        assert_eq!(check.status, CheckStatus::Pass);
        assert_eq!(check.metrics[BLOCKED_CALLS_METRIC], serde_json::json!(1));
        assert!(series.identical());
    }

    #[test]
    fn registered_title_reaches_results_and_evidence() {
        let mut registry = CheckRegistry::new();
        registry
            .register("titled", "L1", "Frozen clock holds", |_ctx: &mut HarnessContext| {
                Ok(CheckOutcome::pass("ok"))
            })
            .unwrap();
        registry
            .register("titled.panics", "L1", "Panicking check", |_ctx: &mut HarnessContext| {
                panic!("boom")
            })
            .unwrap();
        let mut orchestrator =
            RunOrchestrator::new(HarnessConfig::default(), MemoryEvidenceSink::new());
        let series = orchestrator.run_n(&registry, 10).unwrap();
        assert_eq!(series.runs[0].checks[0].title, "Frozen clock holds");
        assert_eq!(series.runs[0].checks[1].title, "Panicking check");
        let first: EvidenceRecord = serde_json::from_str(&orchestrator.sink().lines()[0]).unwrap();
        assert_eq!(first.title, "Frozen clock holds");
    }

    #[test]
    fn panic_message_extraction() {
        let p: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(p.as_ref()), "non-string panic payload");
    }
}
