//! Built-in checks.
//!
//! Two kinds live here:
//!
//! - harness self-checks that prove the frozen clock, seeded PRNG, stable
//!   serializer and network trap behave inside a real run;
//! - parameterized factories (`required_files`, `ingest_snapshot`) whose
//!   business inputs are supplied by the caller.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use crate::context::HarnessContext;
use crate::digest::digest_of;
use crate::ingest::{FailureSpec, IngestReadPath, MAX_RECENT_EVENTS, ReadPathError};
use crate::model::{CheckOutcome, EvidenceRef};
use crate::prng::SeededRng;
use crate::registry::{CheckError, CheckRegistry};
use crate::stable_json::stable_to_string;
use crate::Result;

pub const HARNESS_CATEGORY: &str = "harness";

type CheckReturn = std::result::Result<CheckOutcome, CheckError>;

const NO_NORMALIZATION: [&str; 0] = [];

// ---------------------------------------------------------------------------
// Harness self-checks
// ---------------------------------------------------------------------------

/// Register the four harness self-checks under [`HARNESS_CATEGORY`].
///
/// # Errors
///
/// Propagates registration errors (duplicate ids).
pub fn register_harness_self_checks(registry: &mut CheckRegistry) -> Result<()> {
    registry.register(
        "harness.clock.frozen",
        HARNESS_CATEGORY,
        "Clock is frozen and advances exactly",
        frozen_clock,
    )?;
    registry.register(
        "harness.prng.replay",
        HARNESS_CATEGORY,
        "Seeded PRNG replays the same sequence",
        seeded_rng_replay,
    )?;
    registry.register(
        "harness.serialization.stable",
        HARNESS_CATEGORY,
        "Serialization is independent of key insertion order",
        stable_serialization,
    )?;
    registry.register(
        "harness.network.trap",
        HARNESS_CATEGORY,
        "Outbound network access is intercepted",
        network_trap_blocks_egress,
    )?;
    Ok(())
}

fn frozen_clock(ctx: &mut HarnessContext) -> CheckReturn {
    let first = ctx.now_ms();
    let second = ctx.now_ms();
    ctx.advance(1_000);
    let advanced = ctx.now_ms();
    ctx.clock().reset(first);

    let frozen = first == second;
    let exact = advanced == first + 1_000;
    Ok(CheckOutcome::verdict(
        frozen && exact,
        "now() is stable and advance() is exact",
        format!("frozen={frozen} exact_advance={exact}"),
    )
    .with_metric("frozenAt", ctx.now_iso8601())
    .with_metric("advanceDeltaMs", advanced.saturating_sub(first)))
}

fn seeded_rng_replay(ctx: &mut HarnessContext) -> CheckReturn {
    let seed = ctx.rng().seed();
    let mut a = SeededRng::new(seed);
    let mut b = SeededRng::new(seed);
    let xs: Vec<u64> = (0..32).map(|_| a.next_int(1_000_000)).collect();
    let ys: Vec<u64> = (0..32).map(|_| b.next_int(1_000_000)).collect();
    let in_range = (0..256).all(|_| (0.0..1.0).contains(&a.next_f64()));

    let sample: Vec<u64> = (0..4).map(|_| ctx.next_int(1_000)).collect();
    Ok(
        CheckOutcome::verdict(
            xs == ys && in_range,
            "same seed yields the same sequence",
            "same seed yielded different sequences",
        )
        .with_metric("seed", seed)
        .with_metric("sample", json!(sample)),
    )
}

fn stable_serialization(_ctx: &mut HarnessContext) -> CheckReturn {
    let forward = json!({"alpha": 1, "beta": {"x": [1, 2], "y": null}, "gamma": "g"});
    let mut backward = serde_json::Map::new();
    backward.insert("gamma".to_owned(), json!("g"));
    backward.insert("beta".to_owned(), json!({"y": null, "x": [1, 2]}));
    backward.insert("alpha".to_owned(), json!(1));
    let backward = serde_json::Value::Object(backward);

    let failed = |e: crate::HarnessError| CheckError::failed(e.to_string());
    let a = stable_to_string(&forward, &NO_NORMALIZATION).map_err(failed)?;
    let b = stable_to_string(&backward, &NO_NORMALIZATION).map_err(failed)?;
    let digest = digest_of(&forward, &NO_NORMALIZATION).map_err(failed)?;

    Ok(CheckOutcome::verdict(
        a == b,
        "key order does not change the encoding",
        "key order changed the encoding",
    )
    .with_metric("canonical", a)
    .with_metric("digest", digest.fragment()))
}

fn network_trap_blocks_egress(ctx: &mut HarnessContext) -> CheckReturn {
    let before = ctx.network().recorded_count();
    let external = [
        ctx.fetch("https://api.atlassian.com/ex/jira", "GET"),
        ctx.resolve("telemetry.example.com"),
        ctx.connect("203.0.113.10:443"),
    ];
    let all_blocked = external
        .iter()
        .all(|r| r.as_ref().is_err_and(crate::EgressError::is_blocked));
    let recorded = ctx.network().recorded_count().saturating_sub(before);
    let relative_passes = !ctx
        .fetch("/api/health", "GET")
        .is_err_and(|e| e.is_blocked());

    Ok(CheckOutcome::verdict(
        all_blocked && recorded == external.len() && relative_passes,
        "external egress blocked and recorded; same-origin allowed",
        format!(
            "all_blocked={all_blocked} recorded={recorded} relative_passes={relative_passes}"
        ),
    )
    .with_metric("blockedAttempts", recorded))
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Check that every path in `files` exists under `root`.
///
/// A missing `root` means the check cannot run here and yields UNKNOWN.
pub fn required_files(
    root: PathBuf,
    files: Vec<String>,
) -> impl Fn(&mut HarnessContext) -> CheckReturn + 'static {
    move |_ctx: &mut HarnessContext| {
        if !root.is_dir() {
            return Err(CheckError::missing(format!(
                "root directory not found: {}",
                root.display()
            )));
        }
        let (present, missing): (Vec<&String>, Vec<&String>) =
            files.iter().partition(|f| root.join(f.as_str()).is_file());

        let outcome = CheckOutcome::verdict(
            missing.is_empty(),
            format!("all {} required files present", files.len()),
            format!("{} of {} required files missing", missing.len(), files.len()),
        )
        .with_metric("required", files.len())
        .with_metric("missing", json!(missing));
        Ok(present
            .into_iter()
            .fold(outcome, |o, f| o.with_evidence(EvidenceRef::file(f.as_str()))))
    }
}

/// Unavailable storage is UNKNOWN; a failed read is FAIL.
fn read_path_outcome(error: ReadPathError) -> CheckReturn {
    match error {
        ReadPathError::Unavailable(reason) => Err(CheckError::missing(reason)),
        ReadPathError::Failed(reason) => {
            Ok(CheckOutcome::fail(format!("read path failed: {reason}")))
        }
    }
}

/// Query the ingest read path for today's snapshot (frozen-clock date).
///
/// The snapshot must be bounded and agree with the per-shard counters.
pub fn ingest_snapshot(
    read_path: Arc<dyn IngestReadPath>,
    org_key: String,
) -> impl Fn(&mut HarnessContext) -> CheckReturn + 'static {
    move |ctx: &mut HarnessContext| {
        let date = ctx.today();
        let snapshot = match read_path.snapshot(&org_key, &date) {
            Ok(snapshot) => snapshot,
            Err(error) => return read_path_outcome(error),
        };
        let counters = match read_path.shard_counters(&org_key, &date) {
            Ok(counters) => counters,
            Err(error) => return read_path_outcome(error),
        };

        let counter_total: u64 = counters.values().sum();
        let bounded = snapshot.recent_event_ids.len() <= MAX_RECENT_EVENTS;
        let consistent = snapshot.recent_event_ids.len() as u64 <= snapshot.event_count
            && counter_total == snapshot.event_count
            && counters.len() == snapshot.shard_ids.len();
        Ok(CheckOutcome::verdict(
            bounded && consistent,
            format!("{} events ingested on {date}", snapshot.event_count),
            format!(
                "inconsistent snapshot: bounded={bounded} consistent={consistent} \
                 counter_total={counter_total}"
            ),
        )
        .with_metric("date", date)
        .with_metric("eventCount", snapshot.event_count)
        .with_metric("shardCounterTotal", counter_total)
        .with_metric("recentEventIds", json!(snapshot.recent_event_ids))
        .with_metric("shardsTouched", json!(snapshot.shard_ids)))
    }
}

/// Replay a scripted read-path failure under frozen time and classify it
/// the way [`ingest_snapshot`] does.
pub fn injected_failure(
    spec: FailureSpec,
) -> impl Fn(&mut HarnessContext) -> CheckReturn + 'static {
    move |ctx: &mut HarnessContext| {
        let started = ctx.now_ms();
        let error = ctx.inject_failure(&spec);
        let elapsed = ctx.now_ms().saturating_sub(started);
        let outcome = match read_path_outcome(error) {
            Ok(outcome) => outcome,
            Err(CheckError::MissingInfrastructure(reason)) => {
                CheckOutcome::unknown(format!("upstream unavailable: {reason}"))
            }
            Err(other) => return Err(other),
        };
        let outcome = outcome
            .with_metric("scenario", spec.scenario.as_str())
            .with_metric("failureKind", spec.kind.as_str())
            .with_metric("elapsedMs", elapsed);
        Ok(match spec.kind.status_code() {
            Some(code) => outcome.with_metric("statusCode", code),
            None => outcome,
        })
    }
}

// ---------------------------------------------------------------------------
// Standard set
// ---------------------------------------------------------------------------

/// Inputs for [`standard_registry`].
pub struct StandardChecks {
    pub docs_root: PathBuf,
    pub required_docs: Vec<String>,
    pub read_path: Arc<dyn IngestReadPath>,
    pub org_key: String,
}

/// Self-checks, the required-docs check (when any docs are listed) and the
/// ingest-snapshot check.
///
/// # Errors
///
/// Propagates registration errors.
pub fn standard_registry(inputs: StandardChecks) -> Result<CheckRegistry> {
    let mut registry = CheckRegistry::new();
    register_harness_self_checks(&mut registry)?;
    if !inputs.required_docs.is_empty() {
        registry.register(
            "docs.required",
            "docs",
            "Required documentation is present",
            required_files(inputs.docs_root, inputs.required_docs),
        )?;
    }
    registry.register(
        "ingest.snapshot",
        "ingest",
        "Ingest read path returns a consistent daily snapshot",
        ingest_snapshot(inputs.read_path, inputs.org_key),
    )?;
    Ok(registry)
}
