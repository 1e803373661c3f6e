//! End-to-end: registry → N runs → JSONL evidence → report.

use std::cell::Cell;
use std::fs;
use std::rc::Rc;

use tempfile::tempdir;

use ftverify_harness::checks::register_harness_self_checks;
use ftverify_harness::clock::FrozenClock;
use ftverify_harness::config::HarnessConfig;
use ftverify_harness::context::HarnessContext;
use ftverify_harness::evidence_sink::JsonlEvidenceSink;
use ftverify_harness::logging::init_test_logging;
use ftverify_harness::model::{CheckOutcome, CheckStatus, EvidenceRecord};
use ftverify_harness::orchestrator::RunOrchestrator;
use ftverify_harness::registry::CheckRegistry;
use ftverify_harness::report::{VerificationReport, generate};

fn three_check_registry() -> CheckRegistry {
    let mut registry = CheckRegistry::new();
    registry
        .register("scenario.pass", "L1", "always passes", |ctx: &mut HarnessContext| {
            Ok(CheckOutcome::pass("frozen clock observed")
                .with_metric("now", ctx.now_ms())
                .with_metric("timestamp", ctx.now_iso8601()))
        })
        .unwrap();
    registry
        .register("scenario.fail", "L1", "always fails", |ctx: &mut HarnessContext| {
            let roll = ctx.next_int(100);
            Ok(CheckOutcome::fail("threshold not met").with_metric("roll", roll))
        })
        .unwrap();
    registry
        .register("scenario.panics", "L2", "panics", |_ctx: &mut HarnessContext| {
            panic!("fixture parser exploded")
        })
        .unwrap();
    registry
}

fn config_in(dir: &std::path::Path) -> HarnessConfig {
    HarnessConfig {
        audit_dir: dir.to_path_buf(),
        ..HarnessConfig::default()
    }
}

fn orchestrator_for(cfg: &HarnessConfig) -> RunOrchestrator<JsonlEvidenceSink> {
    RunOrchestrator::new(cfg.clone(), JsonlEvidenceSink::new(cfg.evidence_path()))
        .with_wall_clock(Box::new(FrozenClock::new(0)))
        .with_artifacts(true)
}

#[test]
fn ten_runs_of_three_checks() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());

    let series = orchestrator_for(&cfg)
        .run_n(&three_check_registry(), 10)
        .unwrap();

    assert_eq!(series.digests.len(), 10);
    assert!(series.identical(), "{}", series.divergence.summary);
    assert!(series.digests.windows(2).all(|w| w[0] == w[1]));

    let text = fs::read_to_string(cfg.evidence_path()).unwrap();
    let records: Vec<EvidenceRecord> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 30);

    let panicked: Vec<&EvidenceRecord> = records
        .iter()
        .filter(|r| r.check_id == "scenario.panics")
        .collect();
    assert_eq!(panicked.len(), 10);
    for record in panicked {
        assert_eq!(record.status, CheckStatus::Fail);
        assert_eq!(record.error.as_deref(), Some("fixture parser exploded"));
    }

    let run_indices: Vec<usize> = records.iter().map(|r| r.run_index).collect();
    assert_eq!(run_indices[..3], [0, 0, 0]);
    assert_eq!(run_indices[27..], [9, 9, 9]);

    let digest_file = fs::read_to_string(cfg.digest_path()).unwrap();
    assert_eq!(digest_file.lines().count(), 10);
    assert!(digest_file.starts_with(&format!("Run 1: {}", series.digests[0])));
    assert!(!cfg.divergence_path().exists());

    let report = VerificationReport::from_path(&cfg.evidence_path()).unwrap();
    assert_eq!(report.rollup, CheckStatus::Fail);
    assert_eq!(report.total_records, 30);
    assert_eq!(report.totals.pass, 10);
    assert_eq!(report.totals.fail, 20);
    assert_eq!(report.run_count, 10);
}

#[test]
fn report_regeneration_is_byte_identical() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());
    let mut registry = three_check_registry();
    register_harness_self_checks(&mut registry).unwrap();
    orchestrator_for(&cfg).run_n(&registry, 10).unwrap();

    let first = generate(&cfg.evidence_path()).unwrap();
    let second = generate(&cfg.evidence_path()).unwrap();
    assert_eq!(first, second);
    assert!(first.contains("**Rollup**: FAIL"));
    assert_eq!(first.matches("- Run ").count(), 70);
    assert!(first.contains("### `scenario.pass`: always passes (L1)"));
    assert!(first.contains(
        "### `harness.clock.frozen`: Clock is frozen and advances exactly (harness)"
    ));
}

#[test]
fn sessions_accumulate_until_cleared() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());
    orchestrator_for(&cfg).run_n(&three_check_registry(), 10).unwrap();
    orchestrator_for(&cfg).run_n(&three_check_registry(), 10).unwrap();

    let report = VerificationReport::from_path(&cfg.evidence_path()).unwrap();
    assert_eq!(report.total_records, 60);
    assert_eq!(report.run_count, 20);
    assert_eq!(
        report.render_markdown().matches("- Run 0: ").count(),
        6,
        "each record must be rendered exactly once"
    );

    let mut sink = JsonlEvidenceSink::new(cfg.evidence_path());
    sink.clear().unwrap();
    assert_eq!(
        VerificationReport::from_path(&cfg.evidence_path())
            .unwrap()
            .total_records,
        0
    );
}

#[test]
fn divergent_session_writes_artifact() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());

    let calls = Rc::new(Cell::new(0_u32));
    let leak = Rc::clone(&calls);
    let mut registry = three_check_registry();
    registry
        .register("scenario.leaky", "L1", "leaks state", move |_ctx: &mut HarnessContext| {
            leak.set(leak.get() + 1);
            Ok(CheckOutcome::pass("ok").with_metric("calls", leak.get()))
        })
        .unwrap();

    let series = orchestrator_for(&cfg).run_n(&registry, 10).unwrap();
    assert!(!series.identical());
    assert_eq!(series.divergence.first_divergence_index, Some(1));
    assert_eq!(series.divergence.distinct_digests, 10);
    assert!(series.ensure_deterministic().is_err());

    let artifact: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(cfg.divergence_path()).unwrap()).unwrap();
    assert_eq!(artifact["report"]["firstDivergenceIndex"], 1);
    let changed = artifact["changedChecks"].as_array().unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0]["checkId"], "scenario.leaky");
    assert_eq!(calls.get(), 10);
}
