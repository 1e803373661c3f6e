use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use ftverify_harness::{HarnessConfig, HarnessError};
use ftverify_harness::checks::{StandardChecks, standard_registry};
use ftverify_harness::evidence_sink::JsonlEvidenceSink;
use ftverify_harness::ingest::{FixtureReadPath, IngestReadPath};
use ftverify_harness::logging::{init_logging, log_timed_phase};
use ftverify_harness::model::CheckStatus;
use ftverify_harness::orchestrator::RunOrchestrator;
use ftverify_harness::report::write_report;

/// Why the runner stopped before producing a verdict.
#[derive(Debug)]
enum RunError {
    /// Bad arguments, help shown (empty message) or logging setup failure.
    Setup(String),
    Harness {
        stage: &'static str,
        error: HarnessError,
    },
}

impl RunError {
    fn harness(stage: &'static str) -> impl FnOnce(HarnessError) -> Self {
        move |error| Self::Harness { stage, error }
    }

    fn exit_code(&self) -> u8 {
        match self {
            Self::Setup(_) => 2,
            Self::Harness { error, .. } => error.exit_code(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup(message) => f.write_str(message),
            Self::Harness { stage, error } => write!(f, "{stage}: {error}"),
        }
    }
}

#[derive(Debug)]
struct CliConfig {
    harness: HarnessConfig,
    docs_root: PathBuf,
    required_docs: Vec<String>,
    ingest_fixture: Option<PathBuf>,
    org_key: String,
    clear: bool,
    report: bool,
    verbose: bool,
}

fn print_help() {
    let help = "\
verification_runner — run the check registry N times under frozen time,
a seeded PRNG and the network trap

USAGE:
    cargo run -p ftverify-harness --bin verification_runner -- [OPTIONS]

OPTIONS:
    --runs <N>                  Number of runs, at least 10 (env FTV_RUNS, default 10)
    --seed <u64>                PRNG seed (env FTV_SEED, default 42)
    --frozen-time-ms <u64>      Frozen instant in epoch ms (env FTV_FROZEN_TIME_MS)
    --audit-dir <PATH>          Evidence/digest/report directory (env FTV_AUDIT_DIR)
    --docs-root <PATH>          Root for --require-doc paths (default: .)
    --require-doc <PATH>        Required documentation file (repeatable)
    --ingest-fixture <PATH>     JSON fixture for the ingest read path
    --org-key <KEY>             Organization key for the ingest snapshot (default: default-org)
    --clear                     Truncate the evidence log before running
    --report                    Write the markdown report after the runs
    -v, --verbose               Debug-level logging
    -h, --help                  Show this help

EXIT CODES:
    0  deterministic, no FAIL results
    1  divergence or FAIL results
    2  infrastructure or usage error
";
    println!("{help}");
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("invalid {flag} value: {raw}"))
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let harness =
        HarnessConfig::from_env().map_err(|error| format!("config_from_env_failed: {error}"))?;
    let mut cfg = CliConfig {
        harness,
        docs_root: PathBuf::from("."),
        required_docs: Vec::new(),
        ingest_fixture: None,
        org_key: "default-org".to_owned(),
        clear: false,
        report: false,
        verbose: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--runs" => {
                cfg.harness.runs = parse_number(next_value(args, &mut i, "--runs")?, "--runs")?;
            }
            "--seed" => {
                cfg.harness.seed = parse_number(next_value(args, &mut i, "--seed")?, "--seed")?;
            }
            "--frozen-time-ms" => {
                cfg.harness.frozen_time_ms = parse_number(
                    next_value(args, &mut i, "--frozen-time-ms")?,
                    "--frozen-time-ms",
                )?;
            }
            "--audit-dir" => {
                cfg.harness.audit_dir = PathBuf::from(next_value(args, &mut i, "--audit-dir")?);
            }
            "--docs-root" => {
                cfg.docs_root = PathBuf::from(next_value(args, &mut i, "--docs-root")?);
            }
            "--require-doc" => cfg
                .required_docs
                .push(next_value(args, &mut i, "--require-doc")?.to_owned()),
            "--ingest-fixture" => {
                let path = next_value(args, &mut i, "--ingest-fixture")?;
                cfg.ingest_fixture = Some(PathBuf::from(path));
            }
            "--org-key" => cfg.org_key = next_value(args, &mut i, "--org-key")?.to_owned(),
            "--clear" => cfg.clear = true,
            "--report" => cfg.report = true,
            "-v" | "--verbose" => cfg.verbose = true,
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        i += 1;
    }

    let violations = cfg.harness.validate();
    if !violations.is_empty() {
        return Err(format!("config_validation_failed: {}", violations.join("; ")));
    }
    Ok(cfg)
}

fn run(args: &[String]) -> Result<bool, RunError> {
    let cfg = parse_args(args).map_err(RunError::Setup)?;
    let _log_guard = init_logging(&cfg.harness.audit_dir, cfg.verbose)
        .map_err(|error| RunError::Setup(format!("logging_init_failed: {error}")))?;

    let read_path: Arc<dyn IngestReadPath> = match &cfg.ingest_fixture {
        Some(path) => Arc::new(
            FixtureReadPath::from_json_file(path)
                .map_err(RunError::harness("ingest_fixture_load"))?,
        ),
        None => Arc::new(FixtureReadPath::unavailable(
            "no ingest read path configured for this environment",
        )),
    };

    let registry = standard_registry(StandardChecks {
        docs_root: cfg.docs_root.clone(),
        required_docs: cfg.required_docs.clone(),
        read_path,
        org_key: cfg.org_key.clone(),
    })
    .map_err(RunError::harness("registry_build"))?;

    let evidence_path = cfg.harness.evidence_path();
    let report_path = cfg.harness.report_path();
    let runs = cfg.harness.runs;

    let mut sink = JsonlEvidenceSink::new(&evidence_path);
    if cfg.clear {
        sink.clear().map_err(RunError::harness("evidence_clear"))?;
    }

    let mut orchestrator = RunOrchestrator::new(cfg.harness.clone(), sink).with_artifacts(true);
    let series = log_timed_phase("run", || orchestrator.run_n(&registry, runs))
        .map_err(RunError::harness("verification_run"))?;

    println!(
        "INFO verification_runner runs={} identical={} pass={} fail={} unknown={} evidence={}",
        series.digests.len(),
        series.identical(),
        series.count(CheckStatus::Pass),
        series.count(CheckStatus::Fail),
        series.count(CheckStatus::Unknown),
        evidence_path.display(),
    );
    println!("INFO verification_runner {}", series.divergence.summary);

    if cfg.report {
        let report = log_timed_phase("report", || write_report(&evidence_path, &report_path))
            .map_err(RunError::harness("report_write"))?;
        println!(
            "INFO verification_runner report={} rollup={}",
            report_path.display(),
            report.rollup
        );
    }

    series
        .ensure_deterministic()
        .map_err(RunError::harness("determinism"))?;
    Ok(series.passed())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(RunError::Setup(message)) if message.is_empty() => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR verification_runner failed: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divergence_exits_one_and_infrastructure_exits_two() {
        let diverged = RunError::harness("determinism")(HarnessError::Nondeterminism {
            first_divergence_index: 1,
            distinct_digests: 2,
        });
        assert_eq!(diverged.exit_code(), 1);
        assert!(diverged.to_string().starts_with("determinism: "));

        let fixture = RunError::harness("ingest_fixture_load")(HarnessError::fixture(
            "ingest.json",
            "missing",
        ));
        assert_eq!(fixture.exit_code(), 2);
        assert_eq!(RunError::Setup("unknown option: --x".to_owned()).exit_code(), 2);
    }

    #[test]
    fn rejects_too_few_runs() {
        let args = vec!["--runs".to_owned(), "3".to_owned()];
        let err = parse_args(&args).unwrap_err();
        assert!(err.contains("config_validation_failed"), "{err}");
    }
}
