use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use ftverify_harness::{HarnessConfig, HarnessError};
use ftverify_harness::model::CheckStatus;
use ftverify_harness::report::{VerificationReport, write_report};

#[derive(Debug)]
enum ReportError {
    /// Bad arguments or help shown (empty message).
    Usage(String),
    Harness(HarnessError),
}

impl ReportError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Harness(error) => error.exit_code(),
        }
    }
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(message) => f.write_str(message),
            Self::Harness(error) => write!(f, "{error}"),
        }
    }
}

impl From<HarnessError> for ReportError {
    fn from(error: HarnessError) -> Self {
        Self::Harness(error)
    }
}

#[derive(Debug)]
struct CliConfig {
    log_path: PathBuf,
    out_path: Option<PathBuf>,
    json: bool,
}

fn print_help() {
    let help = "\
evidence_report — render an audit report from a JSONL evidence log

USAGE:
    cargo run -p ftverify-harness --bin evidence_report -- [OPTIONS]

OPTIONS:
    --log <PATH>      Evidence log (default: <FTV_AUDIT_DIR>/verification_results.jsonl)
    --out <PATH>      Write markdown here (default: stdout)
    --json            Print the aggregate as JSON instead of markdown
    -h, --help        Show this help

Exit code is 0 when the rollup is PASS, 1 otherwise, 2 on errors.
";
    println!("{help}");
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let defaults =
        HarnessConfig::from_env().map_err(|error| format!("config_from_env_failed: {error}"))?;
    let mut cfg = CliConfig {
        log_path: defaults.evidence_path(),
        out_path: None,
        json: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--log" => {
                i += 1;
                if i >= args.len() {
                    return Err("--log requires a value".to_owned());
                }
                cfg.log_path = PathBuf::from(&args[i]);
            }
            "--out" => {
                i += 1;
                if i >= args.len() {
                    return Err("--out requires a value".to_owned());
                }
                cfg.out_path = Some(PathBuf::from(&args[i]));
            }
            "--json" => cfg.json = true,
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        i += 1;
    }
    Ok(cfg)
}

fn run(args: &[String]) -> Result<bool, ReportError> {
    let cfg = parse_args(args).map_err(ReportError::Usage)?;

    let report = if let Some(out) = &cfg.out_path {
        let report = write_report(&cfg.log_path, out)?;
        println!(
            "INFO evidence_report written path={} rollup={} records={} skipped={}",
            out.display(),
            report.rollup,
            report.total_records,
            report.skipped_lines
        );
        report
    } else {
        let report = VerificationReport::from_path(&cfg.log_path)?;
        if cfg.json {
            let json = report.to_json().map_err(HarnessError::from)?;
            println!("{json}");
        } else {
            print!("{}", report.render_markdown());
        }
        report
    };

    Ok(report.rollup == CheckStatus::Pass)
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(ReportError::Usage(message)) if message.is_empty() => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR evidence_report failed: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}
