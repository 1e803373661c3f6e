//! Deterministic verification harness.
//!
//! Runs a registry of checks N times under a frozen clock, a seeded PRNG
//! and an armed network trap, digests every run, proves the digests are
//! identical, and persists every outcome as append-only JSONL evidence that
//! a separate phase turns into an audit report.
//!
//! Leaves first:
//!
//! - [`clock`], [`prng`], [`network_trap`]: the three sources of
//!   nondeterminism, each replaced by a controllable implementation.
//! - [`stable_json`], [`digest`]: canonical serialization and SHA-256.
//! - [`model`], [`registry`], [`context`]: what a check is and what it sees.
//! - [`orchestrator`], [`divergence`], [`evidence_sink`]: the N-run loop.
//! - [`report`]: log → markdown, independent of the run phase.

pub mod artifacts;
pub mod checks;
pub mod clock;
pub mod config;
pub mod context;
pub mod digest;
pub mod divergence;
pub mod evidence_sink;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod network_trap;
pub mod orchestrator;
pub mod prng;
pub mod registry;
pub mod report;
pub mod stable_json;

pub use ftverify_error::{EgressError, EgressKind, HarnessError, Result};

pub use config::HarnessConfig;
pub use context::HarnessContext;
pub use digest::Digest;
pub use divergence::{DivergenceReport, detect_divergence};
pub use model::{CheckOutcome, CheckResult, CheckStatus, EvidenceRecord, EvidenceRef};
pub use orchestrator::{RunOrchestrator, RunSeries, run_n};
pub use registry::{CheckError, CheckRegistry};
pub use report::{VerificationReport, generate};
