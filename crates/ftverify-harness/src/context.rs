//! Per-run capability context.
//!
//! Checks get time, randomness and network access only through a
//! [`HarnessContext`]. The orchestrator builds a fresh one at the start of
//! every run (clock at the frozen instant, PRNG reseeded, trap armed with an
//! empty call list) and disarms it before the next run starts.

use std::sync::Arc;

use crate::clock::{Clock, FrozenClock};
use crate::ingest::{FailureSpec, ReadPathError};
use crate::network_trap::{EgressCall, EgressResponse, NetworkTrap, RecordedCall};
use crate::prng::SeededRng;
use crate::EgressError;

#[derive(Debug)]
pub struct HarnessContext {
    run_index: usize,
    clock: FrozenClock,
    rng: SeededRng,
    trap: Arc<NetworkTrap>,
}

impl HarnessContext {
    /// Arm a context for run `run_index`.
    pub fn armed(run_index: usize, frozen_time_ms: u64, seed: u64, trap: Arc<NetworkTrap>) -> Self {
        trap.arm();
        Self {
            run_index,
            clock: FrozenClock::new(frozen_time_ms),
            rng: SeededRng::new(seed),
            trap,
        }
    }

    /// Zero-based index of the current run. Must not leak into results.
    pub fn run_index(&self) -> usize {
        self.run_index
    }

    // ---------------------------------------------------------------------
    // Time
    // ---------------------------------------------------------------------

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn now_iso8601(&self) -> String {
        self.clock.now_iso8601()
    }

    pub fn today(&self) -> String {
        self.clock.today()
    }

    pub fn advance(&self, delta_ms: u64) {
        self.clock.advance(delta_ms);
    }

    pub fn clock(&self) -> &FrozenClock {
        &self.clock
    }

    // ---------------------------------------------------------------------
    // Randomness
    // ---------------------------------------------------------------------

    /// Uniform float in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.rng.next_f64()
    }

    pub fn next_int(&mut self, max: u64) -> u64 {
        self.rng.next_int(max)
    }

    pub fn next_id(&mut self, prefix: &str) -> String {
        self.rng.next_id(prefix)
    }

    /// Direct access for `rand` adaptors.
    pub fn rng(&mut self) -> &mut SeededRng {
        &mut self.rng
    }

    // ---------------------------------------------------------------------
    // Failure injection
    // ---------------------------------------------------------------------

    /// A failure drawn from this run's PRNG.
    pub fn seeded_failure(&mut self, scenario: &str) -> FailureSpec {
        FailureSpec::seeded(scenario, &mut self.rng)
    }

    /// Advance frozen time by the spec's delay and return its error.
    pub fn inject_failure(&self, spec: &FailureSpec) -> ReadPathError {
        self.clock.advance(spec.delay_ms);
        tracing::debug!(
            scenario = %spec.scenario,
            kind = %spec.kind,
            delay_ms = spec.delay_ms,
            "injecting read-path failure"
        );
        spec.kind.to_error()
    }

    // ---------------------------------------------------------------------
    // Network
    // ---------------------------------------------------------------------

    pub fn network(&self) -> &NetworkTrap {
        &self.trap
    }

    /// HTTP-style request routed through the trap.
    ///
    /// # Errors
    ///
    /// [`EgressError::Blocked`] for non-allowed targets while armed.
    pub fn fetch(&self, url: &str, method: &str) -> Result<EgressResponse, EgressError> {
        self.dispatch(&EgressCall::fetch(url, method))
    }

    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub fn resolve(&self, host: &str) -> Result<EgressResponse, EgressError> {
        self.dispatch(&EgressCall::dns(host))
    }

    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub fn connect(&self, addr: &str) -> Result<EgressResponse, EgressError> {
        self.dispatch(&EgressCall::socket(addr))
    }

    pub fn dispatch(&self, call: &EgressCall) -> Result<EgressResponse, EgressError> {
        self.trap.dispatch(call, self.clock.now_ms())
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.trap.recorded_calls()
    }

    /// Restore the real transport. Called by the orchestrator after the run.
    pub fn disarm(&self) {
        self.trap.disarm();
    }
}
