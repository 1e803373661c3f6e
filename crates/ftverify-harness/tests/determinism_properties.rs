//! Determinism properties of the harness primitives.
//!
//! 1. PRNG reproducibility
//! 2. Clock freeze and exact advance
//! 3. Stable serialization is independent of key insertion order
//! 4. Run digest is independent of check order
//! 5. Divergence detection
//! 6. Network trap blocks and records egress
//! 8. Normalized fields never affect digests
//!
//! Run with:
//! ```sh
//! cargo test -p ftverify-harness --test determinism_properties
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value, json};

use ftverify_harness::clock::{Clock, FrozenClock};
use ftverify_harness::digest::{Digest, digest_of, run_digest};
use ftverify_harness::divergence::detect_divergence;
use ftverify_harness::model::{CheckOutcome, CheckResult};
use ftverify_harness::network_trap::{AllowRule, EgressCall, NetworkTrap, SystemEgress};
use ftverify_harness::prng::SeededRng;
use ftverify_harness::stable_json::stable_to_string;

const NONE: [&str; 0] = [];

// ─── 1. PRNG reproducibility ───────────────────────────────────────────

proptest! {
    #[test]
    fn prng_same_seed_same_sequence(seed in any::<u64>(), draws in 1usize..256) {
        let mut a = SeededRng::new(seed);
        let mut b = SeededRng::new(seed);
        for _ in 0..draws {
            let x = a.next_f64();
            prop_assert_eq!(x.to_bits(), b.next_f64().to_bits());
            prop_assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn prng_next_int_in_bounds(seed in any::<u64>(), max in 1u64..10_000) {
        let mut rng = SeededRng::new(seed);
        for _ in 0..64 {
            prop_assert!(rng.next_int(max) < max);
        }
    }
}

#[test]
fn prng_reference_sequence_for_seed_42() {
    let mut rng = SeededRng::new(42);
    let first: Vec<u64> = (0..3).map(|_| rng.next_int(1_000_000)).collect();
    assert_eq!(first, vec![859_794, 769_443, 937_819]);
}

// ─── 2. Clock ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn clock_advance_is_exact(
        base in 0u64..4_000_000_000_000,
        deltas in proptest::collection::vec(0u64..86_400_000, 0..16),
    ) {
        let clock = FrozenClock::new(base);
        prop_assert_eq!(clock.now_ms(), clock.now_ms());
        let mut expected = base;
        for delta in deltas {
            clock.advance(delta);
            expected += delta;
            prop_assert_eq!(clock.now_ms(), expected);
        }
    }
}

// ─── 3. Stable serialization ───────────────────────────────────────────

fn shuffled_object(pairs: &BTreeMap<String, i64>, seed: u64) -> Value {
    let mut entries: Vec<(&String, &i64)> = pairs.iter().collect();
    entries.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut map = Map::new();
    for (k, v) in entries {
        map.insert(k.clone(), json!({"value": v, "tags": [k, v]}));
    }
    Value::Object(map)
}

proptest! {
    #[test]
    fn serialization_ignores_insertion_order(
        pairs in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..24),
        seed_a in any::<u64>(),
        seed_b in any::<u64>(),
    ) {
        let a = stable_to_string(&shuffled_object(&pairs, seed_a), &NONE).unwrap();
        let b = stable_to_string(&shuffled_object(&pairs, seed_b), &NONE).unwrap();
        prop_assert_eq!(a, b);
    }
}

#[test]
fn serialization_preserves_array_order() {
    let a = stable_to_string(&json!({"xs": [1, 2, 3]}), &NONE).unwrap();
    let b = stable_to_string(&json!({"xs": [3, 2, 1]}), &NONE).unwrap();
    assert_ne!(a, b);
}

// ─── 4. Run digest order independence ──────────────────────────────────

fn checks_from(specs: &BTreeMap<String, (u8, i64)>) -> Vec<CheckResult> {
    specs
        .iter()
        .map(|(id, (status, metric))| {
            let outcome = match status % 3 {
                0 => CheckOutcome::pass("ok"),
                1 => CheckOutcome::fail("bad"),
                _ => CheckOutcome::unknown("n/a"),
            };
            CheckResult::from_outcome(id.clone(), "L1", outcome.with_metric("m", *metric))
        })
        .collect()
}

proptest! {
    #[test]
    fn run_digest_ignores_check_order(
        specs in proptest::collection::btree_map(
            "[a-z.]{1,12}",
            (any::<u8>(), any::<i64>()),
            1..16,
        ),
        seed in any::<u64>(),
    ) {
        let checks = checks_from(&specs);
        let mut permuted = checks.clone();
        permuted.shuffle(&mut StdRng::seed_from_u64(seed));
        prop_assert_eq!(run_digest(&checks, &NONE).unwrap(), run_digest(&permuted, &NONE).unwrap());
    }
}

// ─── 5. Divergence detection ───────────────────────────────────────────

#[test]
fn divergence_on_last_run() {
    let d = Digest::of_bytes(b"d");
    let e = Digest::of_bytes(b"e");
    let identical = detect_divergence(&[d.clone(), d.clone(), d.clone()]);
    assert!(identical.identical);
    assert_eq!(identical.first_divergence_index, None);

    let diverged = detect_divergence(&[d.clone(), d, e]);
    assert!(!diverged.identical);
    assert_eq!(diverged.first_divergence_index, Some(2));
}

proptest! {
    #[test]
    fn divergence_index_is_first_mismatch(len in 2usize..32, at in 1usize..32) {
        let at = at % len;
        prop_assume!(at > 0);
        let base = Digest::of_bytes(b"base");
        let mut digests = vec![base; len];
        digests[at] = Digest::of_bytes(b"other");
        let report = detect_divergence(&digests);
        prop_assert!(!report.identical);
        prop_assert_eq!(report.first_divergence_index, Some(at));
        prop_assert_eq!(report.distinct_digests, 2);
    }
}

// ─── 6. Network trap ───────────────────────────────────────────────────

#[test]
fn trap_blocks_each_egress_kind_once() {
    let trap = NetworkTrap::new(Arc::new(SystemEgress), AllowRule::loopback_defaults());
    trap.arm();
    let attempts = [
        EgressCall::fetch("https://example.com/a", "GET"),
        EgressCall::fetch("http://example.com/b", "POST"),
        EgressCall::fetch("wss://example.com/ws", "GET"),
        EgressCall::dns("example.com"),
        EgressCall::socket("198.51.100.7:25"),
    ];
    for (i, call) in attempts.iter().enumerate() {
        let err = trap.dispatch(call, i as u64).unwrap_err();
        assert!(err.is_blocked(), "{call:?} escaped: {err}");
    }

    let recorded = trap.recorded_calls();
    assert_eq!(recorded.len(), attempts.len());
    let kinds: Vec<&str> = recorded.iter().map(|c| c.kind.as_str()).collect();
    assert_eq!(kinds, vec!["https", "http", "websocket", "dns", "socket"]);

    trap.clear();
    assert!(trap.recorded_calls().is_empty());
}

// ─── 8. Normalization ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn normalized_timestamp_never_changes_digest(
        a in any::<i64>(),
        b in any::<i64>(),
        payload in "[ -~]{0,32}",
    ) {
        let fields = ["timestamp"];
        let left = json!({"payload": payload, "timestamp": a, "nested": {"timestamp": b}});
        let right = json!({"payload": payload, "timestamp": b, "nested": {"timestamp": a}});
        prop_assert_eq!(digest_of(&left, &fields).unwrap(), digest_of(&right, &fields).unwrap());
    }
}

#[test]
fn unnormalized_timestamp_changes_digest() {
    let left = json!({"timestamp": 1});
    let right = json!({"timestamp": 2});
    assert_ne!(digest_of(&left, &NONE).unwrap(), digest_of(&right, &NONE).unwrap());
}
