//! SHA-256 digests over canonical JSON.

use std::fmt;
use std::fmt::Write as FmtWrite;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::Result;
use crate::model::CheckResult;
use crate::stable_json::stable_to_string;

/// Hex characters shown when a digest is displayed in a table or log line.
pub const FRAGMENT_LEN: usize = 16;

/// Full lowercase-hex SHA-256. Equality always compares all 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display prefix; not used for comparison.
    pub fn fragment(&self) -> &str {
        self.0.get(..FRAGMENT_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// `sha256(stable_to_string(value, normalize_fields))`.
///
/// # Errors
///
/// Returns [`crate::HarnessError::Serialization`] when `value` has no JSON
/// representation.
pub fn digest_of<T, S>(value: &T, normalize_fields: &[S]) -> Result<Digest>
where
    T: Serialize + ?Sized,
    S: AsRef<str>,
{
    Ok(Digest::of_bytes(
        stable_to_string(value, normalize_fields)?.as_bytes(),
    ))
}

/// Digest of one check result. Contains no run index or wall time.
///
/// # Errors
///
/// See [`digest_of`].
pub fn check_digest<S: AsRef<str>>(result: &CheckResult, normalize_fields: &[S]) -> Result<Digest> {
    digest_of(result, normalize_fields)
}

/// Order-independent digest of a run: per-check digests, sorted by check
/// id, joined with `|` and hashed again.
///
/// # Errors
///
/// See [`digest_of`].
pub fn run_digest<S: AsRef<str>>(checks: &[CheckResult], normalize_fields: &[S]) -> Result<Digest> {
    let mut parts = checks
        .iter()
        .map(|c| {
            let digest = check_digest(c, normalize_fields)?;
            Ok::<_, crate::HarnessError>((c.check_id.as_str(), digest.0))
        })
        .collect::<Result<Vec<(&str, String)>>>()?;
    // Digest breaks ties so duplicate ids cannot reintroduce input order.
    parts.sort();
    let joined: Vec<String> = parts.into_iter().map(|(_, d)| d).collect();
    Ok(Digest::of_bytes(joined.join("|").as_bytes()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::CheckOutcome;

    const NONE: [&str; 0] = [];

    #[test]
    fn known_vector() {
        assert_eq!(
            Digest::of_bytes(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(Digest::of_bytes(b"abc").fragment(), "ba7816bf8f01cfea");
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":[1,2]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y":[1,2],"x":1}"#).unwrap();
        assert_eq!(digest_of(&a, &NONE).unwrap(), digest_of(&b, &NONE).unwrap());
    }

    #[test]
    fn normalized_fields_do_not_affect_digest() {
        let a = json!({"timestamp": "2025-01-01", "v": 1});
        let b = json!({"timestamp": "2031-07-04", "v": 1});
        let fields = ["timestamp"];
        assert_eq!(digest_of(&a, &fields).unwrap(), digest_of(&b, &fields).unwrap());
        assert_ne!(digest_of(&a, &NONE).unwrap(), digest_of(&b, &NONE).unwrap());
    }

    #[test]
    fn run_digest_ignores_check_order() {
        let checks = vec![
            CheckResult::from_outcome("b", "L1", CheckOutcome::pass("ok")),
            CheckResult::from_outcome("a", "L1", CheckOutcome::fail("no")),
        ];
        let mut reversed = checks.clone();
        reversed.reverse();
        assert_eq!(
            run_digest(&checks, &NONE).unwrap(),
            run_digest(&reversed, &NONE).unwrap()
        );
    }

    #[test]
    fn run_digest_sensitive_to_status() {
        let a = vec![CheckResult::from_outcome("a", "L1", CheckOutcome::pass("r"))];
        let b = vec![CheckResult::from_outcome("a", "L1", CheckOutcome::unknown("r"))];
        assert_ne!(run_digest(&a, &NONE).unwrap(), run_digest(&b, &NONE).unwrap());
    }
}
