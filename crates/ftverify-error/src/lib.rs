use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for harness infrastructure.
///
/// Check-level outcomes (FAIL, UNKNOWN) are data, not errors; everything in
/// this enum aborts the verification session or a report generation.
#[derive(Error, Debug)]
pub enum HarnessError {
    // === Evidence & artifacts ===
    /// Appending to the evidence log failed.
    #[error("evidence write failed: '{path}': {source}")]
    EvidenceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the evidence log failed.
    #[error("evidence read failed: '{path}': {source}")]
    EvidenceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a digest display file or divergence artifact failed.
    #[error("artifact write failed: '{path}': {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fixture a check depends on could not be read.
    #[error("fixture read failed: '{path}': {detail}")]
    FixtureRead { path: PathBuf, detail: String },

    // === Configuration & registration ===
    /// Harness configuration rejected by validation.
    #[error("invalid harness configuration: {detail}")]
    InvalidConfig { detail: String },

    /// Two checks registered under the same id.
    #[error("duplicate check id: {id}")]
    DuplicateCheck { id: String },

    /// Invalid check id (empty or containing whitespace).
    #[error("invalid check id: '{id}'")]
    InvalidCheckId { id: String },

    // === Determinism ===
    /// Runs produced differing digests.
    #[error(
        "non-deterministic session: first divergence at run {first_divergence_index}, \
         {distinct_digests} distinct digests"
    )]
    Nondeterminism {
        first_divergence_index: usize,
        distinct_digests: usize,
    },

    // === Plumbing ===
    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarnessError {
    /// Whether this error originates in harness plumbing rather than in the
    /// system under verification.
    pub const fn is_infrastructure(&self) -> bool {
        !matches!(self, Self::Nondeterminism { .. })
    }

    /// Process exit code for CLI runners.
    ///
    /// `1` means verification ran and failed, `2` means the harness itself
    /// could not complete.
    pub const fn exit_code(&self) -> u8 {
        if self.is_infrastructure() { 2 } else { 1 }
    }

    /// Create a configuration error.
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// Create a fixture-read error.
    pub fn fixture(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::FixtureRead {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias using `HarnessError`.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Kind of outbound network attempt seen by the network trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EgressKind {
    Fetch,
    Http,
    Https,
    WebSocket,
    Socket,
    Dns,
}

impl EgressKind {
    /// Stable lowercase name used in logs and evidence metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Http => "http",
            Self::Https => "https",
            Self::WebSocket => "websocket",
            Self::Socket => "socket",
            Self::Dns => "dns",
        }
    }
}

impl std::fmt::Display for EgressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by an egress transport.
#[derive(Error, Debug)]
pub enum EgressError {
    /// The network trap intercepted the attempt.
    #[error("NETWORK_TRAP: {kind} to {target} blocked during deterministic verification")]
    Blocked { kind: EgressKind, target: String },

    /// The transport does not implement this kind of call.
    #[error("egress kind {kind} is not supported by this transport")]
    Unsupported { kind: EgressKind },

    /// The real transport failed.
    #[error("egress I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EgressError {
    /// Whether the network trap produced this error.
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nondeterminism_is_not_infrastructure() {
        let err = HarnessError::Nondeterminism {
            first_divergence_index: 2,
            distinct_digests: 2,
        };
        assert!(!err.is_infrastructure());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn infrastructure_errors_exit_two() {
        let err = HarnessError::EvidenceWrite {
            path: PathBuf::from("/tmp/x.jsonl"),
            source: std::io::Error::other("disk full"),
        };
        assert!(err.is_infrastructure());
        assert_eq!(err.exit_code(), 2);
        assert!(HarnessError::invalid_config("runs").is_infrastructure());
        assert!(HarnessError::fixture("a.json", "missing").is_infrastructure());
    }

    #[test]
    fn display_messages() {
        let err = HarnessError::DuplicateCheck {
            id: "harness.clock".to_owned(),
        };
        assert_eq!(err.to_string(), "duplicate check id: harness.clock");

        let err = HarnessError::Nondeterminism {
            first_divergence_index: 3,
            distinct_digests: 2,
        };
        assert!(err.to_string().contains("run 3"));
    }

    #[test]
    fn blocked_egress_message_is_distinguishable() {
        let err = EgressError::Blocked {
            kind: EgressKind::Https,
            target: "https://example.com".to_owned(),
        };
        assert!(err.is_blocked());
        assert!(err.to_string().starts_with("NETWORK_TRAP:"));
        assert!(!EgressError::Unsupported {
            kind: EgressKind::Http
        }
        .is_blocked());
    }

    #[test]
    fn serde_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: HarnessError = parse.into();
        assert!(matches!(err, HarnessError::Serialization(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
