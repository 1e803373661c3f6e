//! Network trap.
//!
//! While armed, every outbound attempt routed through the trap is checked
//! against an explicit allow list. Anything not allowed is recorded and
//! rejected with [`EgressError::Blocked`] before it reaches the wrapped
//! transport. Disarmed, the trap is a pass-through.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{EgressError, EgressKind};

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// One outbound attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressCall {
    pub kind: EgressKind,
    /// URL, `host:port`, bare host name or relative path.
    pub target: String,
    pub method: Option<String>,
}

impl EgressCall {
    pub fn fetch(url: impl Into<String>, method: impl Into<String>) -> Self {
        let target = url.into();
        let kind = if target.starts_with("https://") {
            EgressKind::Https
        } else if target.starts_with("http://") {
            EgressKind::Http
        } else if target.starts_with("ws://") || target.starts_with("wss://") {
            EgressKind::WebSocket
        } else {
            EgressKind::Fetch
        };
        Self {
            kind,
            target,
            method: Some(method.into()),
        }
    }

    pub fn dns(host: impl Into<String>) -> Self {
        Self {
            kind: EgressKind::Dns,
            target: host.into(),
            method: None,
        }
    }

    pub fn socket(addr: impl Into<String>) -> Self {
        Self {
            kind: EgressKind::Socket,
            target: addr.into(),
            method: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressResponse {
    Resolved(Vec<std::net::IpAddr>),
    Connected(std::net::SocketAddr),
    Http { status: u16, body: String },
}

/// Outbound transport.
pub trait Egress: Send + Sync {
    /// Perform the call.
    ///
    /// # Errors
    ///
    /// Transport-specific; see [`EgressError`].
    fn dispatch(&self, call: &EgressCall) -> Result<EgressResponse, EgressError>;
}

/// Real transport: DNS and TCP via `std::net`. HTTP is not implemented.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEgress;

impl Egress for SystemEgress {
    fn dispatch(&self, call: &EgressCall) -> Result<EgressResponse, EgressError> {
        match call.kind {
            EgressKind::Dns => {
                let addrs = (call.target.as_str(), 0_u16)
                    .to_socket_addrs()?
                    .map(|a| a.ip())
                    .collect();
                Ok(EgressResponse::Resolved(addrs))
            }
            EgressKind::Socket => {
                let stream = TcpStream::connect(call.target.as_str())?;
                Ok(EgressResponse::Connected(stream.peer_addr()?))
            }
            kind => Err(EgressError::Unsupported { kind }),
        }
    }
}

// ---------------------------------------------------------------------------
// Allow rules
// ---------------------------------------------------------------------------

/// Explicitly enumerated exceptions to the trap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "host", rename_all = "camelCase")]
pub enum AllowRule {
    /// Same-origin relative paths (`/api/...`).
    RelativePath,
    /// A loopback host, matched exactly against the call's host.
    Loopback(String),
}

impl AllowRule {
    pub fn loopback_defaults() -> Vec<Self> {
        ["localhost", "127.0.0.1", "::1"]
            .into_iter()
            .map(|h| Self::Loopback(h.to_owned()))
            .collect()
    }

    pub fn permits(&self, call: &EgressCall) -> bool {
        match self {
            Self::RelativePath => {
                call.target.starts_with('/') && !call.target.starts_with("//")
            }
            Self::Loopback(host) => host_of(&call.target).eq_ignore_ascii_case(host),
        }
    }
}

/// Host portion of a URL, `host:port` pair or bare host.
fn host_of(target: &str) -> &str {
    let rest = target.split_once("://").map_or(target, |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);

    if let Some(bracketed) = authority.strip_prefix('[') {
        return bracketed.split(']').next().unwrap_or(bracketed);
    }
    // More than one colon and no brackets: bare IPv6 literal.
    if authority.matches(':').count() > 1 {
        return authority;
    }
    authority.split(':').next().unwrap_or(authority)
}

// ---------------------------------------------------------------------------
// Trap
// ---------------------------------------------------------------------------

/// A blocked attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedCall {
    /// Position among blocked calls since the last clear.
    pub sequence: u64,
    pub kind: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Logical (frozen-clock) time of the attempt.
    pub timestamp_ms: u64,
}

#[derive(Debug, Default)]
struct TrapState {
    armed: bool,
    calls: Vec<RecordedCall>,
}

pub struct NetworkTrap {
    inner: Arc<dyn Egress>,
    allow: Vec<AllowRule>,
    state: Mutex<TrapState>,
}

impl std::fmt::Debug for NetworkTrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("NetworkTrap")
            .field("allow", &self.allow)
            .field("armed", &state.armed)
            .field("calls", &state.calls.len())
            .finish_non_exhaustive()
    }
}

impl NetworkTrap {
    /// Wrap `inner`. The trap starts disarmed.
    #[must_use]
    pub fn new(inner: Arc<dyn Egress>, allow: Vec<AllowRule>) -> Self {
        Self {
            inner,
            allow,
            state: Mutex::new(TrapState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm and drop any previously recorded calls.
    pub fn arm(&self) {
        let mut state = self.lock();
        state.armed = true;
        state.calls.clear();
    }

    /// Restore direct access to the wrapped transport.
    pub fn disarm(&self) {
        self.lock().armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    pub fn allow_rules(&self) -> &[AllowRule] {
        &self.allow
    }

    /// Route `call` through the trap at logical time `now_ms`.
    ///
    /// # Errors
    ///
    /// [`EgressError::Blocked`] when armed and no allow rule matches;
    /// otherwise whatever the wrapped transport returns.
    pub fn dispatch(&self, call: &EgressCall, now_ms: u64) -> Result<EgressResponse, EgressError> {
        {
            let mut state = self.lock();
            if state.armed && !self.allow.iter().any(|rule| rule.permits(call)) {
                let sequence = state.calls.len() as u64;
                state.calls.push(RecordedCall {
                    sequence,
                    kind: call.kind.as_str().to_owned(),
                    target: call.target.clone(),
                    method: call.method.clone(),
                    timestamp_ms: now_ms,
                });
                warn!(
                    kind = %call.kind,
                    target = %call.target,
                    sequence,
                    "network trap blocked egress"
                );
                return Err(EgressError::Blocked {
                    kind: call.kind,
                    target: call.target.clone(),
                });
            }
        }
        debug!(kind = %call.kind, target = %call.target, "egress passed through trap");
        self.inner.dispatch(call)
    }

    /// Blocked calls, in attempt order.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn recorded_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    /// Fail with a listing of every blocked call, if any.
    ///
    /// # Errors
    ///
    /// Returns the rendered listing when at least one call was recorded.
    pub fn assert_no_calls(&self) -> Result<(), String> {
        let state = self.lock();
        if state.calls.is_empty() {
            return Ok(());
        }
        let listing: Vec<String> = state
            .calls
            .iter()
            .map(|c| {
                format!(
                    "  {} {} {}",
                    c.kind,
                    c.method.as_deref().unwrap_or("-"),
                    c.target
                )
            })
            .collect();
        Err(format!(
            "{} network call(s) attempted during deterministic verification:\n{}",
            state.calls.len(),
            listing.join("\n")
        ))
    }
}
