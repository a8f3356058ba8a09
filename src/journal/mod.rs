//! Per-connection diagnostic history and engine-wide timing statistics.
//!
//! Every diagnostic token an actor reports lands in the owning
//! connection's journal, newest first and bounded. The journal is kept
//! separately from `tracing` output so callers can inspect what happened
//! to a connection after the fact.

pub mod activity;
pub mod histogram;

pub use activity::{Activity, ActivityCounts, ActivityStats};
pub use histogram::{BinReducer, Histogram, log2_millis};

use bytes::Bytes;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    net::IpAddr,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    actors::{ConnectionId, Phase},
    errors::{ErrorNotice, MalformedMessage, ProtocolViolation},
    wire_protocol::backend::{AuthMechanism, NegotiateProtocolVersion},
};

// -----------------------------------------------------------------------------
// ----- DiagnosticToken -------------------------------------------------------

/// Something worth remembering about a connection. Server messages, local
/// protocol failures and transport trouble all end up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticToken {
    ServerError(ErrorNotice),
    ServerNotice(ErrorNotice),
    ProtocolVersion(NegotiateProtocolVersion),

    /// Frame structure disagreed with its declared length. `bytes` holds
    /// the unread buffer at the time.
    MangledData {
        phase: Phase,
        error: MalformedMessage,
        bytes: Bytes,
    },
    ProtocolViolation {
        phase: Phase,
        violation: ProtocolViolation,
        bytes: Bytes,
    },

    SslRejected,
    SslFallback,
    TlsUpgradeFailed(String),

    PasswordMissing,
    UnsupportedAuthentication(AuthMechanism),

    BackpressureOverflow {
        queued: usize,
        incoming: usize,
    },
    Timeout {
        idle_count: u32,
    },
    Lookup {
        host: String,
        address: Option<IpAddr>,
        error: Option<String>,
    },
    TransportError(String),
    NetworkClosed {
        had_error: bool,
    },
}

impl DiagnosticToken {
    /// Emit this token through `tracing` at a level matching its weight.
    pub(crate) fn trace(&self, id: ConnectionId) {
        match self {
            DiagnosticToken::ServerNotice(_)
            | DiagnosticToken::ProtocolVersion(_)
            | DiagnosticToken::Lookup { error: None, .. }
            | DiagnosticToken::NetworkClosed { had_error: false } => {
                debug!("[{id}] {self}")
            }
            DiagnosticToken::SslFallback | DiagnosticToken::Timeout { .. } => info!("[{id}] {self}"),
            DiagnosticToken::TransportError(_)
            | DiagnosticToken::TlsUpgradeFailed(_)
            | DiagnosticToken::NetworkClosed { had_error: true }
            | DiagnosticToken::Lookup { error: Some(_), .. } => error!("[{id}] {self}"),
            _ => warn!("[{id}] {self}"),
        }
    }
}

impl fmt::Display for DiagnosticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticToken::ServerError(n) => write!(f, "server error: {n}"),
            DiagnosticToken::ServerNotice(n) => write!(f, "server notice: {n}"),
            DiagnosticToken::ProtocolVersion(v) => write!(
                f,
                "server supports protocol 3.{} (unrecognized options: {})",
                v.newest_minor,
                v.unrecognized.len()
            ),
            DiagnosticToken::MangledData {
                phase,
                error,
                bytes,
            } => write!(f, "mangled data during {phase}: {error} ({} bytes)", bytes.len()),
            DiagnosticToken::ProtocolViolation {
                phase,
                violation,
                bytes,
            } => write!(
                f,
                "protocol violation during {phase}: {violation} ({} bytes)",
                bytes.len()
            ),
            DiagnosticToken::SslRejected => f.write_str("server rejected SSL"),
            DiagnosticToken::SslFallback => f.write_str("server rejected SSL; continuing in plaintext"),
            DiagnosticToken::TlsUpgradeFailed(e) => write!(f, "TLS upgrade failed: {e}"),
            DiagnosticToken::PasswordMissing => {
                f.write_str("server requested a password but none was supplied")
            }
            DiagnosticToken::UnsupportedAuthentication(m) => {
                write!(f, "unsupported authentication mechanism: {m}")
            }
            DiagnosticToken::BackpressureOverflow { queued, incoming } => write!(
                f,
                "write queue overflow: {incoming} bytes on top of {queued} queued"
            ),
            DiagnosticToken::Timeout { idle_count } => {
                write!(f, "socket timeout (#{idle_count} outside idle pool)")
            }
            DiagnosticToken::Lookup {
                host,
                address,
                error,
            } => match (address, error) {
                (_, Some(e)) => write!(f, "lookup of {host} failed: {e}"),
                (Some(addr), None) => write!(f, "resolved {host} to {addr}"),
                (None, None) => write!(f, "resolved {host}"),
            },
            DiagnosticToken::TransportError(e) => write!(f, "transport error: {e}"),
            DiagnosticToken::NetworkClosed { had_error } => {
                write!(f, "network closed (had_error={had_error})")
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Journal ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub at: Instant,
    pub token: DiagnosticToken,
}

#[derive(Debug)]
pub struct Journal {
    capacity: usize,
    history: HashMap<ConnectionId, VecDeque<JournalEntry>>,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: HashMap::new(),
        }
    }

    pub fn add(&mut self, id: ConnectionId, token: DiagnosticToken, at: Instant) {
        let entries = self.history.entry(id).or_default();
        entries.push_front(JournalEntry { at, token });
        entries.truncate(self.capacity);
    }

    /// Entries for `id`, newest first.
    pub fn history(&self, id: ConnectionId) -> Vec<JournalEntry> {
        self.history
            .get(&id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, id: ConnectionId) {
        self.history.remove(&id);
    }

    pub fn connections(&self) -> usize {
        self.history.len()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout(n: u32) -> DiagnosticToken {
        DiagnosticToken::Timeout { idle_count: n }
    }

    #[test]
    fn newest_entry_comes_first() {
        let mut journal = Journal::new(10);
        let id = ConnectionId::new(1);
        let now = Instant::now();
        journal.add(id, timeout(1), now);
        journal.add(id, timeout(2), now);

        let tokens: Vec<_> = journal.history(id).into_iter().map(|e| e.token).collect();
        assert_eq!(tokens, vec![timeout(2), timeout(1)]);
    }

    #[test]
    fn history_is_bounded() {
        let mut journal = Journal::new(3);
        let id = ConnectionId::new(7);
        let now = Instant::now();
        for n in 0..10 {
            journal.add(id, timeout(n), now);
        }

        let history = journal.history(id);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].token, timeout(9));
        assert_eq!(history[2].token, timeout(7));
    }

    #[test]
    fn connections_are_kept_apart_and_removable() {
        let mut journal = Journal::new(5);
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);
        let now = Instant::now();
        journal.add(a, DiagnosticToken::SslRejected, now);
        journal.add(b, DiagnosticToken::PasswordMissing, now);

        assert_eq!(journal.history(a).len(), 1);
        assert_eq!(journal.connections(), 2);

        journal.remove(a);
        assert!(journal.history(a).is_empty());
        assert_eq!(journal.history(b).len(), 1);
    }

    #[test]
    fn display_mentions_phase() {
        let token = DiagnosticToken::ProtocolViolation {
            phase: Phase::Boot,
            violation: ProtocolViolation::BufferStuffing { buffered: 2 },
            bytes: Bytes::from_static(b"SX"),
        };
        let shown = token.to_string();
        assert!(shown.contains("boot"), "{shown}");
        assert!(shown.contains("2 bytes"), "{shown}");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
