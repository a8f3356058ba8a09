//! Per-connection protocol actors.
//!
//! A connection walks boot, authentication, session info and query in that
//! order. Each phase is a small state machine that owns the accumulation
//! buffer while it is attached to the socket, consumes what it understands
//! and reports back to the supervisor through an outbox. Hand-off means
//! emitting the buffer in a message; the supervisor attaches the next
//! actor with it.

pub mod auth;
pub mod boot;
pub mod query;
pub mod session_info;
pub mod socket;

pub use auth::AuthActor;
pub use boot::{BootActor, BootState};
pub use query::{QueryActor, QueryEvent, QueryEvents, QueryOp};
pub use session_info::{SessionInfo, SessionInfoActor};
pub use socket::{AttachedActor, ConnectionRecord, SocketActor, SocketEnv, WriteAck};

use bytes::Bytes;
use smallvec::SmallVec;
use std::fmt;
use tracing::trace;

use crate::{
    errors::{ConnectFailure, EncodeError, MalformedMessage, ProtocolViolation},
    journal::DiagnosticToken,
    memory::SlabPool,
    net::AccumulationBuffer,
    supervisor::Residency,
    wire_protocol::FrontendMessage,
};

use socket::SocketIo;

// -----------------------------------------------------------------------------
// ----- ConnectionId ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// -----------------------------------------------------------------------------
// ----- Phase -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Boot,
    Authentication,
    SessionInfo,
    Query,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Boot => "boot",
            Phase::Authentication => "authentication",
            Phase::SessionInfo => "session info",
            Phase::Query => "query",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- SupervisorMsg ---------------------------------------------------------

/// Everything an actor can ask of the supervisor.
#[derive(Debug)]
pub enum SupervisorMsg {
    Token(DiagnosticToken),
    /// Server accepted SSL; wrap the transport.
    UpgradeTls,
    BootEnded {
        buffer: AccumulationBuffer,
        tls: bool,
    },
    AuthEnded {
        buffer: AccumulationBuffer,
    },
    SessionInfoEnded {
        buffer: AccumulationBuffer,
        info: SessionInfo,
    },
    Migrate(Residency),
    End(ConnectFailure),
    Closed {
        had_error: bool,
    },
}

/// Messages produced while handling one event. Rarely more than a few.
pub type Outbox = SmallVec<[SupervisorMsg; 4]>;

// -----------------------------------------------------------------------------
// ----- ActorContext ----------------------------------------------------------

/// What an actor may touch while handling one event.
pub struct ActorContext<'a> {
    pub id: ConnectionId,
    io: &'a mut SocketIo,
    slabs: &'a SlabPool,
    outbox: &'a mut Outbox,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(
        id: ConnectionId,
        io: &'a mut SocketIo,
        slabs: &'a SlabPool,
        outbox: &'a mut Outbox,
    ) -> Self {
        Self {
            id,
            io,
            slabs,
            outbox,
        }
    }

    /// Encode `msg` into a slab, hand it to the socket and give the slab
    /// back. Queue overflow ends the connection; the caller sees `Ok`.
    pub fn send(&mut self, msg: &FrontendMessage<'_>) -> Result<(), EncodeError> {
        let encoded = msg.encode(self.slabs)?;
        trace!("[{}] -> {} ({} bytes)", self.id, msg.name(), encoded.len());

        let written = self.io.write(encoded.as_bytes());
        encoded.release(self.slabs);

        if let Err(overflow) = written {
            self.report(DiagnosticToken::BackpressureOverflow {
                queued: overflow.queued,
                incoming: overflow.incoming,
            });
            self.end(ConnectFailure::BackpressureOverflow);
        }
        Ok(())
    }

    pub fn report(&mut self, token: DiagnosticToken) {
        self.outbox.push(SupervisorMsg::Token(token));
    }

    pub fn emit(&mut self, msg: SupervisorMsg) {
        self.outbox.push(msg);
    }

    pub fn end(&mut self, failure: impl Into<ConnectFailure>) {
        self.outbox.push(SupervisorMsg::End(failure.into()));
    }

    /// Report a protocol violation with the unread bytes and end.
    pub fn violation(&mut self, phase: Phase, violation: ProtocolViolation, bytes: Bytes) {
        self.report(DiagnosticToken::ProtocolViolation {
            phase,
            violation: violation.clone(),
            bytes,
        });
        self.end(violation);
    }

    /// Report a malformed frame with the unread bytes and end.
    pub fn mangled(&mut self, phase: Phase, error: MalformedMessage, bytes: Bytes) {
        self.report(DiagnosticToken::MangledData {
            phase,
            error: error.clone(),
            bytes,
        });
        self.end(error);
    }

    pub fn is_ended(&self) -> bool {
        self.io.is_ended()
    }
}

// -----------------------------------------------------------------------------
// ----- PhaseActor ------------------------------------------------------------

/// Event hooks every phase implements. Events a phase does not expect are
/// protocol violations by default.
pub trait PhaseActor {
    fn phase(&self) -> Phase;

    /// Called once, right after the actor is attached.
    fn start(&mut self, _ctx: &mut ActorContext<'_>) {}

    fn on_connect(&mut self, ctx: &mut ActorContext<'_>) {
        unexpected(self.phase(), "connect", ctx);
    }

    fn on_secure_connect(&mut self, ctx: &mut ActorContext<'_>) {
        unexpected(self.phase(), "secure connect", ctx);
    }

    fn on_data(&mut self, data: &[u8], ctx: &mut ActorContext<'_>);

    /// The connection is over. Nothing more will be delivered.
    fn on_end(&mut self, _failure: &ConnectFailure) {}
}

fn unexpected(phase: Phase, event: &'static str, ctx: &mut ActorContext<'_>) {
    ctx.violation(
        phase,
        ProtocolViolation::UnexpectedEvent { phase, event },
        Bytes::new(),
    );
}

/// Copy of the unread bytes, kept for diagnostics.
pub(crate) fn unread_copy(buffer: &AccumulationBuffer) -> Bytes {
    Bytes::copy_from_slice(buffer.unread())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::*;
    use crate::{
        net::WriteQueue,
        transport::mock::{MockHandle, MockTransport},
    };

    pub use crate::wire_protocol::backend::test_support::frame;

    /// One actor's world: a mock socket, a slab pool and an outbox.
    pub struct Harness {
        pub io: SocketIo,
        pub slabs: Arc<SlabPool>,
        pub outbox: Outbox,
        pub wire: MockHandle,
    }

    impl Harness {
        pub fn new() -> Self {
            let (transport, wire) = MockTransport::new();
            Self {
                io: SocketIo::new(Box::new(transport), WriteQueue::default()),
                slabs: Arc::new(SlabPool::new()),
                outbox: Outbox::new(),
                wire,
            }
        }

        pub fn buffer(&self, capacity: usize) -> AccumulationBuffer {
            AccumulationBuffer::new(Arc::clone(&self.slabs), capacity)
        }

        pub fn ctx(&mut self) -> ActorContext<'_> {
            ActorContext::new(
                ConnectionId::new(1),
                &mut self.io,
                &self.slabs,
                &mut self.outbox,
            )
        }

        pub fn take(&mut self) -> Vec<SupervisorMsg> {
            self.outbox.drain(..).collect()
        }
    }

    pub fn tokens(msgs: &[SupervisorMsg]) -> Vec<&DiagnosticToken> {
        msgs.iter()
            .filter_map(|m| match m {
                SupervisorMsg::Token(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn ended_with(msgs: &[SupervisorMsg]) -> Option<&ConnectFailure> {
        msgs.iter().find_map(|m| match m {
            SupervisorMsg::End(f) => Some(f),
            _ => None,
        })
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
