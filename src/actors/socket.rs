//! The socket actor: one per connection, outlives every phase.
//!
//! It owns the transport and the outbound write queue, keeps the activity
//! counters current, and forwards each transport event to whichever phase
//! actor is attached.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::{
    config::{ClientConfig, TlsOptions},
    errors::{ConnectFailure, QueryError},
    journal::{Activity, ActivityStats, DiagnosticToken},
    memory::SlabPool,
    net::{QueueOverflow, WriteQueue},
    supervisor::Residency,
    transport::{TlsError, Transport, TransportEvent},
};

use super::{
    ActorContext, AuthActor, BootActor, ConnectionId, Outbox, Phase, PhaseActor, QueryActor,
    QueryOp, SessionInfoActor, SupervisorMsg,
};

/// Resolved once the bytes of a submitted operation left the write queue.
pub type WriteAck = oneshot::Sender<Result<(), QueryError>>;

// -----------------------------------------------------------------------------
// ----- SocketIo --------------------------------------------------------------

/// Outbound half of a socket: the transport plus the queue that holds
/// writes back while the transport is over its high-water mark.
pub struct SocketIo {
    transport: Option<Box<dyn Transport>>,
    queue: WriteQueue,
    ended: bool,
    throttled_at: Option<Instant>,
    acks: Vec<WriteAck>,
    bytes_written: u64,
    last_write: Option<Instant>,
}

impl SocketIo {
    pub(crate) fn new(transport: Box<dyn Transport>, queue: WriteQueue) -> Self {
        Self {
            transport: Some(transport),
            queue,
            ended: false,
            throttled_at: None,
            acks: Vec::new(),
            bytes_written: 0,
            last_write: None,
        }
    }

    /// Write straight through unless the transport asked us to wait or older
    /// bytes are still queued. Then the bytes join the queue in order.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<(), QueueOverflow> {
        if self.ended {
            return Ok(());
        }
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        self.last_write = Some(Instant::now());

        if self.queue.must_queue() {
            return self.queue.push(bytes);
        }

        self.bytes_written += bytes.len() as u64;
        if !transport.write(bytes) {
            self.queue.throttle();
            self.throttled_at.get_or_insert_with(Instant::now);
        }
        Ok(())
    }

    /// Flush queued chunks after a drain. Returns how long writes were held
    /// back once the queue is empty again.
    pub(crate) fn on_drain(&mut self) -> Option<Duration> {
        self.queue.release_throttle();
        let transport = self.transport.as_mut()?;

        while let Some(chunk) = self.queue.pop_chunk() {
            self.bytes_written += chunk.len() as u64;
            if !transport.write(&chunk) {
                self.queue.throttle();
                return None;
            }
        }

        for ack in self.acks.drain(..) {
            let _ = ack.send(Ok(()));
        }
        self.throttled_at.take().map(|since| since.elapsed())
    }

    /// Resolve `ack` now if nothing is held back, or after the next flush.
    pub(crate) fn ack_when_flushed(&mut self, ack: WriteAck) {
        if self.queue.must_queue() {
            self.acks.push(ack);
        } else {
            let _ = ack.send(Ok(()));
        }
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn is_throttled(&self) -> bool {
        self.queue.must_queue()
    }

    pub(crate) fn queued_bytes(&self) -> usize {
        self.queue.queued_bytes()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        if let Some(transport) = self.transport.as_mut() {
            transport.set_timeout(timeout);
        }
    }

    /// Push whatever is queued regardless of backpressure.
    fn flush_all(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        while let Some(chunk) = self.queue.pop_chunk() {
            self.bytes_written += chunk.len() as u64;
            transport.write(&chunk);
        }
    }

    fn end(&mut self, failure: &ConnectFailure) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.queue.clear();
        for ack in self.acks.drain(..) {
            let _ = ack.send(Err(QueryError::Closed(failure.clone())));
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.end();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionRecord ------------------------------------------------------

/// Bookkeeping the supervisor keeps per connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub home: Residency,
    pub residency: Residency,
    pub since: Instant,
    pub created_at: Instant,
    pub jitter: Duration,
    pub last_activity: Instant,
    pub last_read: Option<Instant>,
    pub last_write: Option<Instant>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Consecutive timeouts outside the idle pool.
    pub idle_count: u32,
    pub tls: bool,
}

// -----------------------------------------------------------------------------
// ----- SocketEnv -------------------------------------------------------------

/// Supervisor state a socket touches while handling one event.
pub struct SocketEnv<'a> {
    pub slabs: &'a SlabPool,
    pub activity: &'a mut ActivityStats,
    pub outbox: &'a mut Outbox,
}

// -----------------------------------------------------------------------------
// ----- AttachedActor ---------------------------------------------------------

#[derive(Debug, Default)]
pub enum AttachedActor {
    #[default]
    Detached,
    Boot(BootActor),
    Auth(AuthActor),
    SessionInfo(SessionInfoActor),
    Query(QueryActor),
}

impl AttachedActor {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            AttachedActor::Detached => None,
            AttachedActor::Boot(a) => Some(a.phase()),
            AttachedActor::Auth(a) => Some(a.phase()),
            AttachedActor::SessionInfo(a) => Some(a.phase()),
            AttachedActor::Query(a) => Some(a.phase()),
        }
    }

    fn as_actor(&mut self) -> Option<&mut dyn PhaseActor> {
        match self {
            AttachedActor::Detached => None,
            AttachedActor::Boot(a) => Some(a),
            AttachedActor::Auth(a) => Some(a),
            AttachedActor::SessionInfo(a) => Some(a),
            AttachedActor::Query(a) => Some(a),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SocketActor -----------------------------------------------------------

pub struct SocketActor {
    record: ConnectionRecord,
    config: Arc<ClientConfig>,
    io: SocketIo,
    attached: AttachedActor,
    timeout: Option<Duration>,
    upgrade_started: Option<Instant>,
    failure: Option<ConnectFailure>,
}

// -----------------------------------------------------------------------------
// ----- SocketActor: Static ---------------------------------------------------

impl SocketActor {
    pub(crate) fn new(
        id: ConnectionId,
        transport: Box<dyn Transport>,
        config: Arc<ClientConfig>,
        queue: WriteQueue,
        boot: BootActor,
        now: Instant,
    ) -> Self {
        Self {
            record: ConnectionRecord {
                id,
                home: Residency::Idle,
                residency: Residency::Created,
                since: now,
                created_at: now,
                jitter: Duration::ZERO,
                last_activity: now,
                last_read: None,
                last_write: None,
                bytes_read: 0,
                bytes_written: 0,
                idle_count: 0,
                tls: false,
            },
            config,
            io: SocketIo::new(transport, queue),
            attached: AttachedActor::Boot(boot),
            timeout: None,
            upgrade_started: None,
            failure: None,
        }
    }

    pub(crate) fn with_home(mut self, home: Residency) -> Self {
        self.record.home = home;
        self
    }

    pub(crate) fn with_jitter(mut self, jitter: Duration) -> Self {
        self.record.jitter = jitter;
        self
    }

    /// Idle timeout armed once the transport connects.
    pub(crate) fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- SocketActor: Public ---------------------------------------------------

impl SocketActor {
    pub fn id(&self) -> ConnectionId {
        self.record.id
    }

    pub fn record(&self) -> &ConnectionRecord {
        &self.record
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn phase(&self) -> Option<Phase> {
        self.attached.phase()
    }

    pub fn failure(&self) -> Option<&ConnectFailure> {
        self.failure.as_ref()
    }

    pub fn is_ended(&self) -> bool {
        self.failure.is_some()
    }

    pub fn is_throttled(&self) -> bool {
        self.io.is_throttled()
    }

    pub fn queued_bytes(&self) -> usize {
        self.io.queued_bytes()
    }

    pub(crate) fn handle_event(&mut self, event: TransportEvent, env: &mut SocketEnv<'_>) {
        let now = Instant::now();
        trace!("[{}] transport {}", self.record.id, event.name());

        if self.is_ended() {
            // only the final close still counts once the connection ended
            if let TransportEvent::Close { .. } = event {
                env.activity.counts.close += 1;
                env.activity.record(Activity::Close, self.since_activity(now));
            }
            return;
        }

        match event {
            TransportEvent::Connect => {
                env.activity
                    .record(Activity::Connect, now.saturating_duration_since(self.record.created_at));
                self.io.set_timeout(self.timeout);
                self.dispatch(env, |actor, ctx| actor.on_connect(ctx));
            }
            TransportEvent::SecureConnect => {
                if let Some(started) = self.upgrade_started.take() {
                    env.activity
                        .record(Activity::SslConnect, now.saturating_duration_since(started));
                }
                self.record.tls = true;
                self.dispatch(env, |actor, ctx| actor.on_secure_connect(ctx));
            }
            TransportEvent::Data(bytes) => {
                env.activity.record(Activity::Network, self.since_activity(now));
                self.record.bytes_read += bytes.len() as u64;
                self.record.last_read = Some(now);
                self.dispatch(env, |actor, ctx| actor.on_data(&bytes, ctx));
                env.activity.record(Activity::IomCode, now.elapsed());
            }
            TransportEvent::Drain => {
                if let Some(waited) = self.io.on_drain() {
                    env.activity.record(Activity::Drained, waited);
                }
            }
            TransportEvent::Timeout => self.on_timeout(env),
            TransportEvent::Lookup {
                host,
                address,
                error,
            } => {
                env.outbox.push(SupervisorMsg::Token(DiagnosticToken::Lookup {
                    host,
                    address,
                    error,
                }));
            }
            TransportEvent::Finish => {
                env.activity.record(Activity::Finish, self.since_activity(now));
            }
            TransportEvent::End => {
                env.activity.counts.end += 1;
                env.activity.record(Activity::End, self.since_activity(now));
            }
            TransportEvent::Close { had_error } => {
                env.activity.counts.close += 1;
                env.activity.record(Activity::Close, self.since_activity(now));
                env.outbox
                    .push(SupervisorMsg::Token(DiagnosticToken::NetworkClosed { had_error }));
                env.outbox.push(SupervisorMsg::Closed { had_error });
            }
            TransportEvent::Error(reason) => {
                env.activity.counts.error += 1;
                env.outbox
                    .push(SupervisorMsg::Token(DiagnosticToken::TransportError(reason.clone())));
                env.outbox
                    .push(SupervisorMsg::End(ConnectFailure::Transport(reason)));
            }
        }

        self.record.last_activity = now;
        self.sync_io();
    }

    /// Attach the next phase actor and start it.
    pub(crate) fn attach(&mut self, actor: AttachedActor, env: &mut SocketEnv<'_>) {
        if self.is_ended() {
            return;
        }
        self.attached = actor;
        debug!(
            "[{}] attached {}",
            self.record.id,
            self.attached.phase().map_or("nothing", Phase::as_str)
        );
        self.dispatch(env, |actor, ctx| actor.start(ctx));
        self.sync_io();
    }

    /// Swap the plain transport for a TLS one. Completion arrives later as
    /// a secure connect event.
    pub(crate) fn upgrade_tls(&mut self, tls: &TlsOptions) -> Result<(), TlsError> {
        let transport = self.io.transport.take().ok_or(TlsError::Closed)?;
        let upgraded = transport.upgrade(tls)?;
        self.io.transport = Some(upgraded);
        self.upgrade_started = Some(Instant::now());
        Ok(())
    }

    /// Hand `op` to the query actor. `ack` resolves once its bytes are out
    /// of the write queue.
    pub(crate) fn submit(&mut self, op: QueryOp, ack: WriteAck, env: &mut SocketEnv<'_>) {
        if let Some(failure) = &self.failure {
            let _ = ack.send(Err(QueryError::Closed(failure.clone())));
            return;
        }
        let AttachedActor::Query(actor) = &mut self.attached else {
            let _ = ack.send(Err(QueryError::NotReady(self.record.id.get())));
            return;
        };

        let result = {
            let mut ctx = ActorContext::new(self.record.id, &mut self.io, env.slabs, &mut *env.outbox);
            actor.submit(op, &mut ctx)
        };
        match result {
            Ok(()) => self.io.ack_when_flushed(ack),
            Err(e) => {
                let _ = ack.send(Err(e));
            }
        }
        self.sync_io();
    }

    /// Tear the connection down. Returns false if it already ended.
    pub(crate) fn end(&mut self, failure: ConnectFailure) -> bool {
        if self.is_ended() {
            return false;
        }
        debug!("[{}] ending: {failure}", self.record.id);

        if failure == ConnectFailure::Terminated {
            self.io.flush_all();
        }
        if let Some(actor) = self.attached.as_actor() {
            actor.on_end(&failure);
        }
        self.attached = AttachedActor::Detached;
        self.io.end(&failure);
        self.io.set_timeout(None);
        self.failure = Some(failure);
        self.sync_io();
        true
    }

    pub(crate) fn set_residency(&mut self, residency: Residency, now: Instant) {
        self.record.residency = residency;
        self.record.since = now;
        if residency == Residency::Idle {
            self.record.idle_count = 0;
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SocketActor: Private --------------------------------------------------

impl SocketActor {
    fn dispatch(
        &mut self,
        env: &mut SocketEnv<'_>,
        f: impl FnOnce(&mut dyn PhaseActor, &mut ActorContext<'_>),
    ) {
        let Some(actor) = self.attached.as_actor() else {
            trace!("[{}] no actor attached", self.record.id);
            return;
        };
        let mut ctx = ActorContext::new(self.record.id, &mut self.io, env.slabs, &mut *env.outbox);
        f(actor, &mut ctx);
    }

    /// Idle sockets may sit quietly forever. Anywhere else a timeout is
    /// worth a token, and the timer is re-armed.
    fn on_timeout(&mut self, env: &mut SocketEnv<'_>) {
        if self.record.residency == Residency::Idle {
            self.record.idle_count = 0;
            return;
        }

        self.record.idle_count += 1;
        env.activity.counts.idle += 1;
        self.io.set_timeout(self.timeout);
        warn!(
            "[{}] no traffic in {} ({} times)",
            self.record.id, self.record.residency, self.record.idle_count
        );
        env.outbox.push(SupervisorMsg::Token(DiagnosticToken::Timeout {
            idle_count: self.record.idle_count,
        }));
    }

    fn since_activity(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.record.last_activity)
    }

    fn sync_io(&mut self) {
        self.record.bytes_written = self.io.bytes_written;
        self.record.last_write = self.io.last_write;
    }
}

impl std::fmt::Debug for SocketActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketActor")
            .field("record", &self.record)
            .field("phase", &self.phase())
            .field("failure", &self.failure)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
