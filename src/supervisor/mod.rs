//! The supervisor owns every socket, the residency lists and the journal.
//!
//! It is plain synchronous state. The engine task feeds it transport events
//! and caller commands one at a time; everything an actor asks for comes
//! back as [`SupervisorMsg`]s and is routed here until the work runs dry.

pub mod residency;

pub use residency::{Migration, PoolHint, Residency, ResidencyLists};

use rand::Rng;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::{
    actors::{
        AttachedActor, AuthActor, BootActor, ConnectionId, ConnectionRecord, Outbox, QueryActor,
        QueryEvents, QueryOp, SessionInfo, SessionInfoActor, SocketActor, SocketEnv,
        SupervisorMsg, WriteAck,
    },
    config::{ClientConfig, ConfigSource, EngineSettings, SslFallback, deny_fallback},
    errors::{ConnectError, ConnectFailure, QueryError},
    journal::{ActivityStats, DiagnosticToken, Histogram, Journal, JournalEntry},
    memory::{SlabPool, SlabStats},
    net::{AccumulationBuffer, WriteQueue},
    transport::{ConnectTarget, TransportEvent, TransportFactory},
    types::DecoderRegistry,
};

/// Resolves once the connection reaches the query phase or fails.
pub type ReadyReply = oneshot::Sender<Result<ReadyConnection, ConnectError>>;

// -----------------------------------------------------------------------------
// ----- ConnectPlan -----------------------------------------------------------

/// Everything decided about a connection before its socket exists.
#[derive(Debug, Clone)]
pub struct ConnectPlan {
    pub id: ConnectionId,
    pub hint: PoolHint,
    pub config: Arc<ClientConfig>,
    pub ssl: bool,
    pub allow_fallback: bool,
    pub jitter: Duration,
}

// -----------------------------------------------------------------------------
// ----- ReadyConnection -------------------------------------------------------

#[derive(Debug)]
pub struct ReadyConnection {
    pub id: ConnectionId,
    pub session: SessionInfo,
    pub events: QueryEvents,
}

// -----------------------------------------------------------------------------
// ----- Snapshot --------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub residency: Residency,
    pub connections: usize,
    /// Time connections spent in this pool before leaving it.
    pub residence: Histogram,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub pools: Vec<PoolStats>,
    pub activity: ActivityStats,
    pub slabs: SlabStats,
}

impl Snapshot {
    pub fn pool(&self, residency: Residency) -> &PoolStats {
        &self.pools[residency.index()]
    }
}

// -----------------------------------------------------------------------------
// ----- Supervisor ------------------------------------------------------------

struct Pending {
    reply: ReadyReply,
    tokens: Vec<DiagnosticToken>,
}

pub struct Supervisor {
    settings: EngineSettings,
    configs: Arc<dyn ConfigSource>,
    fallback: SslFallback,
    factory: Box<dyn TransportFactory>,
    slabs: Arc<SlabPool>,
    decoders: Arc<DecoderRegistry>,
    sockets: HashMap<ConnectionId, SocketActor>,
    lists: ResidencyLists,
    residence: [Histogram; 5],
    activity: ActivityStats,
    pending: HashMap<ConnectionId, Pending>,
    journal: Journal,
    next_id: u64,
}

// -----------------------------------------------------------------------------
// ----- Supervisor: Static ----------------------------------------------------

impl Supervisor {
    pub fn new(
        settings: EngineSettings,
        configs: Arc<dyn ConfigSource>,
        factory: Box<dyn TransportFactory>,
    ) -> Self {
        let slabs = if settings.slab_preallocate.is_empty() {
            SlabPool::global()
        } else {
            Arc::new(SlabPool::with_preallocated(&settings.slab_preallocate))
        };

        Self {
            journal: Journal::new(settings.journal_capacity),
            settings,
            configs,
            fallback: deny_fallback(),
            factory,
            slabs,
            decoders: Arc::new(DecoderRegistry::with_defaults()),
            sockets: HashMap::new(),
            lists: ResidencyLists::new(),
            residence: Default::default(),
            activity: ActivityStats::default(),
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn with_fallback(mut self, fallback: SslFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    pub fn with_slabs(mut self, slabs: Arc<SlabPool>) -> Self {
        self.slabs = slabs;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- Supervisor: Connections -----------------------------------------------

impl Supervisor {
    /// First half of `add_connection`: validate and decide, without any I/O.
    pub fn prepare(&mut self, hint: PoolHint) -> Result<ConnectPlan, ConnectError> {
        let config = self.configs.config_for(hint);
        config.validate()?;

        let ssl = config.wants_tls();
        let allow_fallback = ssl && (self.fallback)(hint, &config);

        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        Ok(ConnectPlan {
            id,
            hint,
            config,
            ssl,
            allow_fallback,
            jitter: self.jitter(),
        })
    }

    /// Second half of `add_connection`, after the jitter: create the socket
    /// and start booting.
    pub fn open(&mut self, plan: ConnectPlan, reply: ReadyReply) {
        let now = Instant::now();
        let id = plan.id;
        let target = ConnectTarget {
            host: self.settings.host.clone(),
            port: self.settings.port,
        };
        debug!(
            "[{id}] connecting to {}:{} (ssl={}, fallback={}, jitter={:?})",
            target.host, target.port, plan.ssl, plan.allow_fallback, plan.jitter
        );

        self.lists.insert(id, Residency::Created, now);
        self.pending.insert(
            id,
            Pending {
                reply,
                tokens: Vec::new(),
            },
        );

        let transport = self.factory.connect(id, &target);
        let boot = BootActor::new(
            plan.ssl,
            plan.allow_fallback,
            AccumulationBuffer::new(Arc::clone(&self.slabs), self.settings.boot_buffer_size)
                .with_frame_limit(self.settings.max_frame_size),
        );
        let queue = WriteQueue::new(
            self.settings.write_queue_capacity,
            self.settings.write_chunk_size,
        );
        let socket = SocketActor::new(id, transport, plan.config, queue, boot, now)
            .with_home(plan.hint.home())
            .with_jitter(plan.jitter)
            .with_timeout(self.settings.socket_timeout);
        self.sockets.insert(id, socket);
    }

    pub fn handle_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        if !self.sockets.contains_key(&id) {
            trace!("[{id}] {} for unknown connection", event.name());
            return;
        }
        let outbox = self.with_socket(id, |socket, env| socket.handle_event(event, env));
        self.route(id, outbox);
    }

    /// Run `op` on a ready connection.
    pub fn query(&mut self, id: ConnectionId, op: QueryOp, ack: WriteAck) {
        if !self.sockets.contains_key(&id) {
            let _ = ack.send(Err(QueryError::NotReady(id.get())));
            return;
        }
        let outbox = self.with_socket(id, |socket, env| socket.submit(op, ack, env));
        self.route(id, outbox);
    }

    /// End every connection; pending futures reject.
    pub fn shutdown(&mut self) {
        let ids: Vec<_> = self.sockets.keys().copied().collect();
        for id in ids {
            self.end_connection(id, ConnectFailure::EngineStopped);
        }
    }

    /// Drop connections resting in the terminal pool. Returns how many.
    pub fn reap_terminal(&mut self) -> usize {
        let now = Instant::now();
        let dead = self.lists.members(Residency::Terminal);
        for &id in &dead {
            if let Some(m) = self.lists.remove(id, now) {
                self.residence[m.from.index()].record(m.resident);
            }
            self.sockets.remove(&id);
            self.journal.remove(id);
        }
        if !dead.is_empty() {
            debug!("reaped {} terminal connections", dead.len());
        }
        dead.len()
    }
}

// -----------------------------------------------------------------------------
// ----- Supervisor: Inspection ------------------------------------------------

impl Supervisor {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pools: Residency::ALL
                .iter()
                .map(|&residency| PoolStats {
                    residency,
                    connections: self.lists.len(residency),
                    residence: self.residence[residency.index()].clone(),
                })
                .collect(),
            activity: self.activity.clone(),
            slabs: self.slabs.stats(),
        }
    }

    pub fn journal(&self, id: ConnectionId) -> Vec<JournalEntry> {
        self.journal.history(id)
    }

    pub fn pool_of(&self, id: ConnectionId) -> Option<Residency> {
        self.lists.pool_of(id)
    }

    pub fn record(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.sockets.get(&id).map(SocketActor::record)
    }

    pub fn socket(&self, id: ConnectionId) -> Option<&SocketActor> {
        self.sockets.get(&id)
    }

    pub fn lists(&self) -> &ResidencyLists {
        &self.lists
    }

    pub fn activity(&self) -> &ActivityStats {
        &self.activity
    }

    pub fn slabs(&self) -> &Arc<SlabPool> {
        &self.slabs
    }
}

// -----------------------------------------------------------------------------
// ----- Supervisor: Routing ---------------------------------------------------

impl Supervisor {
    /// Handle `outbox` and everything handling it produces, in order.
    fn route(&mut self, id: ConnectionId, outbox: Outbox) {
        let mut work: VecDeque<SupervisorMsg> = outbox.into_iter().collect();
        while let Some(msg) = work.pop_front() {
            work.extend(self.dispatch(id, msg));
        }
    }

    fn dispatch(&mut self, id: ConnectionId, msg: SupervisorMsg) -> Outbox {
        match msg {
            SupervisorMsg::Token(token) => {
                self.record_token(id, token);
                Outbox::new()
            }
            SupervisorMsg::UpgradeTls => self.upgrade_tls(id),
            SupervisorMsg::BootEnded { buffer, tls } => {
                debug!("[{id}] boot done (tls={tls})");
                let Some(config) = self.sockets.get(&id).map(|s| Arc::clone(s.config())) else {
                    return Outbox::new();
                };
                let buffer = buffer.into_phase(self.settings.accumulation_buffer_size);
                let auth = AttachedActor::Auth(AuthActor::new(config, buffer));
                self.with_socket(id, |socket, env| socket.attach(auth, env))
            }
            SupervisorMsg::AuthEnded { buffer } => {
                let actor = AttachedActor::SessionInfo(SessionInfoActor::new(buffer));
                self.with_socket(id, |socket, env| socket.attach(actor, env))
            }
            SupervisorMsg::SessionInfoEnded { buffer, info } => self.ready(id, buffer, info),
            SupervisorMsg::Migrate(to) => {
                self.migrate(id, to);
                Outbox::new()
            }
            SupervisorMsg::End(failure) => {
                self.end_connection(id, failure);
                Outbox::new()
            }
            SupervisorMsg::Closed { had_error } => {
                self.end_connection(id, ConnectFailure::Closed { had_error });
                Outbox::new()
            }
        }
    }

    fn upgrade_tls(&mut self, id: ConnectionId) -> Outbox {
        let mut outbox = Outbox::new();
        let Some(socket) = self.sockets.get_mut(&id) else {
            return outbox;
        };

        let result = match socket.config().tls.clone() {
            Some(tls) => socket.upgrade_tls(&tls).map_err(|e| e.to_string()),
            None => Err("no TLS options configured".to_string()),
        };
        if let Err(reason) = result {
            warn!("[{id}] TLS upgrade failed: {reason}");
            outbox.push(SupervisorMsg::Token(DiagnosticToken::TlsUpgradeFailed(
                reason.clone(),
            )));
            outbox.push(SupervisorMsg::End(ConnectFailure::TlsUpgrade(reason)));
        }
        outbox
    }

    /// Session info is complete: attach the query actor, move the
    /// connection to its home pool and resolve the caller.
    fn ready(&mut self, id: ConnectionId, buffer: AccumulationBuffer, info: SessionInfo) -> Outbox {
        let Some(home) = self.sockets.get(&id).map(|s| s.record().home) else {
            return Outbox::new();
        };

        let (tx, events) = mpsc::unbounded_channel();
        let actor = AttachedActor::Query(QueryActor::new(
            buffer.into_phase(self.settings.accumulation_buffer_size),
            info.clone(),
            tx,
            Arc::clone(&self.decoders),
            home,
        ));
        self.migrate(id, home);
        let mut outbox = self.with_socket(id, |socket, env| socket.attach(actor, env));

        info!(
            "[{id}] ready in {home} pool ({} parameters)",
            info.parameters.len()
        );
        if let Some(pending) = self.pending.remove(&id) {
            let ready = ReadyConnection {
                id,
                session: info,
                events,
            };
            if pending.reply.send(Ok(ready)).is_err() {
                debug!("[{id}] caller went away before the connection was ready");
                outbox.push(SupervisorMsg::End(ConnectFailure::Terminated));
            }
        }
        outbox
    }

    fn record_token(&mut self, id: ConnectionId, token: DiagnosticToken) {
        token.trace(id);
        if let Some(pending) = self.pending.get_mut(&id) {
            pending.tokens.push(token.clone());
        }
        self.journal.add(id, token, Instant::now());
    }

    fn migrate(&mut self, id: ConnectionId, to: Residency) {
        let now = Instant::now();
        let Some(migration) = self.lists.migrate(id, to, now) else {
            return;
        };
        self.residence[migration.from.index()].record(migration.resident);
        if let Some(socket) = self.sockets.get_mut(&id) {
            socket.set_residency(to, now);
        }
        trace!(
            "[{id}] {} -> {} after {:?}",
            migration.from, migration.to, migration.resident
        );
    }

    fn end_connection(&mut self, id: ConnectionId, failure: ConnectFailure) {
        let Some(socket) = self.sockets.get_mut(&id) else {
            return;
        };
        if !socket.end(failure.clone()) {
            return;
        }

        match &failure {
            ConnectFailure::Terminated | ConnectFailure::EngineStopped => {
                debug!("[{id}] ended: {failure}")
            }
            _ => warn!("[{id}] ended: {failure}"),
        }

        if let Some(pending) = self.pending.remove(&id) {
            let _ = pending
                .reply
                .send(Err(ConnectError::new(failure, pending.tokens)));
        }
        self.migrate(id, Residency::Terminal);
    }

    fn with_socket(
        &mut self,
        id: ConnectionId,
        f: impl FnOnce(&mut SocketActor, &mut SocketEnv<'_>),
    ) -> Outbox {
        let mut outbox = Outbox::new();
        if let Some(socket) = self.sockets.get_mut(&id) {
            let mut env = SocketEnv {
                slabs: &self.slabs,
                activity: &mut self.activity,
                outbox: &mut outbox,
            };
            f(socket, &mut env);
        }
        outbox
    }

    fn jitter(&self) -> Duration {
        let (min, max) = (
            self.settings.connect_jitter_min,
            self.settings.connect_jitter_max,
        );
        if max <= min {
            return min;
        }
        rand::rng().random_range(min..=max)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
