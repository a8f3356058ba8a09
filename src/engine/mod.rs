//! The engine task: one tokio task that owns the [`Supervisor`] and feeds
//! it transport events and caller commands, one at a time.

pub mod handle;

pub use handle::{EngineHandle, QueryConnection};

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{
    actors::{ConnectionId, QueryOp, WriteAck},
    config::{ConfigSource, EngineSettings, SslFallback},
    journal::JournalEntry,
    supervisor::{ConnectPlan, PoolHint, ReadyReply, Snapshot, Supervisor},
    transport::{EventReceiver, TcpTransportFactory},
    types::DecoderRegistry,
};

// -----------------------------------------------------------------------------
// ----- Command ---------------------------------------------------------------

pub(crate) enum Command {
    AddConnection {
        hint: PoolHint,
        reply: ReadyReply,
    },
    /// Jitter elapsed; create the socket.
    Open {
        plan: ConnectPlan,
        reply: ReadyReply,
    },
    Query {
        id: ConnectionId,
        op: QueryOp,
        ack: WriteAck,
    },
    Snapshot(oneshot::Sender<Snapshot>),
    Journal {
        id: ConnectionId,
        reply: oneshot::Sender<Vec<JournalEntry>>,
    },
    Shutdown(oneshot::Sender<()>),
}

// -----------------------------------------------------------------------------
// ----- Engine ----------------------------------------------------------------

pub struct Engine {
    supervisor: Supervisor,
    events: EventReceiver,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Weak so the engine stops once every handle is gone.
    commands_tx: mpsc::WeakUnboundedSender<Command>,
    reap_interval: Duration,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        configs: impl ConfigSource + 'static,
    ) -> (Engine, EngineHandle) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let factory = TcpTransportFactory::new(events_tx, settings.transport_high_water);
        let reap_interval = settings.reap_interval;
        let supervisor = Supervisor::new(settings, Arc::new(configs), Box::new(factory));

        let engine = Engine {
            supervisor,
            events,
            commands,
            commands_tx: commands_tx.downgrade(),
            reap_interval,
        };
        (engine, EngineHandle::new(commands_tx))
    }

    pub fn with_fallback(mut self, fallback: SslFallback) -> Self {
        self.supervisor = self.supervisor.with_fallback(fallback);
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.supervisor = self.supervisor.with_decoders(decoders);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut reap = time::interval(self.reap_interval.max(Duration::from_millis(1)));
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("engine started");

        let done = loop {
            tokio::select! {
                Some((id, event)) = self.events.recv() => {
                    self.supervisor.handle_transport_event(id, event);
                }

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => break Some(done),
                    Some(command) => self.handle(command),
                    None => break None,
                },

                _ = reap.tick() => {
                    self.supervisor.reap_terminal();
                }
            }
        };

        self.supervisor.shutdown();
        info!("engine stopped");

        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Engine: Private -------------------------------------------------------

impl Engine {
    fn handle(&mut self, command: Command) {
        match command {
            Command::AddConnection { hint, reply } => self.add_connection(hint, reply),
            Command::Open { plan, reply } => self.supervisor.open(plan, reply),
            Command::Query { id, op, ack } => self.supervisor.query(id, op, ack),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.supervisor.snapshot());
            }
            Command::Journal { id, reply } => {
                let _ = reply.send(self.supervisor.journal(id));
            }
            Command::Shutdown(_) => {}
        }
    }

    fn add_connection(&mut self, hint: PoolHint, reply: ReadyReply) {
        let plan = match self.supervisor.prepare(hint) {
            Ok(plan) => plan,
            Err(e) => {
                debug!("add_connection({hint:?}) rejected: {e}");
                let _ = reply.send(Err(e));
                return;
            }
        };

        if plan.jitter.is_zero() {
            self.supervisor.open(plan, reply);
            return;
        }

        // the socket only exists once the jitter has passed
        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            time::sleep(plan.jitter).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Open { plan, reply });
            }
        });
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
