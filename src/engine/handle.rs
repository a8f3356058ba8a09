use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::{
    actors::{ConnectionId, QueryEvent, QueryEvents, QueryOp, SessionInfo},
    errors::{ConnectError, ConnectFailure, QueryError},
    journal::JournalEntry,
    supervisor::{PoolHint, Snapshot},
    wire_protocol::{
        FormatCode,
        backend::{BackendKeyData, TransactionStatus},
        frontend::{MAX_COPY_CHUNK, ObjectKind},
    },
};

use super::Command;

// -----------------------------------------------------------------------------
// ----- EngineHandle ----------------------------------------------------------

/// Cheap to clone. The engine runs until the last handle, and the last
/// connection holding one, is gone.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    /// Open a connection and walk it through boot, authentication and
    /// session info. Resolves once it is ready for queries.
    pub async fn add_connection(&self, hint: PoolHint) -> Result<QueryConnection, ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddConnection { hint, reply })
            .map_err(|_| stopped())?;

        let ready = rx.await.map_err(|_| stopped())??;
        Ok(QueryConnection {
            id: ready.id,
            handle: self.clone(),
            events: ready.events,
            session: ready.session,
            closed: None,
            terminated: false,
        })
    }

    pub async fn snapshot(&self) -> Option<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).ok()?;
        rx.await.ok()
    }

    /// Diagnostic history of one connection, newest first.
    pub async fn journal(&self, id: ConnectionId) -> Vec<JournalEntry> {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Journal { id, reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the engine. Every connection ends; pending connects reject.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Shutdown(done)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn submit(&self, id: ConnectionId, op: QueryOp) -> Result<(), QueryError> {
        let (ack, rx) = oneshot::channel();
        self.send(Command::Query { id, op, ack })
            .map_err(|_| QueryError::EngineStopped)?;
        rx.await.map_err(|_| QueryError::EngineStopped)?
    }

    fn send(&self, command: Command) -> Result<(), ()> {
        self.commands.send(command).map_err(|_| ())
    }
}

fn stopped() -> ConnectError {
    ConnectError::new(ConnectFailure::EngineStopped, Vec::new())
}

// -----------------------------------------------------------------------------
// ----- QueryConnection -------------------------------------------------------

/// A connection in the query phase.
///
/// Every operation resolves once its bytes have left the write queue. The
/// server's answers arrive separately through [`QueryConnection::next_event`].
/// Dropping the connection terminates it.
#[derive(Debug)]
pub struct QueryConnection {
    id: ConnectionId,
    handle: EngineHandle,
    events: QueryEvents,
    session: SessionInfo,
    closed: Option<ConnectFailure>,
    terminated: bool,
}

// -----------------------------------------------------------------------------
// ----- QueryConnection: Accessors --------------------------------------------

impl QueryConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Server parameters, kept current with ParameterStatus events.
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.session.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.session.parameter(name)
    }

    /// Process id and secret for a CancelRequest.
    pub fn cancel_key(&self) -> Option<BackendKeyData> {
        self.session.backend_key
    }

    /// As of the last ReadyForQuery seen through `next_event`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.status
    }

    /// Why the connection ended, once its event stream said so.
    pub fn closed(&self) -> Option<&ConnectFailure> {
        self.closed.as_ref()
    }
}

// -----------------------------------------------------------------------------
// ----- QueryConnection: Operations -------------------------------------------

impl QueryConnection {
    pub async fn parse(
        &self,
        name: impl Into<String>,
        sql: impl Into<String>,
        param_types: &[u32],
    ) -> Result<(), QueryError> {
        self.submit(QueryOp::Parse {
            name: name.into(),
            sql: sql.into(),
            param_types: param_types.to_vec(),
        })
        .await
    }

    pub async fn bind(
        &self,
        portal: impl Into<String>,
        statement: impl Into<String>,
        param_formats: &[FormatCode],
        values: Vec<Option<Bytes>>,
        result_formats: &[FormatCode],
    ) -> Result<(), QueryError> {
        self.submit(QueryOp::Bind {
            portal: portal.into(),
            statement: statement.into(),
            param_formats: param_formats.to_vec(),
            values,
            result_formats: result_formats.to_vec(),
        })
        .await
    }

    pub async fn describe(&self, kind: ObjectKind, name: impl Into<String>) -> Result<(), QueryError> {
        self.submit(QueryOp::Describe {
            kind,
            name: name.into(),
        })
        .await
    }

    /// `max_rows == 0` means no limit.
    pub async fn execute(&self, portal: impl Into<String>, max_rows: u32) -> Result<(), QueryError> {
        self.submit(QueryOp::Execute {
            portal: portal.into(),
            max_rows,
        })
        .await
    }

    pub async fn close(&self, kind: ObjectKind, name: impl Into<String>) -> Result<(), QueryError> {
        self.submit(QueryOp::Close {
            kind,
            name: name.into(),
        })
        .await
    }

    pub async fn sync(&self) -> Result<(), QueryError> {
        self.submit(QueryOp::Sync).await
    }

    pub async fn flush(&self) -> Result<(), QueryError> {
        self.submit(QueryOp::Flush).await
    }

    pub async fn simple_query(&self, sql: impl Into<String>) -> Result<(), QueryError> {
        self.submit(QueryOp::SimpleQuery { sql: sql.into() }).await
    }

    /// Stream copy-in data after a CopyIn event. Large payloads go out as
    /// several CopyData messages.
    pub async fn copy_data(&self, data: impl Into<Bytes>) -> Result<(), QueryError> {
        let mut data = data.into();
        while data.len() > MAX_COPY_CHUNK {
            let chunk = data.split_to(MAX_COPY_CHUNK);
            self.submit(QueryOp::CopyData { data: chunk }).await?;
        }
        self.submit(QueryOp::CopyData { data }).await
    }

    pub async fn copy_done(&self) -> Result<(), QueryError> {
        self.submit(QueryOp::CopyDone).await
    }

    /// Abort a copy-in. The server answers with an error and ReadyForQuery.
    pub async fn copy_fail(&self, message: impl Into<String>) -> Result<(), QueryError> {
        self.submit(QueryOp::CopyFail {
            message: message.into(),
        })
        .await
    }

    /// Send Terminate and end the connection.
    pub async fn terminate(mut self) -> Result<(), QueryError> {
        self.terminated = true;
        self.submit(QueryOp::Terminate).await
    }

    /// Next server event. `None` once the stream is exhausted, which only
    /// happens after [`QueryEvent::Closed`].
    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        let event = self.events.recv().await?;
        match &event {
            QueryEvent::ParameterStatus { name, value } => {
                self.session.parameters.insert(name.clone(), value.clone());
            }
            QueryEvent::ReadyForQuery(status) => self.session.status = *status,
            QueryEvent::Closed(failure) => self.closed = Some(failure.clone()),
            _ => {}
        }
        Some(event)
    }

    /// Events up to and including the next ReadyForQuery.
    pub async fn until_ready(&mut self) -> Result<Vec<QueryEvent>, QueryError> {
        let mut events = Vec::new();
        loop {
            match self.next_event().await {
                Some(QueryEvent::Closed(failure)) => return Err(QueryError::Closed(failure)),
                Some(event @ QueryEvent::ReadyForQuery(_)) => {
                    events.push(event);
                    return Ok(events);
                }
                Some(event) => events.push(event),
                None => {
                    let failure = self.closed.clone().unwrap_or(ConnectFailure::EngineStopped);
                    return Err(QueryError::Closed(failure));
                }
            }
        }
    }

    /// Run `sql` through the simple query protocol and collect its events.
    pub async fn query(&mut self, sql: impl Into<String>) -> Result<Vec<QueryEvent>, QueryError> {
        self.simple_query(sql).await?;
        self.until_ready().await
    }

    async fn submit(&self, op: QueryOp) -> Result<(), QueryError> {
        if let Some(failure) = &self.closed {
            return Err(QueryError::Closed(failure.clone()));
        }
        trace!("[{}] submit {}", self.id, op.name());
        self.handle.submit(self.id, op).await
    }
}

impl Drop for QueryConnection {
    fn drop(&mut self) {
        if self.terminated || self.closed.is_some() {
            return;
        }
        let (ack, _) = oneshot::channel();
        let _ = self.handle.send(Command::Query {
            id: self.id,
            op: QueryOp::Terminate,
            ack,
        });
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
