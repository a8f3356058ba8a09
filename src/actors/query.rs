//! Query phase: the connection is ready and the caller drives it.
//!
//! Operations are encoded and written as they are submitted. Everything the
//! server sends back is lexed against the query-phase tag set and turned
//! into [`QueryEvent`]s on the connection's event stream. Column bytes go
//! through the [`DecoderRegistry`].

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    errors::{ConnectFailure, ErrorNotice, ProtocolViolation, QueryError},
    journal::DiagnosticToken,
    net::AccumulationBuffer,
    supervisor::Residency,
    types::{DecoderRegistry, Value},
    wire_protocol::{
        BackendMessage, BackendTag, FormatCode, FrontendMessage, Lexed, TagSet,
        backend::{CopyResponse, DataRow, FieldDescription, TransactionStatus},
        frontend::{
            BindFrame, CloseFrame, CopyDataFrame, CopyFailFrame, DescribeFrame, ExecuteFrame,
            ObjectKind, ParseFrame, QueryFrame,
        },
        lex_next,
    },
};

use super::{ActorContext, Phase, PhaseActor, SessionInfo, SupervisorMsg, unread_copy};

const QUERY_TAGS: TagSet = TagSet::of(&[
    BackendTag::RowDescription,
    BackendTag::DataRow,
    BackendTag::CommandComplete,
    BackendTag::ParseComplete,
    BackendTag::BindComplete,
    BackendTag::CloseComplete,
    BackendTag::NoData,
    BackendTag::EmptyQueryResponse,
    BackendTag::PortalSuspended,
    BackendTag::ParameterDescription,
    BackendTag::ReadyForQuery,
    BackendTag::ErrorResponse,
    BackendTag::NoticeResponse,
    BackendTag::ParameterStatus,
    BackendTag::NotificationResponse,
    BackendTag::CopyInResponse,
    BackendTag::CopyOutResponse,
    BackendTag::CopyBothResponse,
    BackendTag::CopyData,
    BackendTag::CopyDone,
]);

pub type QueryEvents = mpsc::UnboundedReceiver<QueryEvent>;

// -----------------------------------------------------------------------------
// ----- QueryOp ---------------------------------------------------------------

/// One frontend operation, owned so it can cross the engine channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOp {
    Parse {
        name: String,
        sql: String,
        param_types: Vec<u32>,
    },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<FormatCode>,
        values: Vec<Option<Bytes>>,
        result_formats: Vec<FormatCode>,
    },
    Describe {
        kind: ObjectKind,
        name: String,
    },
    Execute {
        portal: String,
        max_rows: u32,
    },
    Close {
        kind: ObjectKind,
        name: String,
    },
    Sync,
    Flush,
    SimpleQuery {
        sql: String,
    },
    /// One chunk of copy-in data, at most `MAX_COPY_CHUNK` bytes.
    CopyData {
        data: Bytes,
    },
    CopyDone,
    CopyFail {
        message: String,
    },
    Terminate,
}

impl QueryOp {
    pub fn name(&self) -> &'static str {
        match self {
            QueryOp::Parse { .. } => "parse",
            QueryOp::Bind { .. } => "bind",
            QueryOp::Describe { .. } => "describe",
            QueryOp::Execute { .. } => "execute",
            QueryOp::Close { .. } => "close",
            QueryOp::Sync => "sync",
            QueryOp::Flush => "flush",
            QueryOp::SimpleQuery { .. } => "simple query",
            QueryOp::CopyData { .. } => "copy data",
            QueryOp::CopyDone => "copy done",
            QueryOp::CopyFail { .. } => "copy fail",
            QueryOp::Terminate => "terminate",
        }
    }

    /// Operations the server answers with exactly one ReadyForQuery.
    fn expects_ready(&self) -> bool {
        matches!(self, QueryOp::Sync | QueryOp::SimpleQuery { .. })
    }

    fn to_message(&self) -> FrontendMessage<'_> {
        match self {
            QueryOp::Parse {
                name,
                sql,
                param_types,
            } => FrontendMessage::Parse(ParseFrame {
                name,
                sql,
                param_types,
            }),
            QueryOp::Bind {
                portal,
                statement,
                param_formats,
                values,
                result_formats,
            } => FrontendMessage::Bind(BindFrame {
                portal,
                statement,
                param_formats,
                values,
                result_formats,
            }),
            QueryOp::Describe { kind, name } => {
                FrontendMessage::Describe(DescribeFrame { kind: *kind, name })
            }
            QueryOp::Execute { portal, max_rows } => FrontendMessage::Execute(ExecuteFrame {
                portal,
                max_rows: *max_rows,
            }),
            QueryOp::Close { kind, name } => {
                FrontendMessage::Close(CloseFrame { kind: *kind, name })
            }
            QueryOp::Sync => FrontendMessage::Sync,
            QueryOp::Flush => FrontendMessage::Flush,
            QueryOp::SimpleQuery { sql } => FrontendMessage::Query(QueryFrame::new(sql)),
            QueryOp::CopyData { data } => FrontendMessage::CopyData(CopyDataFrame { data }),
            QueryOp::CopyDone => FrontendMessage::CopyDone,
            QueryOp::CopyFail { message } => {
                FrontendMessage::CopyFail(CopyFailFrame { message })
            }
            QueryOp::Terminate => FrontendMessage::Terminate,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- QueryEvent ------------------------------------------------------------

/// Everything the server says once the connection is ready.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    EmptyQuery,
    ParameterDescription(Vec<u32>),
    RowDescription(Arc<[FieldDescription]>),
    Row(Vec<Value>),
    CommandComplete { tag: String, rows: Option<u64> },
    ReadyForQuery(TransactionStatus),
    /// In-band; the connection stays usable.
    Error(ErrorNotice),
    Notice(ErrorNotice),
    ParameterStatus { name: String, value: String },
    Notification {
        process_id: i32,
        channel: String,
        payload: String,
    },
    CopyIn(CopyResponse),
    CopyOut(CopyResponse),
    CopyBoth(CopyResponse),
    CopyData(Bytes),
    CopyDone,
    /// Last event on the stream.
    Closed(ConnectFailure),
}

// -----------------------------------------------------------------------------
// ----- QueryActor ------------------------------------------------------------

#[derive(Debug)]
pub struct QueryActor {
    buffer: AccumulationBuffer,
    session: SessionInfo,
    events: mpsc::UnboundedSender<QueryEvent>,
    decoders: Arc<DecoderRegistry>,
    /// Columns of the result set currently streaming.
    fields: Option<Arc<[FieldDescription]>>,
    /// ReadyForQuery replies still owed by the server.
    pending_ready: u32,
    active: bool,
    home: Residency,
    fatal: bool,
}

// -----------------------------------------------------------------------------
// ----- QueryActor: Static ----------------------------------------------------

impl QueryActor {
    pub fn new(
        buffer: AccumulationBuffer,
        session: SessionInfo,
        events: mpsc::UnboundedSender<QueryEvent>,
        decoders: Arc<DecoderRegistry>,
        home: Residency,
    ) -> Self {
        Self {
            buffer,
            session,
            events,
            decoders,
            fields: None,
            pending_ready: 0,
            active: false,
            home,
            fatal: false,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- QueryActor: Public ----------------------------------------------------

impl QueryActor {
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn pending_ready(&self) -> u32 {
        self.pending_ready
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Encode and write `op`. The first operation of a command cycle moves
    /// the connection to the active pool.
    pub(crate) fn submit(
        &mut self,
        op: QueryOp,
        ctx: &mut ActorContext<'_>,
    ) -> Result<(), QueryError> {
        trace!("[{}] submit {}", ctx.id, op.name());
        ctx.send(&op.to_message())?;

        if matches!(op, QueryOp::Terminate) {
            ctx.end(ConnectFailure::Terminated);
            return Ok(());
        }

        if op.expects_ready() {
            self.pending_ready += 1;
        }
        if !self.active {
            self.active = true;
            ctx.emit(SupervisorMsg::Migrate(Residency::Active));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- QueryActor: PhaseActor ------------------------------------------------

impl PhaseActor for QueryActor {
    fn phase(&self) -> Phase {
        Phase::Query
    }

    fn start(&mut self, ctx: &mut ActorContext<'_>) {
        if !self.buffer.is_drained() {
            self.lex(ctx);
        }
    }

    fn on_data(&mut self, data: &[u8], ctx: &mut ActorContext<'_>) {
        if self.fatal {
            return;
        }
        if self.buffer.enqueue(data).is_err() {
            self.fail(
                ctx,
                ProtocolViolation::BufferStuffing {
                    buffered: self.buffer.bytes_left() + data.len(),
                },
            );
            return;
        }
        self.lex(ctx);
    }

    fn on_end(&mut self, failure: &ConnectFailure) {
        self.buffer.clear();
        self.deliver(QueryEvent::Closed(failure.clone()));
    }
}

// -----------------------------------------------------------------------------
// ----- QueryActor: Private ---------------------------------------------------

impl QueryActor {
    fn lex(&mut self, ctx: &mut ActorContext<'_>) {
        loop {
            let msg = match lex_next(&mut self.buffer, QUERY_TAGS) {
                Lexed::NeedMore => return,
                Lexed::Token(msg) => msg,
                Lexed::OutOfDomain(tag) => {
                    self.fail(
                        ctx,
                        ProtocolViolation::OutOfDomain {
                            phase: Phase::Query,
                            tag,
                        },
                    );
                    return;
                }
                Lexed::Malformed(error) => {
                    self.fatal = true;
                    ctx.mangled(Phase::Query, error, unread_copy(&self.buffer));
                    return;
                }
            };

            match self.interpret(msg, ctx) {
                Some(event) => self.deliver(event),
                None => return,
            }
        }
    }

    fn interpret(&mut self, msg: BackendMessage, ctx: &mut ActorContext<'_>) -> Option<QueryEvent> {
        let event = match msg {
            BackendMessage::RowDescription(desc) => {
                let fields: Arc<[FieldDescription]> = desc.fields.into();
                self.fields = Some(Arc::clone(&fields));
                QueryEvent::RowDescription(fields)
            }
            BackendMessage::DataRow(row) => QueryEvent::Row(self.decode_row(row)),
            BackendMessage::CommandComplete(done) => {
                self.fields = None;
                QueryEvent::CommandComplete {
                    rows: done.rows(),
                    tag: done.tag,
                }
            }
            BackendMessage::ReadyForQuery(ready) => {
                self.session.status = ready.status;
                self.pending_ready = self.pending_ready.saturating_sub(1);
                if self.pending_ready == 0 && self.active {
                    self.active = false;
                    ctx.emit(SupervisorMsg::Migrate(self.home));
                }
                QueryEvent::ReadyForQuery(ready.status)
            }
            BackendMessage::ParseComplete => QueryEvent::ParseComplete,
            BackendMessage::BindComplete => QueryEvent::BindComplete,
            BackendMessage::CloseComplete => QueryEvent::CloseComplete,
            BackendMessage::NoData => {
                self.fields = None;
                QueryEvent::NoData
            }
            BackendMessage::EmptyQueryResponse => QueryEvent::EmptyQuery,
            BackendMessage::PortalSuspended => QueryEvent::PortalSuspended,
            BackendMessage::ParameterDescription(desc) => {
                QueryEvent::ParameterDescription(desc.type_oids)
            }
            BackendMessage::ErrorResponse(notice) => {
                debug!("[{}] query error {}: {}", ctx.id, notice.code, notice.message);
                ctx.report(DiagnosticToken::ServerError(notice.clone()));
                QueryEvent::Error(notice)
            }
            BackendMessage::NoticeResponse(notice) => {
                ctx.report(DiagnosticToken::ServerNotice(notice.clone()));
                QueryEvent::Notice(notice)
            }
            BackendMessage::ParameterStatus(param) => {
                self.session
                    .parameters
                    .insert(param.name.clone(), param.value.clone());
                QueryEvent::ParameterStatus {
                    name: param.name,
                    value: param.value,
                }
            }
            BackendMessage::NotificationResponse(n) => QueryEvent::Notification {
                process_id: n.process_id,
                channel: n.channel,
                payload: n.payload,
            },
            BackendMessage::CopyInResponse(r) => QueryEvent::CopyIn(r),
            BackendMessage::CopyOutResponse(r) => QueryEvent::CopyOut(r),
            BackendMessage::CopyBothResponse(r) => QueryEvent::CopyBoth(r),
            BackendMessage::CopyData(data) => QueryEvent::CopyData(data),
            BackendMessage::CopyDone => QueryEvent::CopyDone,
            other => {
                let tag = other.tag().as_byte();
                self.fail(
                    ctx,
                    ProtocolViolation::OutOfDomain {
                        phase: Phase::Query,
                        tag,
                    },
                );
                return None;
            }
        };
        Some(event)
    }

    /// Rows without a known description come back raw.
    fn decode_row(&self, row: DataRow) -> Vec<Value> {
        let fields = self.fields.as_deref().unwrap_or(&[]);
        row.columns
            .iter()
            .enumerate()
            .map(|(i, raw)| match fields.get(i) {
                Some(field) => self.decoders.decode(field.type_oid, field.format, raw.as_ref()),
                None => raw.clone().map_or(Value::Null, Value::Raw),
            })
            .collect()
    }

    fn deliver(&self, event: QueryEvent) {
        if self.events.send(event).is_err() {
            trace!("query event dropped, receiver gone");
        }
    }

    fn fail(&mut self, ctx: &mut ActorContext<'_>, violation: ProtocolViolation) {
        self.fatal = true;
        let bytes = unread_copy(&self.buffer);
        ctx.violation(Phase::Query, violation, bytes);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
