use std::collections::HashMap;
use tracing::{debug, trace};

use crate::{
    errors::{ConnectFailure, ProtocolViolation},
    journal::DiagnosticToken,
    net::AccumulationBuffer,
    wire_protocol::{
        BackendMessage, BackendTag, Lexed, TagSet,
        backend::{BackendKeyData, TransactionStatus},
        lex_next,
    },
};

use super::{ActorContext, Phase, PhaseActor, SupervisorMsg, unread_copy};

const SESSION_TAGS: TagSet = TagSet::of(&[
    BackendTag::ParameterStatus,
    BackendTag::BackendKeyData,
    BackendTag::ReadyForQuery,
    BackendTag::ErrorResponse,
    BackendTag::NoticeResponse,
]);

// -----------------------------------------------------------------------------
// ----- SessionInfo -----------------------------------------------------------

/// What the server told us between `AuthenticationOk` and the first
/// `ReadyForQuery`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub parameters: HashMap<String, String>,
    pub backend_key: Option<BackendKeyData>,
    pub status: TransactionStatus,
}

impl SessionInfo {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

// -----------------------------------------------------------------------------
// ----- SessionInfoActor ------------------------------------------------------

#[derive(Debug)]
pub struct SessionInfoActor {
    buffer: Option<AccumulationBuffer>,
    info: SessionInfo,
}

impl SessionInfoActor {
    pub fn new(buffer: AccumulationBuffer) -> Self {
        Self {
            buffer: Some(buffer),
            info: SessionInfo::default(),
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }
}

impl PhaseActor for SessionInfoActor {
    fn phase(&self) -> Phase {
        Phase::SessionInfo
    }

    fn start(&mut self, ctx: &mut ActorContext<'_>) {
        if self.buffer.as_ref().is_some_and(|b| !b.is_drained()) {
            self.lex(ctx);
        }
    }

    fn on_data(&mut self, data: &[u8], ctx: &mut ActorContext<'_>) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        if buffer.enqueue(data).is_err() {
            let bytes = unread_copy(buffer);
            self.buffer = None;
            ctx.violation(
                Phase::SessionInfo,
                ProtocolViolation::BufferStuffing {
                    buffered: bytes.len() + data.len(),
                },
                bytes,
            );
            return;
        }
        self.lex(ctx);
    }
}

impl SessionInfoActor {
    fn lex(&mut self, ctx: &mut ActorContext<'_>) {
        loop {
            let Some(buffer) = self.buffer.as_mut() else {
                return;
            };

            match lex_next(buffer, SESSION_TAGS) {
                Lexed::NeedMore => return,
                Lexed::Token(BackendMessage::ParameterStatus(param)) => {
                    trace!("[{}] {} = {}", ctx.id, param.name, param.value);
                    self.info.parameters.insert(param.name, param.value);
                }
                Lexed::Token(BackendMessage::BackendKeyData(key)) => {
                    if self.info.backend_key.is_some() {
                        self.fail(ctx, ProtocolViolation::DuplicateBackendKey);
                        return;
                    }
                    self.info.backend_key = Some(key);
                }
                Lexed::Token(BackendMessage::ReadyForQuery(ready)) => {
                    self.info.status = ready.status;
                    debug!(
                        "[{}] session ready ({} parameters, status {})",
                        ctx.id,
                        self.info.parameters.len(),
                        ready.status
                    );
                    if let Some(buffer) = self.buffer.take() {
                        ctx.emit(SupervisorMsg::SessionInfoEnded {
                            buffer,
                            info: std::mem::take(&mut self.info),
                        });
                    }
                    return;
                }
                Lexed::Token(BackendMessage::ErrorResponse(notice)) => {
                    let fatal = notice.severity.is_fatal();
                    ctx.report(DiagnosticToken::ServerError(notice.clone()));
                    if fatal {
                        self.buffer = None;
                        ctx.end(ConnectFailure::Server(notice));
                        return;
                    }
                }
                Lexed::Token(BackendMessage::NoticeResponse(notice)) => {
                    ctx.report(DiagnosticToken::ServerNotice(notice));
                }
                Lexed::Token(other) => {
                    let tag = other.tag().as_byte();
                    self.fail(ctx, out_of_domain(tag));
                    return;
                }
                Lexed::OutOfDomain(tag) => {
                    self.fail(ctx, out_of_domain(tag));
                    return;
                }
                Lexed::Malformed(error) => {
                    let bytes = unread_copy(buffer);
                    self.buffer = None;
                    ctx.mangled(Phase::SessionInfo, error, bytes);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, ctx: &mut ActorContext<'_>, violation: ProtocolViolation) {
        let bytes = self.buffer.take().map(|b| unread_copy(&b)).unwrap_or_default();
        ctx.violation(Phase::SessionInfo, violation, bytes);
    }
}

fn out_of_domain(tag: u8) -> ProtocolViolation {
    ProtocolViolation::OutOfDomain {
        phase: Phase::SessionInfo,
        tag,
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actors::test_support::{Harness, ended_with, frame, tokens},
        errors::{ErrorNotice, Severity},
    };

    fn key_frame(pid: i32, secret: i32) -> Vec<u8> {
        let mut payload = pid.to_be_bytes().to_vec();
        payload.extend_from_slice(&secret.to_be_bytes());
        frame(b'K', &payload)
    }

    fn session_bytes() -> Vec<u8> {
        let mut data = frame(b'S', b"server_version\x0016.2\0");
        data.extend_from_slice(&frame(b'S', b"client_encoding\0UTF8\0"));
        data.extend_from_slice(&key_frame(4242, 99));
        data.extend_from_slice(&frame(b'Z', b"I"));
        data
    }

    #[test]
    fn collects_parameters_and_key_until_ready() {
        let mut h = Harness::new();
        let mut actor = SessionInfoActor::new(h.buffer(256));

        let data = session_bytes();
        actor.on_data(&data[..10], &mut h.ctx());
        assert!(h.take().is_empty());
        actor.on_data(&data[10..], &mut h.ctx());

        match h.take().as_slice() {
            [SupervisorMsg::SessionInfoEnded { buffer, info }] => {
                assert!(buffer.is_drained());
                assert_eq!(info.parameter("server_version"), Some("16.2"));
                assert_eq!(info.parameter("client_encoding"), Some("UTF8"));
                assert_eq!(
                    info.backend_key,
                    Some(BackendKeyData {
                        process_id: 4242,
                        secret_key: 99
                    })
                );
                assert_eq!(info.status, TransactionStatus::Idle);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn start_consumes_bytes_carried_over_from_auth() {
        let mut h = Harness::new();
        let mut buffer = h.buffer(256);
        buffer.enqueue(&session_bytes()).unwrap();
        let mut actor = SessionInfoActor::new(buffer);

        actor.start(&mut h.ctx());

        assert!(matches!(
            h.take().as_slice(),
            [SupervisorMsg::SessionInfoEnded { .. }]
        ));
    }

    #[test]
    fn second_backend_key_is_a_violation() {
        let mut h = Harness::new();
        let mut actor = SessionInfoActor::new(h.buffer(256));

        let mut data = key_frame(1, 2);
        data.extend_from_slice(&key_frame(3, 4));
        actor.on_data(&data, &mut h.ctx());

        assert_eq!(
            ended_with(&h.take()),
            Some(&ConnectFailure::ProtocolViolation(
                ProtocolViolation::DuplicateBackendKey
            ))
        );
    }

    #[test]
    fn fatal_error_ends() {
        let mut h = Harness::new();
        let mut actor = SessionInfoActor::new(h.buffer(256));
        let notice = ErrorNotice::new(Severity::Fatal, "3D000", "database \"nope\" does not exist");

        actor.on_data(&notice.to_bytes(b'E'), &mut h.ctx());

        let msgs = h.take();
        assert_eq!(tokens(&msgs), vec![&DiagnosticToken::ServerError(notice.clone())]);
        assert_eq!(ended_with(&msgs), Some(&ConnectFailure::Server(notice)));
    }

    #[test]
    fn authentication_request_here_is_out_of_domain() {
        let mut h = Harness::new();
        let mut actor = SessionInfoActor::new(h.buffer(256));

        actor.on_data(&frame(b'R', &0i32.to_be_bytes()), &mut h.ctx());

        assert_eq!(
            ended_with(&h.take()),
            Some(&ConnectFailure::ProtocolViolation(out_of_domain(b'R')))
        );
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
