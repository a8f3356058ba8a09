use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    config::ClientConfig,
    errors::{ConnectFailure, ProtocolViolation},
    journal::DiagnosticToken,
    net::AccumulationBuffer,
    wire_protocol::{
        BackendMessage, BackendTag, FrontendMessage, Lexed, TagSet,
        backend::Authentication,
        frontend::{PasswordFrame, StartupFrame},
        lex_next,
    },
};

use super::{ActorContext, Phase, PhaseActor, SupervisorMsg, unread_copy};

const AUTH_TAGS: TagSet = TagSet::of(&[
    BackendTag::Authentication,
    BackendTag::ErrorResponse,
    BackendTag::NoticeResponse,
    BackendTag::NegotiateProtocolVersion,
]);

// -----------------------------------------------------------------------------
// ----- AuthActor -------------------------------------------------------------

/// Sends the startup message and answers password challenges until the
/// server says `AuthenticationOk`.
#[derive(Debug)]
pub struct AuthActor {
    config: Arc<ClientConfig>,
    buffer: Option<AccumulationBuffer>,
    passwords_sent: u32,
}

impl AuthActor {
    pub fn new(config: Arc<ClientConfig>, buffer: AccumulationBuffer) -> Self {
        Self {
            config,
            buffer: Some(buffer),
            passwords_sent: 0,
        }
    }

    pub fn passwords_sent(&self) -> u32 {
        self.passwords_sent
    }
}

impl PhaseActor for AuthActor {
    fn phase(&self) -> Phase {
        Phase::Authentication
    }

    fn start(&mut self, ctx: &mut ActorContext<'_>) {
        let startup = StartupFrame {
            user: &self.config.user,
            database: self.config.database_or_user(),
            replication: self.config.replication,
            params: &self.config.params,
        };
        if let Err(e) = ctx.send(&FrontendMessage::Startup(startup)) {
            self.buffer = None;
            ctx.end(e);
            return;
        }
        debug!("[{}] startup sent for user {:?}", ctx.id, self.config.user);

        // bytes that arrived with the SSL reply belong to this phase
        if self.buffer.as_ref().is_some_and(|b| !b.is_drained()) {
            self.lex(ctx);
        }
    }

    fn on_data(&mut self, data: &[u8], ctx: &mut ActorContext<'_>) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        if let Err(e) = buffer.enqueue(data) {
            warn!("[{}] authentication buffer: {e}", ctx.id);
            let bytes = unread_copy(buffer);
            self.buffer = None;
            ctx.violation(
                Phase::Authentication,
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

impl AuthActor {
    fn lex(&mut self, ctx: &mut ActorContext<'_>) {
        loop {
            let Some(buffer) = self.buffer.as_mut() else {
                return;
            };

            match lex_next(buffer, AUTH_TAGS) {
                Lexed::NeedMore => return,
                Lexed::Token(BackendMessage::Authentication(request)) => {
                    if !self.on_request(request, ctx) {
                        return;
                    }
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
                Lexed::Token(BackendMessage::NegotiateProtocolVersion(negotiation)) => {
                    debug!(
                        "[{}] server supports protocol 3.{}",
                        ctx.id, negotiation.newest_minor
                    );
                    ctx.report(DiagnosticToken::ProtocolVersion(negotiation));
                }
                Lexed::Token(other) => {
                    self.out_of_domain(other.tag().as_byte(), ctx);
                    return;
                }
                Lexed::OutOfDomain(tag) => {
                    self.out_of_domain(tag, ctx);
                    return;
                }
                Lexed::Malformed(error) => {
                    let bytes = unread_copy(buffer);
                    self.buffer = None;
                    ctx.mangled(Phase::Authentication, error, bytes);
                    return;
                }
            }
        }
    }

    /// Returns false once the phase is over, one way or another.
    fn on_request(&mut self, request: Authentication, ctx: &mut ActorContext<'_>) -> bool {
        let reply = match request {
            Authentication::Ok => {
                debug!("[{}] authenticated", ctx.id);
                if let Some(buffer) = self.buffer.take() {
                    ctx.emit(SupervisorMsg::AuthEnded { buffer });
                }
                return false;
            }
            Authentication::CleartextPassword => {
                self.password().map(|pw| PasswordFrame::cleartext(&pw))
            }
            Authentication::Md5Password { salt } => self
                .password()
                .map(|pw| PasswordFrame::md5(&self.config.user, &pw, salt)),
            other => {
                let Some(mechanism) = other.unsupported_mechanism() else {
                    return true;
                };
                self.buffer = None;
                ctx.report(DiagnosticToken::UnsupportedAuthentication(mechanism.clone()));
                ctx.end(ConnectFailure::UnsupportedAuthentication(mechanism));
                return false;
            }
        };

        let Some(reply) = reply else {
            self.buffer = None;
            ctx.report(DiagnosticToken::PasswordMissing);
            ctx.end(ConnectFailure::PasswordMissing);
            return false;
        };

        if let Err(e) = ctx.send(&FrontendMessage::Password(reply)) {
            self.buffer = None;
            ctx.end(e);
            return false;
        }
        self.passwords_sent += 1;
        true
    }

    fn password(&self) -> Option<secrecy::SecretString> {
        self.config.supply_password()
    }

    fn out_of_domain(&mut self, tag: u8, ctx: &mut ActorContext<'_>) {
        let bytes = self.buffer.take().map(|b| unread_copy(&b)).unwrap_or_default();
        ctx.violation(
            Phase::Authentication,
            ProtocolViolation::OutOfDomain {
                phase: Phase::Authentication,
                tag,
            },
            bytes,
        );
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
        wire_protocol::{backend::AuthMechanism, frontend::FrontendFrame},
    };
    use secrecy::SecretString;

    fn auth_frame(code: i32, extra: &[u8]) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(extra);
        frame(b'R', &payload)
    }

    fn started(h: &mut Harness, config: ClientConfig) -> AuthActor {
        let mut actor = AuthActor::new(Arc::new(config), h.buffer(256));
        actor.start(&mut h.ctx());
        h.wire.take_written();
        actor
    }

    #[test]
    fn start_sends_startup_with_database_defaulting_to_user() {
        let mut h = Harness::new();
        let mut actor = AuthActor::new(Arc::new(ClientConfig::new("alice")), h.buffer(256));
        actor.start(&mut h.ctx());

        let written = h.wire.written();
        assert_eq!(&written[4..8], &196608i32.to_be_bytes());
        assert_eq!(&written[8..], b"user\0alice\0database\0alice\0\0");
        assert!(h.take().is_empty());
    }

    #[test]
    fn ok_hands_off_with_trailing_bytes() {
        let mut h = Harness::new();
        let mut actor = started(&mut h, ClientConfig::new("alice"));

        let mut data = auth_frame(0, &[]);
        data.extend_from_slice(&frame(b'Z', b"I"));
        actor.on_data(&data, &mut h.ctx());

        match h.take().as_slice() {
            [SupervisorMsg::AuthEnded { buffer }] => {
                assert_eq!(buffer.unread(), &frame(b'Z', b"I")[..]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cleartext_password_is_sent() {
        let mut h = Harness::new();
        let config = ClientConfig::new("alice").password(SecretString::from("hunter2"));
        let mut actor = started(&mut h, config);

        actor.on_data(&auth_frame(3, &[]), &mut h.ctx());

        assert_eq!(h.wire.written(), b"p\0\0\0\x0chunter2\0");
        assert_eq!(actor.passwords_sent(), 1);
        assert!(h.take().is_empty());
    }

    #[test]
    fn md5_password_is_salted() {
        let mut h = Harness::new();
        let config = ClientConfig::new("alice").password(SecretString::from("secret"));
        let mut actor = started(&mut h, config);
        let salt = [1, 2, 3, 4];

        actor.on_data(&auth_frame(5, &salt), &mut h.ctx());

        let want = PasswordFrame::md5("alice", &SecretString::from("secret"), salt)
            .encode(&h.slabs)
            .unwrap();
        assert_eq!(h.wire.written(), want.as_bytes());
        assert_eq!(h.wire.written().len(), 5 + 3 + 32 + 1);
    }

    #[test]
    fn missing_password_ends() {
        let mut h = Harness::new();
        let mut actor = started(&mut h, ClientConfig::new("alice"));

        actor.on_data(&auth_frame(3, &[]), &mut h.ctx());

        let msgs = h.take();
        assert_eq!(tokens(&msgs), vec![&DiagnosticToken::PasswordMissing]);
        assert_eq!(ended_with(&msgs), Some(&ConnectFailure::PasswordMissing));
        assert!(h.wire.written().is_empty());
    }

    #[test]
    fn supplier_returning_none_counts_as_missing() {
        let mut h = Harness::new();
        let config = ClientConfig::new("alice").password_supplier(|| None);
        let mut actor = started(&mut h, config);

        actor.on_data(&auth_frame(5, &[9, 9, 9, 9]), &mut h.ctx());
        assert_eq!(ended_with(&h.take()), Some(&ConnectFailure::PasswordMissing));
    }

    #[test]
    fn sasl_is_unsupported() {
        let mut h = Harness::new();
        let mut actor = started(&mut h, ClientConfig::new("alice"));

        actor.on_data(&auth_frame(10, b"SCRAM-SHA-256\0\0"), &mut h.ctx());

        let msgs = h.take();
        let mechanism = AuthMechanism::Sasl(vec!["SCRAM-SHA-256".into()]);
        assert_eq!(
            tokens(&msgs),
            vec![&DiagnosticToken::UnsupportedAuthentication(mechanism.clone())]
        );
        assert_eq!(
            ended_with(&msgs),
            Some(&ConnectFailure::UnsupportedAuthentication(mechanism))
        );
    }

    #[test]
    fn fatal_error_ends_with_server_failure() {
        let mut h = Harness::new();
        let mut actor = started(&mut h, ClientConfig::new("alice"));
        let notice = ErrorNotice::new(Severity::Fatal, "28P01", "password authentication failed");

        actor.on_data(&notice.to_bytes(b'E'), &mut h.ctx());

        let msgs = h.take();
        assert_eq!(tokens(&msgs), vec![&DiagnosticToken::ServerError(notice.clone())]);
        assert_eq!(ended_with(&msgs), Some(&ConnectFailure::Server(notice)));
    }

    #[test]
    fn notices_and_version_negotiation_do_not_end() {
        let mut h = Harness::new();
        let mut actor = started(&mut h, ClientConfig::new("alice"));
        let notice = ErrorNotice::new(Severity::Notice, "00000", "hello");

        let mut data = notice.to_bytes(b'N').to_vec();
        let mut negotiate = 0i32.to_be_bytes().to_vec();
        negotiate.extend_from_slice(&1i32.to_be_bytes());
        negotiate.extend_from_slice(b"_pq_.foo\0");
        data.extend_from_slice(&frame(b'v', &negotiate));
        actor.on_data(&data, &mut h.ctx());

        let msgs = h.take();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(tokens(&msgs)[0], DiagnosticToken::ServerNotice(_)));
        assert!(matches!(tokens(&msgs)[1], DiagnosticToken::ProtocolVersion(_)));
        assert_eq!(ended_with(&msgs), None);
    }

    #[test]
    fn query_traffic_during_auth_is_out_of_domain() {
        let mut h = Harness::new();
        let mut actor = started(&mut h, ClientConfig::new("alice"));

        actor.on_data(&frame(b'D', &[0, 0]), &mut h.ctx());

        assert_eq!(
            ended_with(&h.take()),
            Some(&ConnectFailure::ProtocolViolation(
                ProtocolViolation::OutOfDomain {
                    phase: Phase::Authentication,
                    tag: b'D',
                }
            ))
        );
    }

    #[test]
    fn truncated_request_is_mangled() {
        let mut h = Harness::new();
        let mut actor = started(&mut h, ClientConfig::new("alice"));

        // md5 request declares its salt but the frame is too short for it
        actor.on_data(&frame(b'R', &5i32.to_be_bytes()), &mut h.ctx());

        let msgs = h.take();
        assert!(matches!(
            tokens(&msgs).as_slice(),
            [DiagnosticToken::MangledData { phase: Phase::Authentication, .. }]
        ));
        assert!(matches!(ended_with(&msgs), Some(ConnectFailure::Malformed(_))));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
