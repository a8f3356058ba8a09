use bytes::Bytes;
use tracing::{debug, trace};

use crate::{
    errors::{ConnectFailure, ProtocolViolation},
    journal::DiagnosticToken,
    net::AccumulationBuffer,
    wire_protocol::{BackendMessage, BackendTag, FrontendMessage, Lexed, TagSet, lex_next},
};

use super::{ActorContext, Phase, PhaseActor, SupervisorMsg, unread_copy};

/// Before anything is sent the server may only complain.
const PRE_SSL_TAGS: TagSet = TagSet::of(&[BackendTag::ErrorResponse, BackendTag::NoticeResponse]);

const SSL_ACCEPTED: u8 = b'S';
const SSL_REFUSED: u8 = b'N';

// -----------------------------------------------------------------------------
// ----- BootState -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Idle,
    SslRequestSent,
    /// `S` received; waiting for the TLS handshake to finish.
    AwaitingSecureConnect,
    Done,
}

// -----------------------------------------------------------------------------
// ----- BootActor -------------------------------------------------------------

/// Opens the conversation: optional SSL negotiation, then hand-off to
/// authentication.
#[derive(Debug)]
pub struct BootActor {
    state: BootState,
    ssl: bool,
    allow_fallback: bool,
    buffer: Option<AccumulationBuffer>,
}

impl BootActor {
    pub fn new(ssl: bool, allow_fallback: bool, buffer: AccumulationBuffer) -> Self {
        Self {
            state: BootState::Idle,
            ssl,
            allow_fallback,
            buffer: Some(buffer),
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }
}

// -----------------------------------------------------------------------------
// ----- BootActor: PhaseActor -------------------------------------------------

impl PhaseActor for BootActor {
    fn phase(&self) -> Phase {
        Phase::Boot
    }

    fn on_connect(&mut self, ctx: &mut ActorContext<'_>) {
        if self.state != BootState::Idle {
            self.violation(
                ctx,
                ProtocolViolation::UnexpectedEvent {
                    phase: Phase::Boot,
                    event: "connect",
                },
            );
            return;
        }

        if !self.ssl {
            debug!("[{}] connected, SSL not requested", ctx.id);
            self.finish(ctx, false);
            return;
        }

        if let Err(e) = ctx.send(&FrontendMessage::SslRequest) {
            self.state = BootState::Done;
            ctx.end(e);
            return;
        }
        debug!("[{}] connected, SSLRequest sent", ctx.id);
        self.state = BootState::SslRequestSent;
    }

    fn on_secure_connect(&mut self, ctx: &mut ActorContext<'_>) {
        if self.state != BootState::AwaitingSecureConnect {
            self.violation(
                ctx,
                ProtocolViolation::UnexpectedEvent {
                    phase: Phase::Boot,
                    event: "secure connect",
                },
            );
            return;
        }
        debug!("[{}] TLS established", ctx.id);
        self.finish(ctx, true);
    }

    fn on_data(&mut self, data: &[u8], ctx: &mut ActorContext<'_>) {
        let Some(buffer) = self.buffer.as_mut() else {
            trace!("[{}] boot got {} bytes after hand-off", ctx.id, data.len());
            return;
        };

        if buffer.enqueue(data).is_err() {
            let buffered = buffer.bytes_left() + data.len();
            self.violation(ctx, ProtocolViolation::BufferStuffing { buffered });
            return;
        }

        match self.state {
            BootState::Idle => self.drain_complaints(ctx),
            BootState::SslRequestSent => self.read_ssl_reply(ctx),
            // plaintext after `S` would be read as if it came over TLS
            BootState::AwaitingSecureConnect => {
                let buffered = buffer.bytes_left();
                self.violation(ctx, ProtocolViolation::BufferStuffing { buffered });
            }
            BootState::Done => {}
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BootActor: Private ----------------------------------------------------

impl BootActor {
    fn read_ssl_reply(&mut self, ctx: &mut ActorContext<'_>) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        let buffered = buffer.bytes_left();
        if buffered > 1 {
            self.violation(ctx, ProtocolViolation::BufferStuffing { buffered });
            return;
        }

        let Some(reply) = buffer.take_byte() else {
            return;
        };

        match reply {
            SSL_ACCEPTED => {
                debug!("[{}] server accepted SSL", ctx.id);
                self.state = BootState::AwaitingSecureConnect;
                ctx.emit(SupervisorMsg::UpgradeTls);
            }
            SSL_REFUSED if self.allow_fallback => {
                ctx.report(DiagnosticToken::SslFallback);
                self.finish(ctx, false);
            }
            SSL_REFUSED => {
                self.state = BootState::Done;
                ctx.report(DiagnosticToken::SslRejected);
                ctx.end(ConnectFailure::SslRejected);
            }
            other => {
                self.state = BootState::Done;
                ctx.violation(
                    Phase::Boot,
                    ProtocolViolation::UnexpectedSslResponse(other),
                    Bytes::copy_from_slice(&[other]),
                );
            }
        }
    }

    /// Nothing was asked yet, so only error and notice frames are valid.
    fn drain_complaints(&mut self, ctx: &mut ActorContext<'_>) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        loop {
            match lex_next(buffer, PRE_SSL_TAGS) {
                Lexed::Token(BackendMessage::ErrorResponse(notice)) => {
                    ctx.report(DiagnosticToken::ServerError(notice));
                }
                Lexed::Token(BackendMessage::NoticeResponse(notice)) => {
                    ctx.report(DiagnosticToken::ServerNotice(notice));
                }
                Lexed::NeedMore => return,
                Lexed::Token(other) => {
                    let tag = other.tag().as_byte();
                    self.violation(
                        ctx,
                        ProtocolViolation::OutOfDomain {
                            phase: Phase::Boot,
                            tag,
                        },
                    );
                    return;
                }
                Lexed::OutOfDomain(tag) => {
                    self.violation(
                        ctx,
                        ProtocolViolation::OutOfDomain {
                            phase: Phase::Boot,
                            tag,
                        },
                    );
                    return;
                }
                Lexed::Malformed(error) => {
                    self.state = BootState::Done;
                    ctx.mangled(Phase::Boot, error, unread_copy(buffer));
                    return;
                }
            }
        }
    }

    fn finish(&mut self, ctx: &mut ActorContext<'_>, tls: bool) {
        self.state = BootState::Done;
        if let Some(buffer) = self.buffer.take() {
            ctx.emit(SupervisorMsg::BootEnded { buffer, tls });
        }
    }

    fn violation(&mut self, ctx: &mut ActorContext<'_>, violation: ProtocolViolation) {
        self.state = BootState::Done;
        let bytes = self.buffer.as_ref().map(unread_copy).unwrap_or_default();
        ctx.violation(Phase::Boot, violation, bytes);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actors::test_support::{Harness, ended_with, tokens},
        errors::{ErrorNotice, Severity},
        wire_protocol::frontend::ssl_request::SSL_REQUEST_CODE,
    };

    fn boot(h: &Harness, ssl: bool, fallback: bool) -> BootActor {
        BootActor::new(ssl, fallback, h.buffer(128))
    }

    fn ssl_request_bytes() -> Vec<u8> {
        let mut out = 8i32.to_be_bytes().to_vec();
        out.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
        out
    }

    #[test]
    fn without_ssl_hands_off_on_connect() {
        let mut h = Harness::new();
        let mut actor = boot(&h, false, false);

        actor.on_connect(&mut h.ctx());

        assert_eq!(actor.state(), BootState::Done);
        assert!(h.wire.written().is_empty());
        let msgs = h.take();
        assert!(matches!(msgs.as_slice(), [SupervisorMsg::BootEnded { tls: false, .. }]));
    }

    #[test]
    fn with_ssl_writes_request_then_upgrades_on_s() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, false);

        actor.on_connect(&mut h.ctx());
        assert_eq!(actor.state(), BootState::SslRequestSent);
        assert_eq!(h.wire.written(), ssl_request_bytes());

        actor.on_data(b"S", &mut h.ctx());
        assert_eq!(actor.state(), BootState::AwaitingSecureConnect);
        assert!(matches!(h.take().as_slice(), [SupervisorMsg::UpgradeTls]));

        actor.on_secure_connect(&mut h.ctx());
        let msgs = h.take();
        match msgs.as_slice() {
            [SupervisorMsg::BootEnded { buffer, tls: true }] => assert!(buffer.is_drained()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn s_with_trailing_bytes_is_buffer_stuffing() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, false);
        actor.on_connect(&mut h.ctx());

        actor.on_data(b"SX", &mut h.ctx());

        let msgs = h.take();
        assert_eq!(
            ended_with(&msgs),
            Some(&ConnectFailure::ProtocolViolation(
                ProtocolViolation::BufferStuffing { buffered: 2 }
            ))
        );
        assert!(matches!(
            tokens(&msgs).as_slice(),
            [DiagnosticToken::ProtocolViolation { phase: Phase::Boot, .. }]
        ));
        assert!(!msgs.iter().any(|m| matches!(m, SupervisorMsg::UpgradeTls)));
    }

    #[test]
    fn plaintext_after_s_is_buffer_stuffing() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, false);
        actor.on_connect(&mut h.ctx());
        actor.on_data(b"S", &mut h.ctx());
        h.take();

        actor.on_data(b"E", &mut h.ctx());
        assert!(matches!(
            ended_with(&h.take()),
            Some(ConnectFailure::ProtocolViolation(
                ProtocolViolation::BufferStuffing { .. }
            ))
        ));
    }

    #[test]
    fn refusal_without_fallback_ends() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, false);
        actor.on_connect(&mut h.ctx());

        actor.on_data(b"N", &mut h.ctx());

        let msgs = h.take();
        assert_eq!(tokens(&msgs), vec![&DiagnosticToken::SslRejected]);
        assert_eq!(ended_with(&msgs), Some(&ConnectFailure::SslRejected));
    }

    #[test]
    fn refusal_with_fallback_continues_in_plaintext() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, true);
        actor.on_connect(&mut h.ctx());

        actor.on_data(b"N", &mut h.ctx());

        let msgs = h.take();
        assert_eq!(tokens(&msgs), vec![&DiagnosticToken::SslFallback]);
        assert!(matches!(
            msgs.last(),
            Some(SupervisorMsg::BootEnded { tls: false, .. })
        ));
    }

    #[test]
    fn any_other_reply_byte_is_a_violation() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, false);
        actor.on_connect(&mut h.ctx());

        actor.on_data(b"E", &mut h.ctx());

        let msgs = h.take();
        assert_eq!(
            ended_with(&msgs),
            Some(&ConnectFailure::ProtocolViolation(
                ProtocolViolation::UnexpectedSslResponse(b'E')
            ))
        );
        assert!(matches!(
            tokens(&msgs).as_slice(),
            [DiagnosticToken::ProtocolViolation { bytes, .. }] if &bytes[..] == b"E"
        ));
    }

    #[test]
    fn complaints_before_connect_are_forwarded() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, false);
        let notice = ErrorNotice::new(Severity::Fatal, "53300", "too many connections");
        let frame = notice.to_bytes(b'E');

        // split across two reads
        actor.on_data(&frame[..7], &mut h.ctx());
        assert!(h.take().is_empty());
        actor.on_data(&frame[7..], &mut h.ctx());

        let msgs = h.take();
        assert_eq!(tokens(&msgs), vec![&DiagnosticToken::ServerError(notice)]);
        assert_eq!(ended_with(&msgs), None);
        assert_eq!(actor.state(), BootState::Idle);
    }

    #[test]
    fn garbage_before_connect_is_fatal() {
        let mut h = Harness::new();
        let mut actor = boot(&h, false, false);

        actor.on_data(b"Z\0\0\0\x05I", &mut h.ctx());

        let msgs = h.take();
        assert!(matches!(
            ended_with(&msgs),
            Some(ConnectFailure::ProtocolViolation(
                ProtocolViolation::OutOfDomain { tag: b'Z', .. }
            ))
        ));
    }

    #[test]
    fn secure_connect_without_upgrade_is_a_violation() {
        let mut h = Harness::new();
        let mut actor = boot(&h, true, false);
        actor.on_connect(&mut h.ctx());

        actor.on_secure_connect(&mut h.ctx());

        assert!(matches!(
            ended_with(&h.take()),
            Some(ConnectFailure::ProtocolViolation(
                ProtocolViolation::UnexpectedEvent { .. }
            ))
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
