//! Phase-restricted lexer over an accumulation buffer.
//!
//! Each call looks at the tag under the cursor. Tags outside the phase's
//! allowed set stop the phase; known tags are matched, and only a complete
//! frame is parsed. A header declaring more than the buffer's frame limit is
//! malformed before any payload is waited for.

use crate::{errors::MalformedMessage, net::AccumulationBuffer};

use super::{
    backend::{BackendMessage, BackendTag, TagSet},
    utils::{MatchState, check_frame_limit},
};

// -----------------------------------------------------------------------------
// ----- Lexed -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lexed {
    /// One complete message was parsed and the cursor moved past it.
    Token(BackendMessage),
    /// Buffer is empty or holds a partial frame. Nothing was consumed.
    NeedMore,
    /// The byte under the cursor is not allowed in this phase.
    OutOfDomain(u8),
    /// Frame structure disagrees with its declared length.
    Malformed(MalformedMessage),
}

// -----------------------------------------------------------------------------
// ----- lex_next --------------------------------------------------------------

pub fn lex_next(buf: &mut AccumulationBuffer, allowed: TagSet) -> Lexed {
    let Some(byte) = buf.current() else {
        return Lexed::NeedMore;
    };

    let tag = match BackendTag::from_byte(byte) {
        Some(tag) if allowed.contains(tag) => tag,
        _ => return Lexed::OutOfDomain(byte),
    };

    if let Err(err) = check_frame_limit(buf.unread(), buf.frame_limit()) {
        return Lexed::Malformed(err);
    }

    match BackendMessage::matches(tag, buf.unread()) {
        MatchState::NotThis => Lexed::OutOfDomain(byte),
        MatchState::Incomplete => Lexed::NeedMore,
        MatchState::Is { .. } => match BackendMessage::parse(tag, buf) {
            Ok(msg) => Lexed::Token(msg),
            Err(err) => Lexed::Malformed(err),
        },
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
