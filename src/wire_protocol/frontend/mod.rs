//! Frontend (client to server) messages.
//!
//! Encoders know their exact body size up front, take a slab of the
//! matching class, write the body after the header slot and then patch the
//! big-endian length over the header. The caller hands the finished bytes
//! to the transport and releases the slab.

pub mod bind;
pub mod cancel_request;
pub mod close;
pub mod control;
pub mod copy;
pub mod describe;
pub mod execute;
pub mod parse;
pub mod password;
pub mod query;
pub mod ssl_request;
pub mod startup;

pub use bind::BindFrame;
pub use cancel_request::CancelRequestFrame;
pub use close::CloseFrame;
pub use control::{FlushFrame, SyncFrame, TerminateFrame};
pub use copy::{CopyDataFrame, CopyDoneFrame, CopyFailFrame, MAX_COPY_CHUNK};
pub use describe::{DescribeFrame, ObjectKind};
pub use execute::ExecuteFrame;
pub use parse::ParseFrame;
pub use password::PasswordFrame;
pub use query::QueryFrame;
pub use ssl_request::SslRequestFrame;
pub use startup::StartupFrame;

use memchr::memchr;
use std::fmt;

use crate::{
    errors::EncodeError,
    memory::{Slab, SlabPool},
};

// -----------------------------------------------------------------------------
// ----- EncodedMessage --------------------------------------------------------

/// A finished frame living in a checked-out slab.
pub struct EncodedMessage {
    slab: Slab,
    len: usize,
}

impl EncodedMessage {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.slab.as_slice()[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hand the slab back to `pool`.
    pub fn release(self, pool: &SlabPool) {
        pool.release(self.slab);
    }
}

impl fmt::Debug for EncodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedMessage").field("len", &self.len).finish()
    }
}

// -----------------------------------------------------------------------------
// ----- SlabWriter ------------------------------------------------------------

/// Forward-only writer over a slab. Sizes are computed before writing, so
/// running past the end is a bug in `body_size`.
pub struct SlabWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SlabWriter<'a> {
    fn new(buf: &'a mut [u8], start: usize) -> Self {
        Self { buf, pos: start }
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.put_slice(&[v]);
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.put_slice(&v.to_be_bytes());
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.put_slice(&v.to_be_bytes());
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.put_slice(&v.to_be_bytes());
    }

    #[inline]
    pub fn put_slice(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    /// NUL-terminated string; interior NULs cannot be represented.
    pub fn put_cstr(&mut self, field: &'static str, s: &str) -> Result<(), EncodeError> {
        if memchr(0, s.as_bytes()).is_some() {
            return Err(EncodeError::InteriorNul { field });
        }
        self.put_slice(s.as_bytes());
        self.put_u8(0);
        Ok(())
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Bytes taken by `s` plus its terminator.
#[inline]
pub(crate) fn cstr_len(s: &str) -> usize {
    s.len() + 1
}

/// List length as the int16 count the protocol uses.
pub(crate) fn count16(what: &'static str, count: usize) -> Result<i16, EncodeError> {
    i16::try_from(count).map_err(|_| EncodeError::TooMany {
        what,
        count,
        max: i16::MAX as usize,
    })
}

// -----------------------------------------------------------------------------
// ----- FrontendFrame ---------------------------------------------------------

pub trait FrontendFrame {
    /// Tag byte; `None` for the untagged startup-family messages.
    const TAG: Option<u8>;

    /// Reject field values the wire cannot carry before a slab is taken.
    fn check(&self) -> Result<(), EncodeError> {
        Ok(())
    }

    /// Payload size in bytes, excluding tag and length.
    fn body_size(&self) -> usize;

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError>;

    fn encode(&self, pool: &SlabPool) -> Result<EncodedMessage, EncodeError> {
        self.check()?;

        let header = if Self::TAG.is_some() { 5 } else { 4 };
        let total = header + self.body_size();

        let mut slab = pool.acquire_for(total)?;

        let written = {
            let mut out = SlabWriter::new(slab.as_mut_slice(), header);
            match self.write_body(&mut out) {
                Ok(()) => out.position(),
                Err(err) => {
                    pool.release(slab);
                    return Err(err);
                }
            }
        };
        debug_assert_eq!(written, total, "body_size disagrees with write_body");

        let bytes = slab.as_mut_slice();
        match Self::TAG {
            Some(tag) => {
                bytes[0] = tag;
                bytes[1..5].copy_from_slice(&((total - 1) as u32).to_be_bytes());
            }
            None => {
                bytes[0..4].copy_from_slice(&(total as u32).to_be_bytes());
            }
        }

        Ok(EncodedMessage { slab, len: total })
    }
}

// -----------------------------------------------------------------------------
// ----- FrontendMessage -------------------------------------------------------

/// Any message this client sends.
#[derive(Debug, Clone)]
pub enum FrontendMessage<'a> {
    SslRequest,
    Startup(StartupFrame<'a>),
    CancelRequest(CancelRequestFrame),
    Password(PasswordFrame),
    Query(QueryFrame<'a>),
    Parse(ParseFrame<'a>),
    Bind(BindFrame<'a>),
    Describe(DescribeFrame<'a>),
    Execute(ExecuteFrame<'a>),
    Close(CloseFrame<'a>),
    CopyData(CopyDataFrame<'a>),
    CopyDone,
    CopyFail(CopyFailFrame<'a>),
    Sync,
    Flush,
    Terminate,
}

impl FrontendMessage<'_> {
    pub fn encode(&self, pool: &SlabPool) -> Result<EncodedMessage, EncodeError> {
        match self {
            FrontendMessage::SslRequest => SslRequestFrame.encode(pool),
            FrontendMessage::Startup(m) => m.encode(pool),
            FrontendMessage::CancelRequest(m) => m.encode(pool),
            FrontendMessage::Password(m) => m.encode(pool),
            FrontendMessage::Query(m) => m.encode(pool),
            FrontendMessage::Parse(m) => m.encode(pool),
            FrontendMessage::Bind(m) => m.encode(pool),
            FrontendMessage::Describe(m) => m.encode(pool),
            FrontendMessage::Execute(m) => m.encode(pool),
            FrontendMessage::Close(m) => m.encode(pool),
            FrontendMessage::CopyData(m) => m.encode(pool),
            FrontendMessage::CopyDone => CopyDoneFrame.encode(pool),
            FrontendMessage::CopyFail(m) => m.encode(pool),
            FrontendMessage::Sync => SyncFrame.encode(pool),
            FrontendMessage::Flush => FlushFrame.encode(pool),
            FrontendMessage::Terminate => TerminateFrame.encode(pool),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::SslRequest => "SSLRequest",
            FrontendMessage::Startup(_) => "StartupMessage",
            FrontendMessage::CancelRequest(_) => "CancelRequest",
            FrontendMessage::Password(_) => "PasswordMessage",
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse(_) => "Parse",
            FrontendMessage::Bind(_) => "Bind",
            FrontendMessage::Describe(_) => "Describe",
            FrontendMessage::Execute(_) => "Execute",
            FrontendMessage::Close(_) => "Close",
            FrontendMessage::CopyData(_) => "CopyData",
            FrontendMessage::CopyDone => "CopyDone",
            FrontendMessage::CopyFail(_) => "CopyFail",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Terminate => "Terminate",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
