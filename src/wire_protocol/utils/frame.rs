//! Header matching and bounds-checked payload reading for backend frames.
//!
//! Every tagged frame is `tag:1, len:i32 BE, payload:len-4`. The length
//! counts itself but not the tag.

use crate::errors::MalformedMessage;

use super::read_cstr::{ReadCStrError, read_cstr};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const HEADER_LEN: usize = 5;
pub const LEN_FIELD: usize = 4;

// -----------------------------------------------------------------------------
// ----- MatchState ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// The tag byte belongs to another message.
    NotThis,
    /// Tag fits but the header or payload is not fully buffered yet.
    Incomplete,
    /// The whole frame is buffered; `total` is `1 + declared length`.
    Is { total: usize },
}

/// Three-way match against `tag`. A declared length below 4 can never be
/// completed, so it reports `Is` over the header alone and leaves the
/// rejection to the parser.
pub fn match_tagged(buf: &[u8], tag: u8) -> MatchState {
    let Some(&first) = buf.first() else {
        return MatchState::Incomplete;
    };
    if first != tag {
        return MatchState::NotThis;
    }
    if buf.len() < HEADER_LEN {
        return MatchState::Incomplete;
    }

    let declared = declared_len(buf);
    if declared < LEN_FIELD as i64 {
        return MatchState::Is { total: HEADER_LEN };
    }

    let total = 1 + declared as usize;
    if buf.len() < total {
        return MatchState::Incomplete;
    }
    MatchState::Is { total }
}

/// Rejects a buffered header whose frame would exceed `limit` bytes. A
/// header that is not fully buffered yet passes.
pub fn check_frame_limit(buf: &[u8], limit: usize) -> Result<(), MalformedMessage> {
    if buf.len() < HEADER_LEN {
        return Ok(());
    }
    let declared = declared_len(buf);
    if declared > 0 && 1 + declared as usize > limit {
        return Err(MalformedMessage::new(buf[0], "declared length exceeds frame limit"));
    }
    Ok(())
}

/// Declared length of a buffered header, signed so negative values survive.
#[inline]
pub fn declared_len(buf: &[u8]) -> i64 {
    i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as i64
}

// -----------------------------------------------------------------------------
// ----- PayloadReader ---------------------------------------------------------

/// Cursor over one frame's payload. Every read is bounds-checked against the
/// declared length and fails as `MalformedMessage` rather than panicking.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    tag: u8,
    rest: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    /// Validate the header of a complete frame and position after it.
    pub fn new(frame: &'a [u8], tag: u8) -> Result<Self, MalformedMessage> {
        if frame.len() < HEADER_LEN || frame[0] != tag {
            return Err(MalformedMessage::new(tag, "short or mistagged header"));
        }
        let declared = declared_len(frame);
        if declared < LEN_FIELD as i64 {
            return Err(MalformedMessage::new(tag, "declared length below 4"));
        }
        if frame.len() != 1 + declared as usize {
            return Err(MalformedMessage::new(tag, "frame size disagrees with declared length"));
        }
        Ok(Self {
            tag,
            rest: &frame[HEADER_LEN..],
        })
    }

    #[inline]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    pub fn malformed(&self, reason: &'static str) -> MalformedMessage {
        MalformedMessage::new(self.tag, reason)
    }

    pub fn u8(&mut self) -> Result<u8, MalformedMessage> {
        let [b, rest @ ..] = self.rest else {
            return Err(self.malformed("payload ends before byte field"));
        };
        self.rest = rest;
        Ok(*b)
    }

    pub fn i16(&mut self) -> Result<i16, MalformedMessage> {
        let raw = self.take_array::<2>("payload ends before int16 field")?;
        Ok(i16::from_be_bytes(raw))
    }

    pub fn i32(&mut self) -> Result<i32, MalformedMessage> {
        let raw = self.take_array::<4>("payload ends before int32 field")?;
        Ok(i32::from_be_bytes(raw))
    }

    pub fn u32(&mut self) -> Result<u32, MalformedMessage> {
        let raw = self.take_array::<4>("payload ends before int32 field")?;
        Ok(u32::from_be_bytes(raw))
    }

    /// Non-negative int16 count, as used by field/column/parameter lists.
    pub fn count16(&mut self) -> Result<usize, MalformedMessage> {
        let n = self.i16()?;
        if n < 0 {
            return Err(self.malformed("negative count"));
        }
        Ok(n as usize)
    }

    pub fn cstr(&mut self) -> Result<&'a str, MalformedMessage> {
        read_cstr(&mut self.rest).map_err(|e| match e {
            ReadCStrError::UnexpectedEof => self.malformed("string not terminated within length"),
            ReadCStrError::Utf8Error(_) => self.malformed("string is not valid UTF-8"),
        })
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], MalformedMessage> {
        if n > self.rest.len() {
            return Err(self.malformed("payload ends before byte run"));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    /// Everything left in the payload.
    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.rest)
    }

    /// The payload must be fully consumed.
    pub fn finish(self) -> Result<(), MalformedMessage> {
        if !self.rest.is_empty() {
            return Err(self.malformed("trailing bytes after declared structure"));
        }
        Ok(())
    }

    fn take_array<const N: usize>(&mut self, reason: &'static str) -> Result<[u8; N], MalformedMessage> {
        let head = self.bytes(N).map_err(|_| self.malformed(reason))?;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_needs_full_header() {
        for n in 0..HEADER_LEN {
            let frame = [b'Z', 0, 0, 0, 5, b'I'];
            let state = match_tagged(&frame[..n], b'Z');
            assert_eq!(state, MatchState::Incomplete, "prefix {n}");
        }
    }

    #[test]
    fn match_needs_full_payload() {
        let frame = [b'Z', 0, 0, 0, 5, b'I'];
        assert_eq!(match_tagged(&frame[..5], b'Z'), MatchState::Incomplete);
        assert_eq!(match_tagged(&frame, b'Z'), MatchState::Is { total: 6 });
    }

    #[test]
    fn match_rejects_other_tag() {
        assert_eq!(match_tagged(&[b'E'], b'Z'), MatchState::NotThis);
    }

    #[test]
    fn impossible_length_matches_for_rejection() {
        let frame = [b'Z', 0, 0, 0, 3];
        assert_eq!(match_tagged(&frame, b'Z'), MatchState::Is { total: 5 });
        assert!(PayloadReader::new(&frame, b'Z').is_err());
    }

    #[test]
    fn negative_length_is_malformed() {
        let frame = [b'D', 0xff, 0xff, 0xff, 0xff];
        assert_eq!(match_tagged(&frame, b'D'), MatchState::Is { total: 5 });
        assert!(PayloadReader::new(&frame, b'D').is_err());
    }

    #[test]
    fn frame_limit_counts_the_tag() {
        let frame = [b'D', 0, 0, 0x10, 0];
        assert!(check_frame_limit(&frame, 0x1001).is_ok());
        assert!(check_frame_limit(&frame, 0x1000).is_err());
        assert!(check_frame_limit(&frame[..4], 1).is_ok());
    }

    #[test]
    fn reader_is_bounds_checked() {
        let frame = [b'K', 0, 0, 0, 6, 0, 1];
        let mut reader = PayloadReader::new(&frame, b'K').unwrap();
        assert_eq!(reader.i16().unwrap(), 1);
        assert!(reader.i32().is_err());
    }

    #[test]
    fn finish_rejects_trailing_bytes() {
        let frame = [b'Z', 0, 0, 0, 6, b'I', b'X'];
        let mut reader = PayloadReader::new(&frame, b'Z').unwrap();
        reader.u8().unwrap();
        assert!(reader.finish().is_err());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
