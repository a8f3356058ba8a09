use std::fmt;

// -----------------------------------------------------------------------------
// ----- BackendTag ------------------------------------------------------------

/// Every backend message this client understands. Raw tag bytes outside
/// this set are never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendTag {
    Authentication,
    ParameterStatus,
    BackendKeyData,
    ReadyForQuery,
    ErrorResponse,
    NoticeResponse,
    NegotiateProtocolVersion,
    RowDescription,
    DataRow,
    CommandComplete,
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    EmptyQueryResponse,
    PortalSuspended,
    ParameterDescription,
    NotificationResponse,
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,
    CopyData,
    CopyDone,
}

impl BackendTag {
    pub const fn from_byte(byte: u8) -> Option<BackendTag> {
        Some(match byte {
            b'R' => BackendTag::Authentication,
            b'S' => BackendTag::ParameterStatus,
            b'K' => BackendTag::BackendKeyData,
            b'Z' => BackendTag::ReadyForQuery,
            b'E' => BackendTag::ErrorResponse,
            b'N' => BackendTag::NoticeResponse,
            b'v' => BackendTag::NegotiateProtocolVersion,
            b'T' => BackendTag::RowDescription,
            b'D' => BackendTag::DataRow,
            b'C' => BackendTag::CommandComplete,
            b'1' => BackendTag::ParseComplete,
            b'2' => BackendTag::BindComplete,
            b'3' => BackendTag::CloseComplete,
            b'n' => BackendTag::NoData,
            b'I' => BackendTag::EmptyQueryResponse,
            b's' => BackendTag::PortalSuspended,
            b't' => BackendTag::ParameterDescription,
            b'A' => BackendTag::NotificationResponse,
            b'G' => BackendTag::CopyInResponse,
            b'H' => BackendTag::CopyOutResponse,
            b'W' => BackendTag::CopyBothResponse,
            b'd' => BackendTag::CopyData,
            b'c' => BackendTag::CopyDone,
            _ => return None,
        })
    }

    pub const fn as_byte(self) -> u8 {
        match self {
            BackendTag::Authentication => b'R',
            BackendTag::ParameterStatus => b'S',
            BackendTag::BackendKeyData => b'K',
            BackendTag::ReadyForQuery => b'Z',
            BackendTag::ErrorResponse => b'E',
            BackendTag::NoticeResponse => b'N',
            BackendTag::NegotiateProtocolVersion => b'v',
            BackendTag::RowDescription => b'T',
            BackendTag::DataRow => b'D',
            BackendTag::CommandComplete => b'C',
            BackendTag::ParseComplete => b'1',
            BackendTag::BindComplete => b'2',
            BackendTag::CloseComplete => b'3',
            BackendTag::NoData => b'n',
            BackendTag::EmptyQueryResponse => b'I',
            BackendTag::PortalSuspended => b's',
            BackendTag::ParameterDescription => b't',
            BackendTag::NotificationResponse => b'A',
            BackendTag::CopyInResponse => b'G',
            BackendTag::CopyOutResponse => b'H',
            BackendTag::CopyBothResponse => b'W',
            BackendTag::CopyData => b'd',
            BackendTag::CopyDone => b'c',
        }
    }

    const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}('{}')", self, self.as_byte() as char)
    }
}

// -----------------------------------------------------------------------------
// ----- TagSet ----------------------------------------------------------------

/// Set of tags a phase is willing to lex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSet(u32);

impl TagSet {
    pub const fn of(tags: &[BackendTag]) -> TagSet {
        let mut bits = 0u32;
        let mut i = 0;
        while i < tags.len() {
            bits |= tags[i].bit();
            i += 1;
        }
        TagSet(bits)
    }

    #[inline]
    pub const fn contains(self, tag: BackendTag) -> bool {
        self.0 & tag.bit() != 0
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip_for_every_tag() {
        for byte in 0u8..=255 {
            if let Some(tag) = BackendTag::from_byte(byte) {
                assert_eq!(tag.as_byte(), byte);
            }
        }
    }

    #[test]
    fn unknown_bytes_have_no_tag() {
        assert_eq!(BackendTag::from_byte(b'X'), None);
        assert_eq!(BackendTag::from_byte(0), None);
    }

    #[test]
    fn tag_set_membership() {
        const AUTH: TagSet = TagSet::of(&[BackendTag::Authentication, BackendTag::ErrorResponse]);
        assert!(AUTH.contains(BackendTag::Authentication));
        assert!(!AUTH.contains(BackendTag::DataRow));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
