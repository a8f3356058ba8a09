use crate::{
    errors::{ErrorNotice, MalformedMessage},
    wire_protocol::utils::PayloadReader,
};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- Field list ------------------------------------------------------------

/// `(code:u8, value:cstr)*` closed by a single zero byte, which must be the
/// last byte of the declared length.
fn decode_fields(payload: &mut PayloadReader<'_>) -> Result<ErrorNotice, MalformedMessage> {
    let mut notice = ErrorNotice::default();
    loop {
        let code = payload.u8()?;
        if code == 0 {
            break;
        }
        let value = payload.cstr()?;
        notice.set_field(code, value);
    }
    Ok(notice)
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse / NoticeResponse ----------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse(pub ErrorNotice);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeResponse(pub ErrorNotice);

impl BackendFrame for ErrorResponse {
    const TAG: BackendTag = BackendTag::ErrorResponse;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        decode_fields(payload).map(Self)
    }
}

impl BackendFrame for NoticeResponse {
    const TAG: BackendTag = BackendTag::NoticeResponse;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        let mut notice = decode_fields(payload)?;
        // a notice without V/S still is a notice
        if notice.localized_severity.is_empty() {
            notice.severity = crate::errors::Severity::Notice;
        }
        Ok(Self(notice))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Severity, wire_protocol::backend::test_support::frame};

    #[test]
    fn decodes_round_trip_from_builder() {
        let notice = ErrorNotice::new(Severity::Fatal, "28P01", "password authentication failed")
            .with_hint("check pg_hba.conf");
        let bytes = notice.to_bytes(b'E');
        let parsed = ErrorResponse::from_frame(&bytes).unwrap();
        assert_eq!(parsed.0, notice);
    }

    #[test]
    fn missing_final_zero_is_malformed() {
        // declared length covers the fields but not the closing zero
        let payload = b"SERROR\0C42601\0Msyntax error\0";
        assert!(ErrorResponse::from_frame(&frame(b'E', payload)).is_err());
    }

    #[test]
    fn unterminated_field_is_malformed() {
        let payload = b"SERROR\0Mboom";
        assert!(ErrorResponse::from_frame(&frame(b'E', payload)).is_err());
    }

    #[test]
    fn bytes_after_terminator_are_malformed() {
        let payload = b"SNOTICE\0\0junk";
        assert!(NoticeResponse::from_frame(&frame(b'N', payload)).is_err());
    }

    #[test]
    fn empty_field_list_is_valid() {
        let parsed = NoticeResponse::from_frame(&frame(b'N', b"\0")).unwrap();
        assert_eq!(parsed.0.severity, Severity::Notice);
    }
}
