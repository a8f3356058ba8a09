use bytes::Bytes;

use crate::{
    errors::MalformedMessage,
    wire_protocol::{FormatCode, utils::PayloadReader},
};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- CopyResponse ----------------------------------------------------------

/// Shared body of CopyIn/CopyOut/CopyBoth responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    pub format: FormatCode,
    pub column_formats: Vec<FormatCode>,
}

fn decode_copy_response(payload: &mut PayloadReader<'_>) -> Result<CopyResponse, MalformedMessage> {
    let format = FormatCode::from_i16(payload.u8()? as i16)
        .ok_or_else(|| payload.malformed("unknown overall copy format"))?;

    let count = payload.count16()?;
    if payload.remaining() != count * 2 {
        return Err(payload.malformed("column format count disagrees with length"));
    }

    let mut column_formats = Vec::with_capacity(count);
    for _ in 0..count {
        let code = payload.i16()?;
        let fmt = FormatCode::from_i16(code)
            .ok_or_else(|| payload.malformed("unknown column copy format"))?;
        column_formats.push(fmt);
    }

    Ok(CopyResponse {
        format,
        column_formats,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInResponse(pub CopyResponse);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutResponse(pub CopyResponse);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyBothResponse(pub CopyResponse);

impl BackendFrame for CopyInResponse {
    const TAG: BackendTag = BackendTag::CopyInResponse;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        decode_copy_response(payload).map(Self)
    }
}

impl BackendFrame for CopyOutResponse {
    const TAG: BackendTag = BackendTag::CopyOutResponse;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        decode_copy_response(payload).map(Self)
    }
}

impl BackendFrame for CopyBothResponse {
    const TAG: BackendTag = BackendTag::CopyBothResponse;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        decode_copy_response(payload).map(Self)
    }
}

// -----------------------------------------------------------------------------
// ----- CopyData --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyData(pub Bytes);

impl BackendFrame for CopyData {
    const TAG: BackendTag = BackendTag::CopyData;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        Ok(Self(Bytes::copy_from_slice(payload.rest())))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
