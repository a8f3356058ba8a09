use crate::{
    errors::MalformedMessage,
    wire_protocol::{FormatCode, utils::PayloadReader},
};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Fixed part of each field after its name.
const FIELD_TAIL_LEN: usize = 18;

// -----------------------------------------------------------------------------
// ----- FieldDescription ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_len: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

// -----------------------------------------------------------------------------
// ----- RowDescription --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl BackendFrame for RowDescription {
    const TAG: BackendTag = BackendTag::RowDescription;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        let count = payload.count16()?;

        // each field is at least an empty name plus the fixed tail
        if count * (1 + FIELD_TAIL_LEN) > payload.remaining() {
            return Err(payload.malformed("field count exceeds declared length"));
        }

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name = payload.cstr()?.to_string();
            let table_oid = payload.u32()?;
            let column_attr = payload.i16()?;
            let type_oid = payload.u32()?;
            let type_len = payload.i16()?;
            let type_modifier = payload.i32()?;
            let format = FormatCode::from_i16(payload.i16()?)
                .ok_or_else(|| payload.malformed("unknown field format code"))?;

            fields.push(FieldDescription {
                name,
                table_oid,
                column_attr,
                type_oid,
                type_len,
                type_modifier,
                format,
            });
        }

        Ok(Self { fields })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
