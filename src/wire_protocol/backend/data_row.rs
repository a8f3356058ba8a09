use bytes::Bytes;

use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- DataRow ---------------------------------------------------------------

/// One result row. `None` is SQL NULL; values are raw column bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    pub columns: Vec<Option<Bytes>>,
}

impl BackendFrame for DataRow {
    const TAG: BackendTag = BackendTag::DataRow;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        let count = payload.count16()?;

        // every column needs at least its 4-byte length
        if count * 4 > payload.remaining() {
            return Err(payload.malformed("column count exceeds declared length"));
        }

        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let len = payload.i32()?;
            let value = match len {
                -1 => None,
                n if n < 0 => return Err(payload.malformed("negative column length")),
                n => Some(Bytes::copy_from_slice(payload.bytes(n as usize)?)),
            };
            columns.push(value);
        }

        Ok(Self { columns })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
