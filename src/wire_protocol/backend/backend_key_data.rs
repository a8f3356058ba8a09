use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- BackendKeyData --------------------------------------------------------

/// Cancellation key for this session. Protocol 3.0 fixes it at 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendKeyData {
    pub process_id: i32,
    pub secret_key: i32,
}

impl BackendFrame for BackendKeyData {
    const TAG: BackendTag = BackendTag::BackendKeyData;
    const FIXED_LEN: Option<usize> = Some(12);

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        Ok(Self {
            process_id: payload.i32()?,
            secret_key: payload.i32()?,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
