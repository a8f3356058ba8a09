use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- ParameterStatus -------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl BackendFrame for ParameterStatus {
    const TAG: BackendTag = BackendTag::ParameterStatus;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        Ok(Self {
            name: payload.cstr()?.to_string(),
            value: payload.cstr()?.to_string(),
        })
    }
}
