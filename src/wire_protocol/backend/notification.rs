use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- NotificationResponse --------------------------------------------------

/// Asynchronous LISTEN/NOTIFY delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse {
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

impl BackendFrame for NotificationResponse {
    const TAG: BackendTag = BackendTag::NotificationResponse;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        Ok(Self {
            process_id: payload.i32()?,
            channel: payload.cstr()?.to_string(),
            payload: payload.cstr()?.to_string(),
        })
    }
}
