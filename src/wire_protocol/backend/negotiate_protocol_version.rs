use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- NegotiateProtocolVersion ----------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateProtocolVersion {
    /// Newest minor version the server supports for our major version.
    pub newest_minor: i32,
    /// Startup options the server did not recognize.
    pub unrecognized: Vec<String>,
}

impl BackendFrame for NegotiateProtocolVersion {
    const TAG: BackendTag = BackendTag::NegotiateProtocolVersion;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        let newest_minor = payload.i32()?;
        let count = payload.i32()?;
        if count < 0 {
            return Err(payload.malformed("negative option count"));
        }

        let mut unrecognized = Vec::new();
        for _ in 0..count {
            unrecognized.push(payload.cstr()?.to_string());
        }

        Ok(Self {
            newest_minor,
            unrecognized,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
