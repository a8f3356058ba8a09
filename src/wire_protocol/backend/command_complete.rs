use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- CommandComplete -------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub tag: String,
}

impl CommandComplete {
    /// Leading command word, e.g. `INSERT` or `SELECT`.
    pub fn command(&self) -> &str {
        self.tag.split_whitespace().next().unwrap_or("")
    }

    /// Row count carried by the tag, when the command reports one.
    pub fn rows(&self) -> Option<u64> {
        match self.command() {
            "INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MERGE" | "MOVE" | "FETCH" | "COPY" => {
                self.tag.rsplit(' ').next()?.parse().ok()
            }
            _ => None,
        }
    }
}

impl BackendFrame for CommandComplete {
    const TAG: BackendTag = BackendTag::CommandComplete;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        Ok(Self {
            tag: payload.cstr()?.to_string(),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
