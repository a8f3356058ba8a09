use std::fmt;

use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- TransactionStatus -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionStatus {
    #[default]
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

// -----------------------------------------------------------------------------
// ----- ReadyForQuery ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl BackendFrame for ReadyForQuery {
    const TAG: BackendTag = BackendTag::ReadyForQuery;
    const FIXED_LEN: Option<usize> = Some(5);

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        let byte = payload.u8()?;
        let status = TransactionStatus::from_byte(byte)
            .ok_or_else(|| payload.malformed("unknown transaction status"))?;
        Ok(Self { status })
    }
}
