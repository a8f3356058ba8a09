//! Backend (server to client) messages.
//!
//! Each message type implements [`BackendFrame`]: a three-way `matches` on
//! the buffered bytes, and a `parse` that either decodes the whole frame and
//! moves the cursor past it, or reports the frame as malformed and leaves
//! the cursor where it was.

pub mod authentication;
pub mod backend_key_data;
pub mod command_complete;
pub mod copy;
pub mod data_row;
pub mod error_response;
pub mod message;
pub mod negotiate_protocol_version;
pub mod notification;
pub mod parameter_description;
pub mod parameter_status;
pub mod ready_for_query;
pub mod row_description;
pub mod signals;
pub mod tag;

pub use authentication::{AuthMechanism, Authentication};
pub use backend_key_data::BackendKeyData;
pub use command_complete::CommandComplete;
pub use copy::{CopyBothResponse, CopyData, CopyInResponse, CopyOutResponse, CopyResponse};
pub use data_row::DataRow;
pub use error_response::{ErrorResponse, NoticeResponse};
pub use message::BackendMessage;
pub use negotiate_protocol_version::NegotiateProtocolVersion;
pub use notification::NotificationResponse;
pub use parameter_description::ParameterDescription;
pub use parameter_status::ParameterStatus;
pub use ready_for_query::{ReadyForQuery, TransactionStatus};
pub use row_description::{FieldDescription, RowDescription};
pub use signals::{
    BindComplete, CloseComplete, CopyDone, EmptyQueryResponse, NoData, ParseComplete,
    PortalSuspended,
};
pub use tag::{BackendTag, TagSet};

use crate::{
    errors::MalformedMessage,
    net::AccumulationBuffer,
    wire_protocol::utils::{MatchState, PayloadReader, match_tagged},
};

// -----------------------------------------------------------------------------
// ----- BackendFrame ----------------------------------------------------------

pub trait BackendFrame: Sized {
    const TAG: BackendTag;

    /// Declared length every instance must carry, for fixed-size messages.
    const FIXED_LEN: Option<usize> = None;

    /// Decode the payload. Must consume exactly the declared structure; any
    /// trailing byte is reported by the caller.
    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage>;

    /// Is the front of `buf` this message, and is all of it buffered?
    fn matches(buf: &[u8]) -> MatchState {
        match_tagged(buf, Self::TAG.as_byte())
    }

    /// Decode a complete frame held in a slice (header included).
    fn from_frame(frame: &[u8]) -> Result<Self, MalformedMessage> {
        let tag = Self::TAG.as_byte();
        let mut payload = PayloadReader::new(frame, tag)?;

        if let Some(fixed) = Self::FIXED_LEN {
            if frame.len() != 1 + fixed {
                return Err(MalformedMessage::new(tag, "fixed-size message with wrong length"));
            }
        }

        let value = Self::decode(&mut payload)?;
        payload.finish()?;
        Ok(value)
    }

    /// Parse the matched frame at the cursor and advance past exactly
    /// `1 + declared length` bytes. On error the cursor does not move.
    fn parse(buf: &mut AccumulationBuffer) -> Result<Self, MalformedMessage> {
        let MatchState::Is { total } = Self::matches(buf.unread()) else {
            return Err(MalformedMessage::new(
                Self::TAG.as_byte(),
                "parse reached before the frame was complete",
            ));
        };

        let value = Self::from_frame(&buf.unread()[..total])?;
        buf.advance(total)
            .map_err(|_| MalformedMessage::new(Self::TAG.as_byte(), "cursor overrun"))?;
        Ok(value)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
