use crate::{
    errors::{ErrorNotice, MalformedMessage},
    net::AccumulationBuffer,
    wire_protocol::utils::MatchState,
};

use super::*;

// -----------------------------------------------------------------------------
// ----- BackendMessage --------------------------------------------------------

/// Any decoded backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    Authentication(Authentication),
    ParameterStatus(ParameterStatus),
    BackendKeyData(BackendKeyData),
    ReadyForQuery(ReadyForQuery),
    ErrorResponse(ErrorNotice),
    NoticeResponse(ErrorNotice),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    RowDescription(RowDescription),
    DataRow(DataRow),
    CommandComplete(CommandComplete),
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    EmptyQueryResponse,
    PortalSuspended,
    ParameterDescription(ParameterDescription),
    NotificationResponse(NotificationResponse),
    CopyInResponse(CopyResponse),
    CopyOutResponse(CopyResponse),
    CopyBothResponse(CopyResponse),
    CopyData(bytes::Bytes),
    CopyDone,
}

// -----------------------------------------------------------------------------
// ----- BackendMessage: Static ------------------------------------------------

impl BackendMessage {
    /// Three-way match of the frame at the front of `buf` against `tag`.
    pub fn matches(tag: BackendTag, buf: &[u8]) -> MatchState {
        match tag {
            BackendTag::Authentication => Authentication::matches(buf),
            BackendTag::ParameterStatus => ParameterStatus::matches(buf),
            BackendTag::BackendKeyData => BackendKeyData::matches(buf),
            BackendTag::ReadyForQuery => ReadyForQuery::matches(buf),
            BackendTag::ErrorResponse => ErrorResponse::matches(buf),
            BackendTag::NoticeResponse => NoticeResponse::matches(buf),
            BackendTag::NegotiateProtocolVersion => NegotiateProtocolVersion::matches(buf),
            BackendTag::RowDescription => RowDescription::matches(buf),
            BackendTag::DataRow => DataRow::matches(buf),
            BackendTag::CommandComplete => CommandComplete::matches(buf),
            BackendTag::ParseComplete => ParseComplete::matches(buf),
            BackendTag::BindComplete => BindComplete::matches(buf),
            BackendTag::CloseComplete => CloseComplete::matches(buf),
            BackendTag::NoData => NoData::matches(buf),
            BackendTag::EmptyQueryResponse => EmptyQueryResponse::matches(buf),
            BackendTag::PortalSuspended => PortalSuspended::matches(buf),
            BackendTag::ParameterDescription => ParameterDescription::matches(buf),
            BackendTag::NotificationResponse => NotificationResponse::matches(buf),
            BackendTag::CopyInResponse => CopyInResponse::matches(buf),
            BackendTag::CopyOutResponse => CopyOutResponse::matches(buf),
            BackendTag::CopyBothResponse => CopyBothResponse::matches(buf),
            BackendTag::CopyData => CopyData::matches(buf),
            BackendTag::CopyDone => CopyDone::matches(buf),
        }
    }

    /// Parse the matched frame at the cursor. See [`BackendFrame::parse`].
    pub fn parse(
        tag: BackendTag,
        buf: &mut AccumulationBuffer,
    ) -> Result<BackendMessage, MalformedMessage> {
        use BackendMessage as M;

        Ok(match tag {
            BackendTag::Authentication => M::Authentication(Authentication::parse(buf)?),
            BackendTag::ParameterStatus => M::ParameterStatus(ParameterStatus::parse(buf)?),
            BackendTag::BackendKeyData => M::BackendKeyData(BackendKeyData::parse(buf)?),
            BackendTag::ReadyForQuery => M::ReadyForQuery(ReadyForQuery::parse(buf)?),
            BackendTag::ErrorResponse => M::ErrorResponse(ErrorResponse::parse(buf)?.0),
            BackendTag::NoticeResponse => M::NoticeResponse(NoticeResponse::parse(buf)?.0),
            BackendTag::NegotiateProtocolVersion => {
                M::NegotiateProtocolVersion(NegotiateProtocolVersion::parse(buf)?)
            }
            BackendTag::RowDescription => M::RowDescription(RowDescription::parse(buf)?),
            BackendTag::DataRow => M::DataRow(DataRow::parse(buf)?),
            BackendTag::CommandComplete => M::CommandComplete(CommandComplete::parse(buf)?),
            BackendTag::ParseComplete => ParseComplete::parse(buf).map(|_| M::ParseComplete)?,
            BackendTag::BindComplete => BindComplete::parse(buf).map(|_| M::BindComplete)?,
            BackendTag::CloseComplete => CloseComplete::parse(buf).map(|_| M::CloseComplete)?,
            BackendTag::NoData => NoData::parse(buf).map(|_| M::NoData)?,
            BackendTag::EmptyQueryResponse => {
                EmptyQueryResponse::parse(buf).map(|_| M::EmptyQueryResponse)?
            }
            BackendTag::PortalSuspended => {
                PortalSuspended::parse(buf).map(|_| M::PortalSuspended)?
            }
            BackendTag::ParameterDescription => {
                M::ParameterDescription(ParameterDescription::parse(buf)?)
            }
            BackendTag::NotificationResponse => {
                M::NotificationResponse(NotificationResponse::parse(buf)?)
            }
            BackendTag::CopyInResponse => M::CopyInResponse(CopyInResponse::parse(buf)?.0),
            BackendTag::CopyOutResponse => M::CopyOutResponse(CopyOutResponse::parse(buf)?.0),
            BackendTag::CopyBothResponse => M::CopyBothResponse(CopyBothResponse::parse(buf)?.0),
            BackendTag::CopyData => M::CopyData(CopyData::parse(buf)?.0),
            BackendTag::CopyDone => CopyDone::parse(buf).map(|_| M::CopyDone)?,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- BackendMessage: Public ------------------------------------------------

impl BackendMessage {
    pub fn tag(&self) -> BackendTag {
        match self {
            BackendMessage::Authentication(_) => BackendTag::Authentication,
            BackendMessage::ParameterStatus(_) => BackendTag::ParameterStatus,
            BackendMessage::BackendKeyData(_) => BackendTag::BackendKeyData,
            BackendMessage::ReadyForQuery(_) => BackendTag::ReadyForQuery,
            BackendMessage::ErrorResponse(_) => BackendTag::ErrorResponse,
            BackendMessage::NoticeResponse(_) => BackendTag::NoticeResponse,
            BackendMessage::NegotiateProtocolVersion(_) => BackendTag::NegotiateProtocolVersion,
            BackendMessage::RowDescription(_) => BackendTag::RowDescription,
            BackendMessage::DataRow(_) => BackendTag::DataRow,
            BackendMessage::CommandComplete(_) => BackendTag::CommandComplete,
            BackendMessage::ParseComplete => BackendTag::ParseComplete,
            BackendMessage::BindComplete => BackendTag::BindComplete,
            BackendMessage::CloseComplete => BackendTag::CloseComplete,
            BackendMessage::NoData => BackendTag::NoData,
            BackendMessage::EmptyQueryResponse => BackendTag::EmptyQueryResponse,
            BackendMessage::PortalSuspended => BackendTag::PortalSuspended,
            BackendMessage::ParameterDescription(_) => BackendTag::ParameterDescription,
            BackendMessage::NotificationResponse(_) => BackendTag::NotificationResponse,
            BackendMessage::CopyInResponse(_) => BackendTag::CopyInResponse,
            BackendMessage::CopyOutResponse(_) => BackendTag::CopyOutResponse,
            BackendMessage::CopyBothResponse(_) => BackendTag::CopyBothResponse,
            BackendMessage::CopyData(_) => BackendTag::CopyData,
            BackendMessage::CopyDone => BackendTag::CopyDone,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
