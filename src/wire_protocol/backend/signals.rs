//! Backend messages with an empty payload.

use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

macro_rules! empty_backend_frame {
    ($name:ident, $tag:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl BackendFrame for $name {
            const TAG: BackendTag = BackendTag::$tag;
            const FIXED_LEN: Option<usize> = Some(4);

            fn decode(_payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
                Ok($name)
            }
        }
    };
}

empty_backend_frame!(ParseComplete, ParseComplete);
empty_backend_frame!(BindComplete, BindComplete);
empty_backend_frame!(CloseComplete, CloseComplete);
empty_backend_frame!(NoData, NoData);
empty_backend_frame!(EmptyQueryResponse, EmptyQueryResponse);
empty_backend_frame!(PortalSuspended, PortalSuspended);
empty_backend_frame!(CopyDone, CopyDone);
