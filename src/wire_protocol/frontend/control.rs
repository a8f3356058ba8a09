//! Body-less frontend messages.

use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter};

macro_rules! empty_frontend_frame {
    ($(#[$doc:meta])* $name:ident, $tag:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl FrontendFrame for $name {
            const TAG: Option<u8> = Some($tag);

            fn body_size(&self) -> usize {
                0
            }

            fn write_body(&self, _out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
                Ok(())
            }
        }
    };
}

empty_frontend_frame!(
    /// Closes an extended-query cycle; the server answers with ReadyForQuery.
    SyncFrame,
    b'S'
);
empty_frontend_frame!(
    /// Ask the server to deliver pending output without ending the cycle.
    FlushFrame,
    b'H'
);
empty_frontend_frame!(TerminateFrame, b'X');
