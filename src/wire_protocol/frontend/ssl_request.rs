use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter};

pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Untagged request asking the server to switch to TLS. The server replies
/// with a single byte: `S` to proceed, `N` to refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslRequestFrame;

impl FrontendFrame for SslRequestFrame {
    const TAG: Option<u8> = None;

    fn body_size(&self) -> usize {
        4
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_i32(SSL_REQUEST_CODE);
        Ok(())
    }
}
