use crate::{errors::EncodeError, wire_protocol::backend::BackendKeyData};

use super::{FrontendFrame, SlabWriter};

pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Sent on a fresh connection to cancel the query running on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequestFrame {
    pub key: BackendKeyData,
}

impl FrontendFrame for CancelRequestFrame {
    const TAG: Option<u8> = None;

    fn body_size(&self) -> usize {
        12
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_i32(CANCEL_REQUEST_CODE);
        out.put_i32(self.key.process_id);
        out.put_i32(self.key.secret_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SlabPool;

    #[test]
    fn sixteen_bytes_with_key() {
        let pool = SlabPool::new();
        let msg = CancelRequestFrame {
            key: BackendKeyData {
                process_id: 1,
                secret_key: 2,
            },
        }
        .encode(&pool)
        .unwrap();
        assert_eq!(
            msg.as_bytes(),
            &[0, 0, 0, 16, 0x04, 0xd2, 0x16, 0x2e, 0, 0, 0, 1, 0, 0, 0, 2]
        );
    }
}
