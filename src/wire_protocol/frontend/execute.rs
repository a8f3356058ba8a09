use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter, cstr_len};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteFrame<'a> {
    pub portal: &'a str,
    /// Row limit; 0 fetches everything.
    pub max_rows: u32,
}

impl FrontendFrame for ExecuteFrame<'_> {
    const TAG: Option<u8> = Some(b'E');

    fn body_size(&self) -> usize {
        cstr_len(self.portal) + 4
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_cstr("portal name", self.portal)?;
        // the wire field is signed; larger limits mean "no limit" anyway
        out.put_i32(i32::try_from(self.max_rows).unwrap_or(0));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SlabPool;

    #[test]
    fn unnamed_portal_with_limit() {
        let pool = SlabPool::new();
        let msg = ExecuteFrame {
            portal: "",
            max_rows: 10,
        }
        .encode(&pool)
        .unwrap();
        assert_eq!(msg.as_bytes(), b"E\0\0\0\x09\0\0\0\0\x0a");
    }
}
