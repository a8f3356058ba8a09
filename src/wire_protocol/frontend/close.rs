use crate::errors::EncodeError;

use super::{FrontendFrame, ObjectKind, SlabWriter, cstr_len};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseFrame<'a> {
    pub kind: ObjectKind,
    pub name: &'a str,
}

impl FrontendFrame for CloseFrame<'_> {
    const TAG: Option<u8> = Some(b'C');

    fn body_size(&self) -> usize {
        1 + cstr_len(self.name)
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_u8(self.kind.as_byte());
        out.put_cstr("close target", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SlabPool;

    #[test]
    fn close_unnamed_statement() {
        let pool = SlabPool::new();
        let msg = CloseFrame {
            kind: ObjectKind::Statement,
            name: "",
        }
        .encode(&pool)
        .unwrap();
        assert_eq!(msg.as_bytes(), b"C\0\0\0\x06S\0");
    }
}
