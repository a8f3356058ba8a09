use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter, cstr_len};

// -----------------------------------------------------------------------------
// ----- ObjectKind ------------------------------------------------------------

/// Target of Describe and Close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Statement, // 'S'
    Portal,    // 'P'
}

impl ObjectKind {
    pub fn as_byte(self) -> u8 {
        match self {
            ObjectKind::Statement => b'S',
            ObjectKind::Portal => b'P',
        }
    }
}

// -----------------------------------------------------------------------------
// ----- DescribeFrame ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescribeFrame<'a> {
    pub kind: ObjectKind,
    pub name: &'a str,
}

impl FrontendFrame for DescribeFrame<'_> {
    const TAG: Option<u8> = Some(b'D');

    fn body_size(&self) -> usize {
        1 + cstr_len(self.name)
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_u8(self.kind.as_byte());
        out.put_cstr("describe target", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SlabPool;

    #[test]
    fn describe_portal() {
        let pool = SlabPool::new();
        let msg = DescribeFrame {
            kind: ObjectKind::Portal,
            name: "p1",
        }
        .encode(&pool)
        .unwrap();
        assert_eq!(msg.as_bytes(), b"D\0\0\0\x08Pp1\0");
    }
}
