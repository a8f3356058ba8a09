use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter, cstr_len};

/// Simple-protocol query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryFrame<'a> {
    pub sql: &'a str,
}

impl<'a> QueryFrame<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self { sql }
    }
}

impl FrontendFrame for QueryFrame<'_> {
    const TAG: Option<u8> = Some(b'Q');

    fn body_size(&self) -> usize {
        cstr_len(self.sql)
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_cstr("query", self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::SlabError, memory::SlabPool};

    #[test]
    fn encodes_sql() {
        let pool = SlabPool::new();
        let msg = QueryFrame::new("select 1").encode(&pool).unwrap();
        assert_eq!(msg.as_bytes(), b"Q\0\0\0\x0dselect 1\0");
    }

    #[test]
    fn oversized_query_is_rejected() {
        let pool = SlabPool::new();
        let sql = "x".repeat(70_000);
        let err = QueryFrame::new(&sql).encode(&pool).unwrap_err();
        assert!(matches!(err, EncodeError::Slab(SlabError::TooLarge { .. })));
    }
}
