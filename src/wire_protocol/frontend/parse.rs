use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter, count16, cstr_len};

/// Prepare a statement. An empty name targets the unnamed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseFrame<'a> {
    pub name: &'a str,
    pub sql: &'a str,
    /// Parameter type OIDs; 0 leaves the type to the server.
    pub param_types: &'a [u32],
}

impl FrontendFrame for ParseFrame<'_> {
    const TAG: Option<u8> = Some(b'P');

    fn check(&self) -> Result<(), EncodeError> {
        count16("parameter types", self.param_types.len()).map(|_| ())
    }

    fn body_size(&self) -> usize {
        cstr_len(self.name) + cstr_len(self.sql) + 2 + 4 * self.param_types.len()
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        let count = count16("parameter types", self.param_types.len())?;
        out.put_cstr("statement name", self.name)?;
        out.put_cstr("query", self.sql)?;
        out.put_i16(count);
        for oid in self.param_types {
            out.put_u32(*oid);
        }
        Ok(())
    }
}
