use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter, cstr_len};

pub const PROTOCOL_VERSION_3_0: i32 = 196608;

// -----------------------------------------------------------------------------
// ----- StartupFrame ----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFrame<'a> {
    pub user: &'a str,
    pub database: &'a str,
    pub replication: bool,
    /// Additional run-time parameters such as `application_name`.
    pub params: &'a [(String, String)],
}

impl<'a> StartupFrame<'a> {
    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        let replication = self.replication.then_some(("replication", "true"));
        [("user", self.user), ("database", self.database)]
            .into_iter()
            .chain(replication)
            .chain(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl FrontendFrame for StartupFrame<'_> {
    const TAG: Option<u8> = None;

    fn body_size(&self) -> usize {
        let pairs: usize = self.pairs().map(|(k, v)| cstr_len(k) + cstr_len(v)).sum();
        4 + pairs + 1
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_i32(PROTOCOL_VERSION_3_0);
        for (key, value) in self.pairs() {
            out.put_cstr("startup parameter name", key)?;
            out.put_cstr("startup parameter value", value)?;
        }
        out.put_u8(0);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
