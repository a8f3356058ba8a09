use bytes::Bytes;

use crate::{errors::EncodeError, wire_protocol::FormatCode};

use super::{FrontendFrame, SlabWriter, count16, cstr_len};

// -----------------------------------------------------------------------------
// ----- BindFrame -------------------------------------------------------------

/// Bind parameter values to a prepared statement, creating a portal.
///
/// Format lists follow the protocol's shorthand: empty means all text, a
/// single entry applies to every column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindFrame<'a> {
    pub portal: &'a str,
    pub statement: &'a str,
    pub param_formats: &'a [FormatCode],
    /// `None` is SQL NULL.
    pub values: &'a [Option<Bytes>],
    pub result_formats: &'a [FormatCode],
}

impl FrontendFrame for BindFrame<'_> {
    const TAG: Option<u8> = Some(b'B');

    fn check(&self) -> Result<(), EncodeError> {
        count16("parameter formats", self.param_formats.len())?;
        count16("parameter values", self.values.len())?;
        count16("result formats", self.result_formats.len())?;
        Ok(())
    }

    fn body_size(&self) -> usize {
        let values: usize = self
            .values
            .iter()
            .map(|v| 4 + v.as_ref().map_or(0, |b| b.len()))
            .sum();

        cstr_len(self.portal)
            + cstr_len(self.statement)
            + 2
            + 2 * self.param_formats.len()
            + 2
            + values
            + 2
            + 2 * self.result_formats.len()
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        let param_formats = count16("parameter formats", self.param_formats.len())?;
        let values = count16("parameter values", self.values.len())?;
        let result_formats = count16("result formats", self.result_formats.len())?;

        out.put_cstr("portal name", self.portal)?;
        out.put_cstr("statement name", self.statement)?;

        out.put_i16(param_formats);
        for format in self.param_formats {
            out.put_i16(format.as_i16());
        }

        out.put_i16(values);
        for value in self.values {
            match value {
                None => out.put_i32(-1),
                Some(bytes) => {
                    // slab classes cap the whole frame far below i32::MAX
                    out.put_i32(bytes.len() as i32);
                    out.put_slice(bytes);
                }
            }
        }

        out.put_i16(result_formats);
        for format in self.result_formats {
            out.put_i16(format.as_i16());
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SlabPool;

    #[test]
    fn values_nulls_and_formats() {
        let pool = SlabPool::new();
        let values = [Some(Bytes::from_static(b"42")), None];
        let msg = BindFrame {
            portal: "",
            statement: "s1",
            param_formats: &[FormatCode::Text],
            values: &values,
            result_formats: &[FormatCode::Binary],
        }
        .encode(&pool)
        .unwrap();

        let mut want = Vec::new();
        want.extend_from_slice(b"\0s1\0");
        want.extend_from_slice(&[0, 1, 0, 0]);
        want.extend_from_slice(&[0, 2]);
        want.extend_from_slice(&[0, 0, 0, 2, b'4', b'2']);
        want.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        want.extend_from_slice(&[0, 1, 0, 1]);

        assert_eq!(&msg.as_bytes()[5..], &want[..]);
        assert_eq!(msg.as_bytes()[0], b'B');
    }

    #[test]
    fn too_many_values_is_an_error() {
        let pool = SlabPool::new();
        let values = vec![None; i16::MAX as usize + 1];
        let err = BindFrame {
            portal: "",
            statement: "",
            param_formats: &[],
            values: &values,
            result_formats: &[],
        }
        .encode(&pool)
        .unwrap_err();
        assert!(matches!(err, EncodeError::TooMany { what: "parameter values", .. }));
    }
}
