use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- ParameterDescription --------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    pub type_oids: Vec<u32>,
}

impl BackendFrame for ParameterDescription {
    const TAG: BackendTag = BackendTag::ParameterDescription;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        let count = payload.count16()?;
        if payload.remaining() != count * 4 {
            return Err(payload.malformed("parameter count disagrees with length"));
        }

        let type_oids = (0..count)
            .map(|_| payload.u32())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { type_oids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire_protocol::backend::test_support::frame;

    #[test]
    fn decodes_oids() {
        let bytes = frame(b't', &[0, 2, 0, 0, 0, 23, 0, 0, 0, 25]);
        assert_eq!(
            ParameterDescription::from_frame(&bytes).unwrap().type_oids,
            vec![23, 25]
        );
    }

    #[test]
    fn short_oid_list_is_malformed() {
        let bytes = frame(b't', &[0, 2, 0, 0, 0, 23]);
        assert!(ParameterDescription::from_frame(&bytes).is_err());
    }
}
