use bytes::Bytes;
use std::fmt;

use crate::{errors::MalformedMessage, wire_protocol::utils::PayloadReader};

use super::{BackendFrame, BackendTag};

// -----------------------------------------------------------------------------
// ----- Authentication --------------------------------------------------------

/// All `R` requests. The sub-code picks the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Ok,
    KerberosV5,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    ScmCredential,
    Gss,
    GssContinue(Bytes),
    Sspi,
    Sasl { mechanisms: Vec<String> },
    SaslContinue(Bytes),
    SaslFinal(Bytes),
}

impl Authentication {
    /// Mechanism name for requests this client recognizes but cannot answer.
    pub fn unsupported_mechanism(&self) -> Option<AuthMechanism> {
        match self {
            Authentication::Ok
            | Authentication::CleartextPassword
            | Authentication::Md5Password { .. } => None,
            Authentication::KerberosV5 => Some(AuthMechanism::KerberosV5),
            Authentication::ScmCredential => Some(AuthMechanism::ScmCredential),
            Authentication::Gss | Authentication::GssContinue(_) => Some(AuthMechanism::Gss),
            Authentication::Sspi => Some(AuthMechanism::Sspi),
            Authentication::Sasl { mechanisms } => Some(AuthMechanism::Sasl(mechanisms.clone())),
            Authentication::SaslContinue(_) | Authentication::SaslFinal(_) => {
                Some(AuthMechanism::Sasl(Vec::new()))
            }
        }
    }
}

impl BackendFrame for Authentication {
    const TAG: BackendTag = BackendTag::Authentication;

    fn decode(payload: &mut PayloadReader<'_>) -> Result<Self, MalformedMessage> {
        let code = payload.i32()?;
        let auth = match code {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => {
                let raw = payload.bytes(4)?;
                Authentication::Md5Password {
                    salt: [raw[0], raw[1], raw[2], raw[3]],
                }
            }
            6 => Authentication::ScmCredential,
            7 => Authentication::Gss,
            8 => Authentication::GssContinue(Bytes::copy_from_slice(payload.rest())),
            9 => Authentication::Sspi,
            10 => {
                let mut mechanisms = Vec::new();
                loop {
                    let name = payload.cstr()?;
                    if name.is_empty() {
                        break;
                    }
                    mechanisms.push(name.to_string());
                }
                Authentication::Sasl { mechanisms }
            }
            11 => Authentication::SaslContinue(Bytes::copy_from_slice(payload.rest())),
            12 => Authentication::SaslFinal(Bytes::copy_from_slice(payload.rest())),
            _ => return Err(payload.malformed("unknown authentication request code")),
        };
        Ok(auth)
    }
}

// -----------------------------------------------------------------------------
// ----- AuthMechanism ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMechanism {
    KerberosV5,
    ScmCredential,
    Gss,
    Sspi,
    Sasl(Vec<String>),
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMechanism::KerberosV5 => f.write_str("KerberosV5"),
            AuthMechanism::ScmCredential => f.write_str("SCM credential"),
            AuthMechanism::Gss => f.write_str("GSSAPI"),
            AuthMechanism::Sspi => f.write_str("SSPI"),
            AuthMechanism::Sasl(list) if list.is_empty() => f.write_str("SASL"),
            AuthMechanism::Sasl(list) => write!(f, "SASL ({})", list.join(", ")),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire_protocol::backend::test_support::frame;

    #[test]
    fn ok_is_exactly_nine_bytes() {
        let bytes = [b'R', 0, 0, 0, 8, 0, 0, 0, 0];
        assert_eq!(Authentication::from_frame(&bytes).unwrap(), Authentication::Ok);
    }

    #[test]
    fn md5_carries_salt() {
        let bytes = frame(b'R', &[0, 0, 0, 5, 1, 2, 3, 4]);
        assert_eq!(
            Authentication::from_frame(&bytes).unwrap(),
            Authentication::Md5Password { salt: [1, 2, 3, 4] }
        );
    }

    #[test]
    fn md5_with_short_salt_is_malformed() {
        let bytes = frame(b'R', &[0, 0, 0, 5, 1, 2]);
        assert!(Authentication::from_frame(&bytes).is_err());
    }

    #[test]
    fn ok_with_trailing_bytes_is_malformed() {
        let bytes = frame(b'R', &[0, 0, 0, 0, 9]);
        assert!(Authentication::from_frame(&bytes).is_err());
    }

    #[test]
    fn sasl_lists_mechanisms() {
        let bytes = frame(b'R', b"\0\0\0\x0aSCRAM-SHA-256\0SCRAM-SHA-256-PLUS\0\0");
        let auth = Authentication::from_frame(&bytes).unwrap();
        assert_eq!(
            auth,
            Authentication::Sasl {
                mechanisms: vec!["SCRAM-SHA-256".into(), "SCRAM-SHA-256-PLUS".into()]
            }
        );
        assert!(matches!(auth.unsupported_mechanism(), Some(AuthMechanism::Sasl(_))));
    }

    #[test]
    fn sasl_list_without_final_terminator_is_malformed() {
        let bytes = frame(b'R', b"\0\0\0\x0aSCRAM-SHA-256\0");
        assert!(Authentication::from_frame(&bytes).is_err());
    }

    #[test]
    fn unknown_code_is_malformed() {
        let bytes = frame(b'R', &[0, 0, 0, 42]);
        assert!(Authentication::from_frame(&bytes).is_err());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
