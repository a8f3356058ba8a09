use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::errors::EncodeError;

use super::{FrontendFrame, SlabWriter, cstr_len};

// -----------------------------------------------------------------------------
// ----- PasswordFrame ---------------------------------------------------------

/// Reply to a cleartext or MD5 password request.
#[derive(Clone)]
pub struct PasswordFrame {
    password: SecretString,
}

impl PasswordFrame {
    pub fn cleartext(password: &SecretString) -> Self {
        Self {
            password: password.clone(),
        }
    }

    /// `"md5" + hex(md5(hex(md5(password ++ user)) ++ salt))`
    pub fn md5(user: &str, password: &SecretString, salt: [u8; 4]) -> Self {
        let inner = md5::compute(
            [password.expose_secret().as_bytes(), user.as_bytes()].concat(),
        );
        let inner_hex = format!("{inner:x}");

        let outer = md5::compute([inner_hex.as_bytes(), &salt[..]].concat());
        Self {
            password: SecretString::from(format!("md5{outer:x}")),
        }
    }
}

impl fmt::Debug for PasswordFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordFrame([REDACTED])")
    }
}

impl FrontendFrame for PasswordFrame {
    const TAG: Option<u8> = Some(b'p');

    fn body_size(&self) -> usize {
        cstr_len(self.password.expose_secret())
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_cstr("password", self.password.expose_secret())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
