//! Column value decoding.
//!
//! The query actor never interprets column bytes itself. It looks the
//! column's type oid up in a [`DecoderRegistry`] and hands the raw bytes to
//! whatever [`TypeDecoder`] is registered there. Unknown types come back as
//! [`Value::Raw`].

use bytes::Bytes;
use std::{collections::HashMap, fmt, str, sync::Arc};
use thiserror::Error;
use tracing::warn;

use crate::wire_protocol::FormatCode;

pub mod oid {
    pub const BOOL: u32 = 16;
    pub const NAME: u32 = 19;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
}

// -----------------------------------------------------------------------------
// ----- Value -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// No decoder for this type, or it refused the bytes.
    Raw(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Raw(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- DecodeError -----------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("type {oid} has no {format} decoder")]
    UnsupportedFormat { oid: u32, format: FormatCode },

    #[error("type {oid}: {reason}")]
    Invalid { oid: u32, reason: String },
}

// -----------------------------------------------------------------------------
// ----- TypeDecoder -----------------------------------------------------------

pub trait TypeDecoder: Send + Sync {
    fn decode(&self, type_oid: u32, format: FormatCode, raw: &[u8]) -> Result<Value, DecodeError>;
}

impl<F> TypeDecoder for F
where
    F: Fn(u32, FormatCode, &[u8]) -> Result<Value, DecodeError> + Send + Sync,
{
    fn decode(&self, type_oid: u32, format: FormatCode, raw: &[u8]) -> Result<Value, DecodeError> {
        self(type_oid, format, raw)
    }
}

// -----------------------------------------------------------------------------
// ----- DecoderRegistry -------------------------------------------------------

#[derive(Clone, Default)]
pub struct DecoderRegistry {
    by_oid: HashMap<u32, Arc<dyn TypeDecoder>>,
}

impl DecoderRegistry {
    /// No decoders at all; every column comes back raw.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Text and binary decoders for the common scalar types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let builtin: Arc<dyn TypeDecoder> = Arc::new(BuiltinDecoder);
        for type_oid in [
            oid::BOOL,
            oid::INT2,
            oid::INT4,
            oid::INT8,
            oid::OID,
            oid::FLOAT4,
            oid::FLOAT8,
            oid::TEXT,
            oid::VARCHAR,
            oid::BPCHAR,
            oid::NAME,
        ] {
            registry.register(type_oid, Arc::clone(&builtin));
        }
        registry
    }

    pub fn register(&mut self, type_oid: u32, decoder: Arc<dyn TypeDecoder>) {
        self.by_oid.insert(type_oid, decoder);
    }

    pub fn get(&self, type_oid: u32) -> Option<&Arc<dyn TypeDecoder>> {
        self.by_oid.get(&type_oid)
    }

    /// Decode one column. Never fails: a missing or failing decoder yields
    /// the raw bytes.
    pub fn decode(&self, type_oid: u32, format: FormatCode, raw: Option<&Bytes>) -> Value {
        let Some(raw) = raw else {
            return Value::Null;
        };
        let Some(decoder) = self.by_oid.get(&type_oid) else {
            return Value::Raw(raw.clone());
        };

        match decoder.decode(type_oid, format, raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("column decode failed, keeping raw bytes: {e}");
                Value::Raw(raw.clone())
            }
        }
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut oids: Vec<_> = self.by_oid.keys().copied().collect();
        oids.sort_unstable();
        f.debug_struct("DecoderRegistry").field("oids", &oids).finish()
    }
}

// -----------------------------------------------------------------------------
// ----- BuiltinDecoder --------------------------------------------------------

struct BuiltinDecoder;

impl TypeDecoder for BuiltinDecoder {
    fn decode(&self, type_oid: u32, format: FormatCode, raw: &[u8]) -> Result<Value, DecodeError> {
        match format {
            FormatCode::Text => decode_text(type_oid, raw),
            FormatCode::Binary => decode_binary(type_oid, raw),
        }
    }
}

fn invalid(oid: u32, reason: impl Into<String>) -> DecodeError {
    DecodeError::Invalid {
        oid,
        reason: reason.into(),
    }
}

fn decode_text(type_oid: u32, raw: &[u8]) -> Result<Value, DecodeError> {
    let text = str::from_utf8(raw).map_err(|e| invalid(type_oid, e.to_string()))?;
    match type_oid {
        oid::BOOL => match text {
            "t" => Ok(Value::Bool(true)),
            "f" => Ok(Value::Bool(false)),
            other => Err(invalid(type_oid, format!("bad boolean {other:?}"))),
        },
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => text
            .parse()
            .map(Value::Int)
            .map_err(|e| invalid(type_oid, format!("{e}"))),
        oid::FLOAT4 | oid::FLOAT8 => text
            .parse()
            .map(Value::Float)
            .map_err(|e| invalid(type_oid, format!("{e}"))),
        _ => Ok(Value::Text(text.to_string())),
    }
}

fn decode_binary(type_oid: u32, raw: &[u8]) -> Result<Value, DecodeError> {
    fn fixed<const N: usize>(oid: u32, raw: &[u8]) -> Result<[u8; N], DecodeError> {
        raw.try_into()
            .map_err(|_| invalid(oid, format!("expected {N} bytes, got {}", raw.len())))
    }

    match type_oid {
        oid::BOOL => Ok(Value::Bool(fixed::<1>(type_oid, raw)?[0] != 0)),
        oid::INT2 => Ok(Value::Int(i16::from_be_bytes(fixed(type_oid, raw)?) as i64)),
        oid::INT4 => Ok(Value::Int(i32::from_be_bytes(fixed(type_oid, raw)?) as i64)),
        oid::OID => Ok(Value::Int(u32::from_be_bytes(fixed(type_oid, raw)?) as i64)),
        oid::INT8 => Ok(Value::Int(i64::from_be_bytes(fixed(type_oid, raw)?))),
        oid::FLOAT4 => Ok(Value::Float(f32::from_be_bytes(fixed(type_oid, raw)?) as f64)),
        oid::FLOAT8 => Ok(Value::Float(f64::from_be_bytes(fixed(type_oid, raw)?))),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME => str::from_utf8(raw)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|e| invalid(type_oid, e.to_string())),
        _ => Err(DecodeError::UnsupportedFormat {
            oid: type_oid,
            format: FormatCode::Binary,
        }),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn text(registry: &DecoderRegistry, oid: u32, raw: &'static [u8]) -> Value {
        registry.decode(oid, FormatCode::Text, Some(&Bytes::from_static(raw)))
    }

    #[test]
    fn null_stays_null() {
        let registry = DecoderRegistry::with_defaults();
        assert_eq!(registry.decode(oid::INT4, FormatCode::Text, None), Value::Null);
    }

    #[test]
    fn text_defaults() {
        let registry = DecoderRegistry::with_defaults();
        assert_eq!(text(&registry, oid::BOOL, b"t"), Value::Bool(true));
        assert_eq!(text(&registry, oid::INT8, b"-42"), Value::Int(-42));
        assert_eq!(text(&registry, oid::FLOAT8, b"1.5"), Value::Float(1.5));
        assert_eq!(text(&registry, oid::TEXT, b"hello"), Value::Text("hello".into()));
    }

    #[test]
    fn binary_defaults() {
        let registry = DecoderRegistry::with_defaults();
        let raw = Bytes::copy_from_slice(&7i32.to_be_bytes());
        assert_eq!(
            registry.decode(oid::INT4, FormatCode::Binary, Some(&raw)),
            Value::Int(7)
        );
    }

    #[test]
    fn unknown_type_is_raw() {
        let registry = DecoderRegistry::with_defaults();
        assert_eq!(
            text(&registry, 3802, b"{}"),
            Value::Raw(Bytes::from_static(b"{}"))
        );
    }

    #[test]
    fn failing_decoder_falls_back_to_raw() {
        let registry = DecoderRegistry::with_defaults();
        assert_eq!(
            text(&registry, oid::INT4, b"nope"),
            Value::Raw(Bytes::from_static(b"nope"))
        );
    }

    #[test]
    fn custom_decoders_can_be_registered() {
        let mut registry = DecoderRegistry::empty();
        registry.register(
            3802,
            Arc::new(|_: u32, _: FormatCode, raw: &[u8]| {
                Ok::<_, DecodeError>(Value::Text(format!("json:{}", raw.len())))
            }),
        );
        assert_eq!(text(&registry, 3802, b"{}"), Value::Text("json:2".into()));
        assert_eq!(text(&registry, oid::INT4, b"1"), Value::Raw(Bytes::from_static(b"1")));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
