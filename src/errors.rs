use bytes::{BufMut, Bytes, BytesMut};
use std::{fmt, io, path::PathBuf, str::FromStr};
use thiserror::Error;

use crate::{
    actors::Phase, journal::DiagnosticToken, wire_protocol::backend::AuthMechanism,
};

// -----------------------------------------------------------------------------
// ----- ErrorNotice -----------------------------------------------------------

/// Field list carried by an ErrorResponse or NoticeResponse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorNotice {
    pub severity: Severity,         // V (falls back to S)
    pub localized_severity: String, // S
    pub code: String,               // C (SQLSTATE 5-char)
    pub message: String,            // M

    pub detail: Option<String>,          // D
    pub hint: Option<String>,            // H
    pub position: Option<u32>,           // P
    pub internal_position: Option<u32>,  // p
    pub internal_query: Option<String>,  // q
    pub where_: Option<String>,          // W
    pub schema_name: Option<String>,     // s
    pub table_name: Option<String>,      // t
    pub column_name: Option<String>,     // c
    pub data_type_name: Option<String>,  // d
    pub constraint_name: Option<String>, // n
    pub file: Option<String>,            // F
    pub line: Option<u32>,               // L
    pub routine: Option<String>,         // R

    /// Field codes this client does not know about, kept verbatim.
    pub unknown: Vec<(u8, String)>,
}

// -----------------------------------------------------------------------------
// ----- ErrorNotice: Static ---------------------------------------------------

impl ErrorNotice {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            localized_severity: severity.as_str().to_string(),
            code: code.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Apply one `(code, value)` pair as found on the wire.
    pub(crate) fn set_field(&mut self, code: u8, value: &str) {
        match code {
            b'S' => {
                self.localized_severity = value.to_string();
                if let Ok(sev) = value.parse() {
                    self.severity = sev;
                }
            }
            // non-localized severity always wins
            b'V' => {
                if let Ok(sev) = value.parse() {
                    self.severity = sev;
                }
            }
            b'C' => self.code = value.to_string(),
            b'M' => self.message = value.to_string(),
            b'D' => self.detail = Some(value.to_string()),
            b'H' => self.hint = Some(value.to_string()),
            b'P' => self.position = value.parse().ok(),
            b'p' => self.internal_position = value.parse().ok(),
            b'q' => self.internal_query = Some(value.to_string()),
            b'W' => self.where_ = Some(value.to_string()),
            b's' => self.schema_name = Some(value.to_string()),
            b't' => self.table_name = Some(value.to_string()),
            b'c' => self.column_name = Some(value.to_string()),
            b'd' => self.data_type_name = Some(value.to_string()),
            b'n' => self.constraint_name = Some(value.to_string()),
            b'F' => self.file = Some(value.to_string()),
            b'L' => self.line = value.parse().ok(),
            b'R' => self.routine = Some(value.to_string()),
            other => self.unknown.push((other, value.to_string())),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorNotice: Builder --------------------------------------------------

impl ErrorNotice {
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_position(mut self, pos: u32) -> Self {
        self.position = Some(pos);
        self
    }

    pub fn with_routine(mut self, routine: impl Into<String>) -> Self {
        self.routine = Some(routine.into());
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorNotice: Public ---------------------------------------------------

impl ErrorNotice {
    /// Encode as a backend frame with the given tag (`b'E'` or `b'N'`).
    /// The client never sends these; scripted backends in tests do.
    pub fn to_bytes(&self, tag: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);

        buf.put_u8(tag);
        buf.put_u32(0); // length placeholder

        put_field(&mut buf, b'S', &self.localized_severity);
        put_field(&mut buf, b'V', self.severity.as_str());
        put_field(&mut buf, b'C', &self.code);
        put_field(&mut buf, b'M', &self.message);

        let optional = [
            (b'D', self.detail.as_deref()),
            (b'H', self.hint.as_deref()),
            (b'q', self.internal_query.as_deref()),
            (b'W', self.where_.as_deref()),
            (b's', self.schema_name.as_deref()),
            (b't', self.table_name.as_deref()),
            (b'c', self.column_name.as_deref()),
            (b'd', self.data_type_name.as_deref()),
            (b'n', self.constraint_name.as_deref()),
            (b'F', self.file.as_deref()),
            (b'R', self.routine.as_deref()),
        ];
        for (code, value) in optional {
            if let Some(v) = value {
                put_field(&mut buf, code, v);
            }
        }

        for (code, value) in [
            (b'P', self.position),
            (b'p', self.internal_position),
            (b'L', self.line),
        ] {
            if let Some(v) = value {
                put_field(&mut buf, code, &v.to_string());
            }
        }

        buf.put_u8(0); // terminator

        let len = (buf.len() - 1) as u32;
        buf[1..5].copy_from_slice(&len.to_be_bytes());

        buf.freeze()
    }
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity.as_str(), self.message, self.code)
    }
}

fn put_field(buf: &mut BytesMut, code: u8, value: &str) {
    buf.put_u8(code);
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(0);
}

// -----------------------------------------------------------------------------
// ----- ErrorNotice: Severity -------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Severity {
    #[default]
    Error,
    Fatal,
    Panic,
    Warning,
    Notice,
    Info,
    Debug,
    Log,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Panic => "PANIC",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
            Severity::Log => "LOG",
        }
    }

    pub fn is_fatal(self) -> bool {
        matches!(self, Severity::Fatal | Severity::Panic)
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ERROR" => Severity::Error,
            "FATAL" => Severity::Fatal,
            "PANIC" => Severity::Panic,
            "WARNING" => Severity::Warning,
            "NOTICE" => Severity::Notice,
            "INFO" => Severity::Info,
            "LOG" => Severity::Log,
            s if s.starts_with("DEBUG") => Severity::Debug,
            _ => return Err(()),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- SlabError -------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlabError {
    #[error("requested {requested} bytes exceeds the largest slab class ({max} bytes)")]
    TooLarge { requested: usize, max: usize },
}

// -----------------------------------------------------------------------------
// ----- EncodeError -----------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error(transparent)]
    Slab(#[from] SlabError),

    #[error("{field} contains an interior NUL byte")]
    InteriorNul { field: &'static str },

    #[error("too many {what}: {count} (max {max})")]
    TooMany {
        what: &'static str,
        count: usize,
        max: usize,
    },
}

// -----------------------------------------------------------------------------
// ----- MalformedMessage ------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed message with tag {tag:#04x}: {reason}")]
pub struct MalformedMessage {
    pub tag: u8,
    pub reason: &'static str,
}

impl MalformedMessage {
    pub(crate) fn new(tag: u8, reason: &'static str) -> Self {
        Self { tag, reason }
    }
}

// -----------------------------------------------------------------------------
// ----- ProtocolViolation -----------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// More than one byte arrived before the SSL decision byte was read.
    /// See CVE-2021-23222.
    #[error("{buffered} bytes buffered in reply to SSLRequest; possible buffer stuffing")]
    BufferStuffing { buffered: usize },

    #[error("unexpected SSLRequest reply byte {0:#04x}")]
    UnexpectedSslResponse(u8),

    #[error("message tag {tag:#04x} is not allowed during {phase}")]
    OutOfDomain { phase: Phase, tag: u8 },

    #[error("server sent BackendKeyData twice")]
    DuplicateBackendKey,

    #[error("unexpected {event} during {phase}")]
    UnexpectedEvent { phase: Phase, event: &'static str },
}

// -----------------------------------------------------------------------------
// ----- ConfigError -----------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("user is required and must not be empty")]
    MissingUser,

    #[error("TLS requested but no CA certificate was supplied")]
    MissingCa,

    #[error("invalid CA certificate: {0}")]
    InvalidCa(String),

    #[error("{field} contains an interior NUL byte")]
    InteriorNul { field: &'static str },
}

// -----------------------------------------------------------------------------
// ----- SettingsError ---------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid settings TOML: {source}")]
    Toml {
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// -----------------------------------------------------------------------------
// ----- ConnectFailure --------------------------------------------------------

/// Why a connection attempt or an established connection ended.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Malformed(#[from] MalformedMessage),

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("failed to encode a handshake message: {0}")]
    Encode(#[from] EncodeError),

    #[error("server rejected SSL and plaintext fallback is not allowed")]
    SslRejected,

    #[error("TLS upgrade failed: {0}")]
    TlsUpgrade(String),

    #[error("server requested a password but none was supplied")]
    PasswordMissing,

    #[error("unsupported authentication mechanism: {0}")]
    UnsupportedAuthentication(AuthMechanism),

    #[error("server reported a fatal error: {0}")]
    Server(ErrorNotice),

    #[error("outbound write queue overflowed")]
    BackpressureOverflow,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed (had_error={had_error})")]
    Closed { had_error: bool },

    #[error("connection terminated by client")]
    Terminated,

    #[error("engine stopped")]
    EngineStopped,
}

// -----------------------------------------------------------------------------
// ----- ConnectError ----------------------------------------------------------

/// Rejection of `add_connection`, with every diagnostic token gathered
/// before the failure.
#[derive(Debug, Error, Clone)]
#[error("{failure} ({} diagnostic tokens)", .tokens.len())]
pub struct ConnectError {
    pub failure: ConnectFailure,
    pub tokens: Vec<DiagnosticToken>,
}

impl ConnectError {
    pub fn new(failure: impl Into<ConnectFailure>, tokens: Vec<DiagnosticToken>) -> Self {
        Self {
            failure: failure.into(),
            tokens,
        }
    }
}

impl From<ConfigError> for ConnectError {
    fn from(value: ConfigError) -> Self {
        ConnectError::new(value, Vec::new())
    }
}

// -----------------------------------------------------------------------------
// ----- QueryError ------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("connection is closed: {0}")]
    Closed(ConnectFailure),

    #[error("connection {0} is unknown or not in the query phase")]
    NotReady(u64),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("engine stopped")]
    EngineStopped,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
