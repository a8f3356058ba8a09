use serde::Deserialize;
use std::{path::Path, time::Duration};
use tokio::fs;

use crate::{
    errors::SettingsError,
    logging::LogLevel,
    memory::{MAX_SLAB_SIZE, SizeClass},
    net::{
        accumulator::DEFAULT_FRAME_LIMIT,
        write_queue::{DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_CAPACITY},
    },
    wire_protocol::utils::HEADER_LEN,
};

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_BOOT_BUFFER: usize = 128;
pub const DEFAULT_ACCUMULATION_BUFFER: usize = 4 * 1024;
pub const DEFAULT_JOURNAL_CAPACITY: usize = 100;

// -----------------------------------------------------------------------------
// ----- EngineSettings --------------------------------------------------------

/// Process level knobs shared by every connection the engine opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub host: String,
    pub port: u16,

    /// Inactivity timeout armed on every socket. `None` disables it.
    pub socket_timeout: Option<Duration>,

    /// Each connect waits a random delay in this range first.
    pub connect_jitter_min: Duration,
    pub connect_jitter_max: Duration,

    pub write_chunk_size: usize,
    pub write_queue_capacity: usize,
    /// Pending bytes a transport may hold before it asks for a drain.
    pub transport_high_water: usize,

    pub boot_buffer_size: usize,
    pub accumulation_buffer_size: usize,
    /// Largest inbound frame, tag and length included. A server declaring
    /// more ends the connection as malformed.
    pub max_frame_size: usize,

    pub journal_capacity: usize,
    pub reap_interval: Duration,

    /// Slabs to allocate up front, per size class.
    pub slab_preallocate: Vec<(SizeClass, usize)>,

    pub log_level: LogLevel,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            socket_timeout: None,
            connect_jitter_min: Duration::ZERO,
            connect_jitter_max: Duration::from_millis(1000),
            write_chunk_size: DEFAULT_CHUNK_SIZE,
            write_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            transport_high_water: 64 * 1024,
            boot_buffer_size: DEFAULT_BOOT_BUFFER,
            accumulation_buffer_size: DEFAULT_ACCUMULATION_BUFFER,
            max_frame_size: DEFAULT_FRAME_LIMIT,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            reap_interval: Duration::from_secs(30),
            slab_preallocate: Vec::new(),
            log_level: LogLevel::Info,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- EngineSettings: Public ------------------------------------------------

impl EngineSettings {
    pub async fn load(path: &Path) -> Result<EngineSettings, SettingsError> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| SettingsError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<EngineSettings, SettingsError> {
        let doc: SettingsFile = toml::from_str(raw).map_err(|e| SettingsError::Toml { source: e })?;
        let defaults = EngineSettings::default();

        let mut slab_preallocate = Vec::with_capacity(doc.slab_preallocate.len());
        for entry in &doc.slab_preallocate {
            let class = SizeClass::exact(entry.size).ok_or_else(|| SettingsError::Invalid {
                field: "slab_preallocate.size",
                reason: format!("{} is not a slab size class", entry.size),
            })?;
            slab_preallocate.push((class, entry.count));
        }

        let settings = EngineSettings {
            host: doc.host.unwrap_or(defaults.host),
            port: doc.port.unwrap_or(defaults.port),
            socket_timeout: doc.socket_timeout,
            connect_jitter_min: doc.connect_jitter_min.unwrap_or(defaults.connect_jitter_min),
            connect_jitter_max: doc.connect_jitter_max.unwrap_or(defaults.connect_jitter_max),
            write_chunk_size: doc.write_chunk_size.unwrap_or(defaults.write_chunk_size),
            write_queue_capacity: doc
                .write_queue_capacity
                .unwrap_or(defaults.write_queue_capacity),
            transport_high_water: doc
                .transport_high_water
                .unwrap_or(defaults.transport_high_water),
            boot_buffer_size: doc.boot_buffer_size.unwrap_or(defaults.boot_buffer_size),
            accumulation_buffer_size: doc
                .accumulation_buffer_size
                .unwrap_or(defaults.accumulation_buffer_size),
            max_frame_size: doc.max_frame_size.unwrap_or(defaults.max_frame_size),
            journal_capacity: doc.journal_capacity.unwrap_or(defaults.journal_capacity),
            reap_interval: doc.reap_interval.unwrap_or(defaults.reap_interval),
            slab_preallocate,
            log_level: doc.log_level.unwrap_or(defaults.log_level),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host", "must not be empty"));
        }
        if self.connect_jitter_min > self.connect_jitter_max {
            return Err(invalid(
                "connect_jitter_min",
                "must not exceed connect_jitter_max",
            ));
        }
        if self.write_chunk_size == 0 {
            return Err(invalid("write_chunk_size", "must be positive"));
        }
        if self.write_queue_capacity < self.write_chunk_size {
            return Err(invalid(
                "write_queue_capacity",
                "must hold at least one chunk",
            ));
        }
        if self.boot_buffer_size == 0 || self.boot_buffer_size > MAX_SLAB_SIZE {
            return Err(invalid(
                "boot_buffer_size",
                "must be between 1 and the largest slab class",
            ));
        }
        if self.accumulation_buffer_size == 0 || self.accumulation_buffer_size > MAX_SLAB_SIZE {
            return Err(invalid(
                "accumulation_buffer_size",
                "must be between 1 and the largest slab class",
            ));
        }
        if self.max_frame_size <= HEADER_LEN {
            return Err(invalid("max_frame_size", "must exceed the frame header"));
        }
        if self.journal_capacity == 0 {
            return Err(invalid("journal_capacity", "must be positive"));
        }
        if self.reap_interval.is_zero() {
            return Err(invalid("reap_interval", "must be positive"));
        }
        if self.socket_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("socket_timeout", "must be positive when set"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,

    #[serde(default, deserialize_with = "de_duration")]
    socket_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "de_duration")]
    connect_jitter_min: Option<Duration>,
    #[serde(default, deserialize_with = "de_duration")]
    connect_jitter_max: Option<Duration>,

    #[serde(default)]
    write_chunk_size: Option<usize>,
    #[serde(default)]
    write_queue_capacity: Option<usize>,
    #[serde(default)]
    transport_high_water: Option<usize>,
    #[serde(default)]
    boot_buffer_size: Option<usize>,
    #[serde(default)]
    accumulation_buffer_size: Option<usize>,
    #[serde(default)]
    max_frame_size: Option<usize>,

    #[serde(default)]
    journal_capacity: Option<usize>,
    #[serde(default, deserialize_with = "de_duration")]
    reap_interval: Option<Duration>,

    #[serde(default)]
    slab_preallocate: Vec<SlabPreallocEntry>,

    #[serde(default)]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlabPreallocEntry {
    size: usize,
    count: usize,
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Accepts humantime strings ("250ms", "30s") or integer milliseconds.
fn de_duration<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"30s\" or integer milliseconds")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_any(DurationVisitor)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn load_reads_humantime_and_sizes() {
        let toml = r#"
            host = "db.internal"
            port = 6543
            socket_timeout = "30s"
            connect_jitter_min = "10ms"
            connect_jitter_max = 250
            write_chunk_size = 8192
            journal_capacity = 20
            log_level = "debug"

            [[slab_preallocate]]
            size = 4096
            count = 16
        "#;

        let tmp = write_tmp(toml);
        let settings = EngineSettings::load(tmp.path()).await.unwrap();

        assert_eq!(settings.host, "db.internal");
        assert_eq!(settings.port, 6543);
        assert_eq!(settings.socket_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.connect_jitter_min, Duration::from_millis(10));
        assert_eq!(settings.connect_jitter_max, Duration::from_millis(250));
        assert_eq!(settings.write_chunk_size, 8192);
        assert_eq!(settings.journal_capacity, 20);
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.slab_preallocate.len(), 1);
        assert_eq!(settings.slab_preallocate[0].0.size(), 4096);
        assert_eq!(settings.slab_preallocate[0].1, 16);

        // untouched fields keep their defaults
        assert_eq!(settings.boot_buffer_size, DEFAULT_BOOT_BUFFER);
    }

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(EngineSettings::parse("").unwrap(), EngineSettings::default());
    }

    #[test]
    fn max_frame_size_is_read_and_checked() {
        let settings = EngineSettings::parse("max_frame_size = 1048576").unwrap();
        assert_eq!(settings.max_frame_size, 1024 * 1024);
        assert_eq!(EngineSettings::default().max_frame_size, DEFAULT_FRAME_LIMIT);

        let err = EngineSettings::parse("max_frame_size = 5").unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "max_frame_size",
                ..
            }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EngineSettings::parse("colour = \"blue\"").unwrap_err();
        assert!(matches!(err, SettingsError::Toml { .. }));
    }

    #[test]
    fn bad_duration_is_a_toml_error() {
        let err = EngineSettings::parse("socket_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, SettingsError::Toml { .. }));
    }

    #[test]
    fn inverted_jitter_range_is_invalid() {
        let err = EngineSettings::parse(
            r#"
            connect_jitter_min = "2s"
            connect_jitter_max = "1s"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "connect_jitter_min",
                ..
            }
        ));
    }

    #[test]
    fn slab_sizes_must_be_classes() {
        let err = EngineSettings::parse(
            r#"
            [[slab_preallocate]]
            size = 1000
            count = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "slab_preallocate.size",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = EngineSettings::load(Path::new("/definitely/not/here.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
