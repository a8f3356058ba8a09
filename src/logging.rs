use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};

// -----------------------------------------------------------------------------
// ----- LogLevel --------------------------------------------------------------

/// Default verbosity when `RUST_LOG` is not set.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter that applies `self` to this crate only; dependencies stay at
    /// warn so rustls does not drown the connection logs.
    pub fn directive(self) -> String {
        format!("warn,{}={}", env!("CARGO_CRATE_NAME"), self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- Tracing ---------------------------------------------------------------

/// Install a fmt subscriber. `RUST_LOG` wins over `level` when set. Calling
/// this twice is harmless; the first subscriber stays.
pub fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.directive()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
