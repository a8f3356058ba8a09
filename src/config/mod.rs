pub mod client;
pub mod settings;

pub use client::{
    ClientConfig, ConfigSource, PasswordSupplier, SslFallback, TlsOptions, deny_fallback,
};
pub use settings::EngineSettings;
pub use crate::logging::LogLevel;
