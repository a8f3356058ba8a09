//! Client-side Postgres connection lifecycle engine.
//!
//! Connections are opened by a single engine task, walked through boot,
//! authentication and session info by per-phase actors, and handed to the
//! caller once they reach the query phase. The supervisor keeps every
//! connection in a residency pool and journals what went wrong.

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod journal;
pub mod logging;
pub mod memory;
pub mod net;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod wire_protocol;

pub use actors::{ConnectionId, QueryEvent, QueryOp, SessionInfo};
pub use config::{ClientConfig, EngineSettings, TlsOptions};
pub use engine::{Engine, EngineHandle, QueryConnection};
pub use errors::{ConnectError, ConnectFailure, QueryError};
pub use journal::{DiagnosticToken, JournalEntry};
pub use supervisor::{PoolHint, Residency, Snapshot};
