//! What the engine needs from a network connection, and a tokio
//! implementation of it.
//!
//! The engine never awaits I/O. A [`Transport`] takes writes synchronously
//! and reports everything else (connect, data, drain, close) as
//! [`TransportEvent`]s on a channel the engine task drains.

pub mod tcp;
pub mod tls;

#[cfg(test)]
pub mod mock;

pub use tcp::{TcpTransport, TcpTransportFactory};
pub use tls::TlsError;

use bytes::Bytes;
use std::{net::IpAddr, time::Duration};
use tokio::sync::mpsc;

use crate::{actors::ConnectionId, config::TlsOptions};

/// Where transports deliver their events.
pub type EventSender = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;
pub type EventReceiver = mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>;

// -----------------------------------------------------------------------------
// ----- TransportEvent --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connect,
    SecureConnect,
    Data(Bytes),
    /// Everything written so far has left the process.
    Drain,
    /// No traffic for the configured timeout.
    Timeout,
    Lookup {
        host: String,
        address: Option<IpAddr>,
        error: Option<String>,
    },
    /// Our side ended and the write half is shut down.
    Finish,
    /// The peer ended its side.
    End,
    Close {
        had_error: bool,
    },
    Error(String),
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connect => "connect",
            TransportEvent::SecureConnect => "secure connect",
            TransportEvent::Data(_) => "data",
            TransportEvent::Drain => "drain",
            TransportEvent::Timeout => "timeout",
            TransportEvent::Lookup { .. } => "lookup",
            TransportEvent::Finish => "finish",
            TransportEvent::End => "end",
            TransportEvent::Close { .. } => "close",
            TransportEvent::Error(_) => "error",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectTarget ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
}

// -----------------------------------------------------------------------------
// ----- Transport -------------------------------------------------------------

pub trait Transport: Send {
    /// Hand bytes to the transport. Always takes them; `false` asks the
    /// caller to hold further writes until the next [`TransportEvent::Drain`].
    fn write(&mut self, bytes: &[u8]) -> bool;

    /// Shut down our side. Further writes are dropped.
    fn end(&mut self);

    fn set_timeout(&mut self, timeout: Option<Duration>);

    fn bytes_read(&self) -> u64;

    fn bytes_written(&self) -> u64;

    fn is_secure(&self) -> bool;

    /// Wrap the connection in TLS. Completion arrives as
    /// [`TransportEvent::SecureConnect`] on the same event channel.
    fn upgrade(self: Box<Self>, tls: &TlsOptions) -> Result<Box<dyn Transport>, TlsError>;
}

pub trait TransportFactory: Send {
    fn connect(&mut self, id: ConnectionId, target: &ConnectTarget) -> Box<dyn Transport>;
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
