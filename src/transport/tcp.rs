use bytes::{Bytes, BytesMut};
use std::{
    future, io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, lookup_host},
    sync::mpsc,
};
use tokio_rustls::{TlsConnector, client::TlsStream, rustls::pki_types::ServerName};
use tracing::{debug, trace};

use crate::{actors::ConnectionId, config::TlsOptions};

use super::{
    ConnectTarget, EventSender, Transport, TransportEvent, TransportFactory,
    tls::{self, TlsError},
};

const READ_BUFFER: usize = 8 * 1024;

// -----------------------------------------------------------------------------
// ----- ClientStream ----------------------------------------------------------

enum ClientStream {
    Plain(Option<TcpStream>),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientStream {
    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            ClientStream::Plain(Some(stream)) => stream.read_buf(buf).await,
            ClientStream::Plain(None) => Err(missing_stream()),
            ClientStream::Tls(stream) => stream.read_buf(buf).await,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            ClientStream::Plain(Some(stream)) => stream.write_all(bytes).await,
            ClientStream::Plain(None) => Err(missing_stream()),
            ClientStream::Tls(stream) => stream.write_all(bytes).await,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Plain(Some(stream)) => stream.shutdown().await,
            ClientStream::Plain(None) => Err(missing_stream()),
            ClientStream::Tls(stream) => stream.shutdown().await,
        }
    }

    async fn upgrade(
        &mut self,
        connector: &TlsConnector,
        name: ServerName<'static>,
    ) -> io::Result<()> {
        let ClientStream::Plain(stream) = self else {
            return Ok(());
        };

        let stream = stream.take().ok_or_else(missing_stream)?;
        let tls_stream = connector.connect(name, stream).await?;
        *self = ClientStream::Tls(Box::new(tls_stream));

        Ok(())
    }
}

fn missing_stream() -> io::Error {
    io::Error::other("missing plaintext stream")
}

// -----------------------------------------------------------------------------
// ----- IoCommand / IoStats ---------------------------------------------------

enum IoCommand {
    Write(Bytes),
    End,
    SetTimeout(Option<Duration>),
    Upgrade {
        connector: TlsConnector,
        name: ServerName<'static>,
    },
}

#[derive(Debug, Default)]
struct IoStats {
    read: AtomicU64,
    written: AtomicU64,
    /// Bytes handed to `write` that the I/O task has not flushed yet.
    pending: AtomicUsize,
    wants_drain: AtomicBool,
}

// -----------------------------------------------------------------------------
// ----- TcpTransportFactory ---------------------------------------------------

/// Spawns one I/O task per connection on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
    events: EventSender,
    high_water: usize,
}

impl TcpTransportFactory {
    pub fn new(events: EventSender, high_water: usize) -> Self {
        Self {
            events,
            high_water: high_water.max(1),
        }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn connect(&mut self, id: ConnectionId, target: &ConnectTarget) -> Box<dyn Transport> {
        let (cmds, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(IoStats::default());

        let task = IoTask {
            id,
            events: self.events.clone(),
            stats: Arc::clone(&stats),
        };
        tokio::spawn(task.run(target.clone(), rx));

        Box::new(TcpTransport {
            cmds,
            stats,
            high_water: self.high_water,
            host: target.host.clone(),
            secure: false,
            ended: false,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- TcpTransport ----------------------------------------------------------

pub struct TcpTransport {
    cmds: mpsc::UnboundedSender<IoCommand>,
    stats: Arc<IoStats>,
    high_water: usize,
    host: String,
    secure: bool,
    ended: bool,
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> bool {
        if self.ended || bytes.is_empty() {
            return true;
        }

        let pending = self.stats.pending.fetch_add(bytes.len(), Ordering::AcqRel) + bytes.len();
        let accepted = pending <= self.high_water;
        if !accepted {
            // set before the write is queued so the task cannot miss it
            self.stats.wants_drain.store(true, Ordering::Release);
        }

        if self
            .cmds
            .send(IoCommand::Write(Bytes::copy_from_slice(bytes)))
            .is_err()
        {
            // task is gone; its close event is already on the way
            self.stats.pending.fetch_sub(bytes.len(), Ordering::AcqRel);
            return true;
        }
        accepted
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        let _ = self.cmds.send(IoCommand::End);
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        let _ = self.cmds.send(IoCommand::SetTimeout(timeout));
    }

    fn bytes_read(&self) -> u64 {
        self.stats.read.load(Ordering::Acquire)
    }

    fn bytes_written(&self) -> u64 {
        self.stats.written.load(Ordering::Acquire)
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn upgrade(self: Box<Self>, opts: &TlsOptions) -> Result<Box<dyn Transport>, TlsError> {
        let connector = tls::connector(opts)?;
        let name = tls::server_name(opts, &self.host)?;

        self.cmds
            .send(IoCommand::Upgrade { connector, name })
            .map_err(|_| TlsError::Closed)?;

        let mut upgraded = *self;
        upgraded.secure = true;
        Ok(Box::new(upgraded))
    }
}

// -----------------------------------------------------------------------------
// ----- IoTask ----------------------------------------------------------------

struct IoTask {
    id: ConnectionId,
    events: EventSender,
    stats: Arc<IoStats>,
}

impl IoTask {
    fn emit(&self, event: TransportEvent) {
        // engine gone means nobody is listening
        let _ = self.events.send((self.id, event));
    }

    async fn run(self, target: ConnectTarget, mut cmds: mpsc::UnboundedReceiver<IoCommand>) {
        let Some(stream) = self.connect(&target).await else {
            self.emit(TransportEvent::Close { had_error: true });
            return;
        };

        self.emit(TransportEvent::Connect);
        let mut stream = ClientStream::Plain(Some(stream));
        let had_error = self.pump(&mut stream, &mut cmds).await;

        debug!("[{}] transport closed (had_error={had_error})", self.id);
        self.emit(TransportEvent::Close { had_error });
    }

    async fn connect(&self, target: &ConnectTarget) -> Option<TcpStream> {
        let addrs: Vec<_> = match lookup_host((target.host.as_str(), target.port)).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                self.emit(TransportEvent::Lookup {
                    host: target.host.clone(),
                    address: None,
                    error: Some(e.to_string()),
                });
                return None;
            }
        };

        self.emit(TransportEvent::Lookup {
            host: target.host.clone(),
            address: addrs.first().map(|a| a.ip()),
            error: None,
        });

        match TcpStream::connect(&addrs[..]).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                Some(stream)
            }
            Err(e) => {
                self.emit(TransportEvent::Error(format!(
                    "connect to {}:{} failed: {e}",
                    target.host, target.port
                )));
                None
            }
        }
    }

    /// Shuttle bytes until either side is done. Returns whether the
    /// connection ended in error.
    async fn pump(
        &self,
        stream: &mut ClientStream,
        cmds: &mut mpsc::UnboundedReceiver<IoCommand>,
    ) -> bool {
        let mut buf = BytesMut::with_capacity(READ_BUFFER);
        let mut timeout: Option<Duration> = None;
        let mut write_open = true;

        loop {
            let idle = async {
                match timeout {
                    Some(d) => tokio::time::sleep(d).await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                cmd = cmds.recv() => {
                    let Some(cmd) = cmd else {
                        trace!("[{}] transport handle dropped", self.id);
                        return false;
                    };
                    match cmd {
                        IoCommand::Write(bytes) => {
                            if write_open {
                                if let Err(e) = stream.write_all(&bytes).await {
                                    self.emit(TransportEvent::Error(e.to_string()));
                                    return true;
                                }
                                self.stats.written.fetch_add(bytes.len() as u64, Ordering::AcqRel);
                            }
                            let before = self.stats.pending.fetch_sub(bytes.len(), Ordering::AcqRel);
                            if before == bytes.len() && self.stats.wants_drain.swap(false, Ordering::AcqRel) {
                                self.emit(TransportEvent::Drain);
                            }
                        }
                        IoCommand::End => {
                            if write_open {
                                write_open = false;
                                if let Err(e) = stream.shutdown().await {
                                    trace!("[{}] shutdown failed: {e}", self.id);
                                }
                                self.emit(TransportEvent::Finish);
                            }
                        }
                        IoCommand::SetTimeout(next) => timeout = next,
                        IoCommand::Upgrade { connector, name } => {
                            match stream.upgrade(&connector, name).await {
                                Ok(()) => self.emit(TransportEvent::SecureConnect),
                                Err(e) => {
                                    self.emit(TransportEvent::Error(format!("TLS handshake failed: {e}")));
                                    return true;
                                }
                            }
                        }
                    }
                }

                res = stream.read_buf(&mut buf) => match res {
                    Ok(0) => {
                        self.emit(TransportEvent::End);
                        return false;
                    }
                    Ok(n) => {
                        self.stats.read.fetch_add(n as u64, Ordering::AcqRel);
                        self.emit(TransportEvent::Data(buf.split().freeze()));
                        buf.reserve(READ_BUFFER);
                    }
                    Err(e) => {
                        self.emit(TransportEvent::Error(e.to_string()));
                        return true;
                    }
                },

                _ = idle => self.emit(TransportEvent::Timeout),
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
