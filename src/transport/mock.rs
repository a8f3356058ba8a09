//! In-memory transport for unit tests. Records every write and lets the
//! test decide when the transport stops accepting.

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

use crate::{actors::ConnectionId, config::TlsOptions};

use super::{ConnectTarget, Transport, TransportFactory, tls::TlsError};

// -----------------------------------------------------------------------------
// ----- MockState -------------------------------------------------------------

#[derive(Debug)]
pub struct MockState {
    pub written: Vec<u8>,
    pub writes: usize,
    pub accepting: bool,
    pub ended: bool,
    pub timeout: Option<Duration>,
    pub secure: bool,
    pub upgrades: usize,
    pub fail_upgrade: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            written: Vec::new(),
            writes: 0,
            accepting: true,
            ended: false,
            timeout: None,
            secure: false,
            upgrades: 0,
            fail_upgrade: false,
        }
    }
}

/// Test-side view of a mock transport.
#[derive(Debug, Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn written(&self) -> Vec<u8> {
        self.0.lock().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().written)
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.0.lock().accepting = accepting;
    }

    pub fn fail_upgrade(&self) {
        self.0.lock().fail_upgrade = true;
    }

    pub fn state<R>(&self, f: impl FnOnce(&MockState) -> R) -> R {
        f(&self.0.lock())
    }
}

// -----------------------------------------------------------------------------
// ----- MockTransport ---------------------------------------------------------

pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> bool {
        let mut state = self.handle.0.lock();
        if state.ended {
            return true;
        }
        state.written.extend_from_slice(bytes);
        state.writes += 1;
        state.accepting
    }

    fn end(&mut self) {
        self.handle.0.lock().ended = true;
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.handle.0.lock().timeout = timeout;
    }

    fn bytes_read(&self) -> u64 {
        0
    }

    fn bytes_written(&self) -> u64 {
        self.handle.0.lock().written.len() as u64
    }

    fn is_secure(&self) -> bool {
        self.handle.0.lock().secure
    }

    fn upgrade(self: Box<Self>, _tls: &TlsOptions) -> Result<Box<dyn Transport>, TlsError> {
        {
            let mut state = self.handle.0.lock();
            if state.fail_upgrade {
                return Err(TlsError::Closed);
            }
            state.secure = true;
            state.upgrades += 1;
        }
        Ok(self)
    }
}

// -----------------------------------------------------------------------------
// ----- MockFactory -----------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    connections: Arc<Mutex<Vec<(ConnectionId, ConnectTarget, MockHandle)>>>,
}

impl MockFactory {
    pub fn connects(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn handle(&self, id: ConnectionId) -> Option<MockHandle> {
        self.connections
            .lock()
            .iter()
            .find(|(cid, _, _)| *cid == id)
            .map(|(_, _, handle)| handle.clone())
    }

    pub fn target(&self, id: ConnectionId) -> Option<ConnectTarget> {
        self.connections
            .lock()
            .iter()
            .find(|(cid, _, _)| *cid == id)
            .map(|(_, target, _)| target.clone())
    }
}

impl TransportFactory for MockFactory {
    fn connect(&mut self, id: ConnectionId, target: &ConnectTarget) -> Box<dyn Transport> {
        let (transport, handle) = MockTransport::new();
        self.connections.lock().push((id, target.clone(), handle));
        Box::new(transport)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
