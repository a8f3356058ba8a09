//! A scripted Postgres backend for integration tests. Each test accepts
//! the engine's connection and plays the server side by hand.

#![allow(dead_code)]

use std::{io::BufReader, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_rustls::{TlsAcceptor, rustls::ServerConfig};

use pgchain::{ClientConfig, DiagnosticToken, Engine, EngineHandle, EngineSettings};

pub const CA_PEM: &[u8] = include_bytes!("../fixtures/ca.pem");
const SERVER_PEM: &[u8] = include_bytes!("../fixtures/server.pem");
const SERVER_KEY: &[u8] = include_bytes!("../fixtures/server.key");

pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const PROTOCOL_3_0: i32 = 196608;

const WAIT: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

pub async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

pub fn settings(port: u16) -> EngineSettings {
    EngineSettings {
        host: "127.0.0.1".to_string(),
        port,
        connect_jitter_min: Duration::ZERO,
        connect_jitter_max: Duration::ZERO,
        ..EngineSettings::default()
    }
}

/// Engine on `port` handing out `config` for every connection.
pub fn start_engine(port: u16, config: ClientConfig) -> EngineHandle {
    let (engine, handle) = Engine::new(settings(port), config);
    engine.spawn();
    handle
}

pub async fn accept(listener: &TcpListener) -> Backend<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("engine never connected")
        .expect("accept");
    Backend { stream }
}

pub fn tls_acceptor() -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut BufReader::new(SERVER_PEM))
        .collect::<Result<Vec<_>, _>>()
        .expect("server certificate");
    let key = rustls_pemfile::private_key(&mut BufReader::new(SERVER_KEY))
        .expect("server key")
        .expect("a private key in the fixture");

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server config");
    TlsAcceptor::from(Arc::new(config))
}

// -----------------------------------------------------------------------------
// ----- Backend ---------------------------------------------------------------

pub struct Backend<S> {
    pub stream: S,
}

#[derive(Debug)]
pub struct Startup {
    pub code: i32,
    pub params: Vec<(String, String)>,
}

impl Startup {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Backend<S> {
    /// Untagged message: SSLRequest or StartupMessage.
    pub async fn read_startup(&mut self) -> Startup {
        let len = self.read_i32().await as usize;
        let mut body = vec![0u8; len - 4];
        self.read_exact(&mut body).await;

        let code = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let mut params = Vec::new();
        let mut fields = body[4..].split(|b| *b == 0).map(|f| String::from_utf8_lossy(f).into_owned());
        while let (Some(k), Some(v)) = (fields.next(), fields.next()) {
            if k.is_empty() {
                break;
            }
            params.push((k, v));
        }
        Startup { code, params }
    }

    pub async fn read_message(&mut self) -> (u8, Vec<u8>) {
        let mut tag = [0u8; 1];
        self.read_exact(&mut tag).await;
        let len = self.read_i32().await as usize;
        let mut body = vec![0u8; len - 4];
        self.read_exact(&mut body).await;
        (tag[0], body)
    }

    /// True once the client closed its side.
    pub async fn at_eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(timeout(WAIT, self.stream.read(&mut byte)).await, Ok(Ok(0)))
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("backend write");
        self.stream.flush().await.expect("backend flush");
    }

    /// Startup through the first ReadyForQuery, without a password.
    pub async fn handshake(&mut self) -> Startup {
        let startup = self.read_startup().await;
        assert_eq!(startup.code, PROTOCOL_3_0);

        let mut reply = auth(0, &[]);
        reply.extend(parameter_status("server_version", "16.2"));
        reply.extend(parameter_status("client_encoding", "UTF8"));
        reply.extend(backend_key(4242, 77));
        reply.extend(ready(b'I'));
        self.send(&reply).await;
        startup
    }

    async fn read_i32(&mut self) -> i32 {
        let mut raw = [0u8; 4];
        self.read_exact(&mut raw).await;
        i32::from_be_bytes(raw)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) {
        timeout(WAIT, self.stream.read_exact(buf))
            .await
            .expect("client went quiet")
            .expect("backend read");
    }
}

// -----------------------------------------------------------------------------
// ----- Frames ----------------------------------------------------------------

pub fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn auth(code: i32, extra: &[u8]) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(extra);
    frame(b'R', &payload)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    frame(b'S', format!("{name}\0{value}\0").as_bytes())
}

pub fn backend_key(pid: i32, secret: i32) -> Vec<u8> {
    let mut payload = pid.to_be_bytes().to_vec();
    payload.extend_from_slice(&secret.to_be_bytes());
    frame(b'K', &payload)
}

pub fn ready(status: u8) -> Vec<u8> {
    frame(b'Z', &[status])
}

pub fn error(tag: u8, severity: &str, code: &str, message: &str) -> Vec<u8> {
    frame(
        tag,
        format!("S{severity}\0V{severity}\0C{code}\0M{message}\0\0").as_bytes(),
    )
}

/// One text-format column per `(name, type oid)`.
pub fn row_description(columns: &[(&str, u32)]) -> Vec<u8> {
    let mut payload = (columns.len() as i16).to_be_bytes().to_vec();
    for (name, oid) in columns {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0i32.to_be_bytes()); // table
        payload.extend_from_slice(&0i16.to_be_bytes()); // column
        payload.extend_from_slice(&oid.to_be_bytes());
        payload.extend_from_slice(&(-1i16).to_be_bytes()); // typlen
        payload.extend_from_slice(&(-1i32).to_be_bytes()); // typmod
        payload.extend_from_slice(&0i16.to_be_bytes()); // text
    }
    frame(b'T', &payload)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut payload = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(v) => {
                payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                payload.extend_from_slice(v.as_bytes());
            }
            None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    frame(b'D', &payload)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    frame(b'C', format!("{tag}\0").as_bytes())
}

pub fn cstr(body: &[u8]) -> &str {
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    std::str::from_utf8(&body[..end]).expect("utf8")
}

/// Tokens minus the DNS lookup every TCP connect reports.
pub fn without_lookups(tokens: &[DiagnosticToken]) -> Vec<DiagnosticToken> {
    tokens
        .iter()
        .filter(|t| !matches!(t, DiagnosticToken::Lookup { .. }))
        .cloned()
        .collect()
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
