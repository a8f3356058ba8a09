mod support;

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use pgchain::{
    ClientConfig, ConnectFailure, DiagnosticToken, Engine, PoolHint, TlsOptions,
    journal::Activity,
};

fn tls_config() -> ClientConfig {
    ClientConfig::new("alice").tls(TlsOptions::new(support::CA_PEM).server_name("localhost"))
}

/// Reads the SSLRequest and answers it with `reply`.
async fn answer_ssl_request(backend: &mut support::Backend<tokio::net::TcpStream>, reply: u8) {
    let request = backend.read_startup().await;
    assert_eq!(request.code, support::SSL_REQUEST_CODE);
    backend.stream.write_all(&[reply]).await.unwrap();
}

#[tokio::test]
async fn accepted_ssl_upgrades_before_startup() {
    let (listener, port) = support::listen().await;
    let handle = support::start_engine(port, tls_config());

    let server = tokio::spawn(async move {
        let mut plain = support::accept(&listener).await;
        answer_ssl_request(&mut plain, b'S').await;

        let stream = support::tls_acceptor()
            .accept(plain.stream)
            .await
            .expect("TLS handshake");
        let mut backend = support::Backend { stream };
        let startup = backend.handshake().await;
        (startup, backend)
    });

    let conn = handle.add_connection(PoolHint::Idle).await.unwrap();
    let (startup, _backend) = server.await.unwrap();

    assert_eq!(startup.param("user"), Some("alice"));
    assert_eq!(conn.parameter("server_version"), Some("16.2"));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.activity.wait(Activity::SslConnect).count(), 1);
}

#[tokio::test]
async fn refused_ssl_without_fallback_rejects() {
    let (listener, port) = support::listen().await;
    let handle = support::start_engine(port, tls_config());

    let server = tokio::spawn(async move {
        let mut backend = support::accept(&listener).await;
        answer_ssl_request(&mut backend, b'N').await;
        backend.at_eof().await
    });

    let err = handle.add_connection(PoolHint::Idle).await.unwrap_err();
    assert_eq!(err.failure, ConnectFailure::SslRejected);
    assert_eq!(
        support::without_lookups(&err.tokens),
        vec![DiagnosticToken::SslRejected]
    );
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn refused_ssl_with_fallback_continues_in_plaintext() {
    let (listener, port) = support::listen().await;
    let (engine, handle) = Engine::new(support::settings(port), tls_config());
    engine
        .with_fallback(Arc::new(|hint: PoolHint, _config: &ClientConfig| {
            hint == PoolHint::Idle
        }))
        .spawn();

    let server = tokio::spawn(async move {
        let mut backend = support::accept(&listener).await;
        answer_ssl_request(&mut backend, b'N').await;
        backend.handshake().await;
        backend
    });

    let conn = handle.add_connection(PoolHint::Idle).await.unwrap();
    let _backend = server.await.unwrap();

    let journal = handle.journal(conn.id()).await;
    assert!(journal.iter().any(|e| e.token == DiagnosticToken::SslFallback));
}

#[tokio::test]
async fn bytes_after_the_ssl_reply_are_rejected() {
    let (listener, port) = support::listen().await;
    let handle = support::start_engine(port, tls_config());

    let server = tokio::spawn(async move {
        let mut backend = support::accept(&listener).await;
        let request = backend.read_startup().await;
        assert_eq!(request.code, support::SSL_REQUEST_CODE);

        // 'S' plus a forged AuthenticationOk in the same segment
        let mut stuffed = vec![b'S'];
        stuffed.extend(support::auth(0, &[]));
        backend.stream.write_all(&stuffed).await.unwrap();

        let mut rest = Vec::new();
        let _ = backend.stream.read_to_end(&mut rest).await;
        rest
    });

    let err = handle.add_connection(PoolHint::Idle).await.unwrap_err();
    assert!(matches!(err.failure, ConnectFailure::ProtocolViolation(_)));
    assert!(
        err.tokens
            .iter()
            .any(|t| matches!(t, DiagnosticToken::ProtocolViolation { .. }))
    );

    // no TLS handshake and no startup message followed
    assert!(server.await.unwrap().is_empty());
}
