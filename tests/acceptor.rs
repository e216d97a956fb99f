//! Acceptor and dialer behavior: live listen/upgrade/accept flow, route
//! filtering, negotiated compression, close semantics, and wss.

use std::io::Write as _;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use ws_transport::handshake::{self, UpgradeResponse};
use ws_transport::{connect, CloseCode, DeflateParams, Error, Options, Role, WebSocketTransport, WsAcceptor};

#[tokio::test]
async fn accept_and_echo() {
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/echo", Options::default())
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    let client_task = tokio::spawn(async move {
        let client = connect(&format!("ws://{addr}/echo"), Options::default())
            .await
            .unwrap();
        client.write(b"over the wire").await.unwrap();
        let reply = client.read_message().await.unwrap();
        assert_eq!(reply, b"over the wire");
        client.close().await.unwrap();
    });

    let server = acceptor.accept().await.unwrap();
    assert_eq!(server.role(), Role::Server);
    assert_eq!(server.route(), "/echo");
    let message = server.read_message().await.unwrap();
    server.write(&message).await.unwrap();

    client_task.await.unwrap();
    acceptor.close().await;
}

#[tokio::test]
async fn upgrade_request_metadata_is_retained() {
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/meta", Options::default())
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    let client_task = tokio::spawn(async move {
        let client = connect(&format!("ws://{addr}/meta"), Options::default())
            .await
            .unwrap();
        client.write(b"hi").await.unwrap();
        client
    });

    let server = acceptor.accept().await.unwrap();
    assert_eq!(server.route(), "/meta");
    assert!(server
        .headers()
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("sec-websocket-key")));

    drop(client_task.await.unwrap());
    acceptor.close().await;
}

#[tokio::test]
async fn unknown_route_is_rejected() {
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/only", Options::default())
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    let err = connect(&format!("ws://{addr}/other"), Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Handshake(_)), "{err:?}");

    acceptor.close().await;
}

#[tokio::test]
async fn explicit_routers_override_listen_path() {
    let options = Options::new().with_routers(vec!["/a".into(), "/b".into()]);
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/ignored", options)
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    for path in ["/a", "/b"] {
        let client = connect(&format!("ws://{addr}{path}"), Options::default())
            .await
            .unwrap();
        client.write(b"ping").await.unwrap();
        let server = acceptor.accept().await.unwrap();
        assert_eq!(server.route(), path);
        assert_eq!(server.read_message().await.unwrap(), b"ping");
        let _ = server.close().await;
        let _ = client.close().await;
    }

    assert!(connect(&format!("ww://{addr}/a"), Options::default())
        .await
        .is_err());

    acceptor.close().await;
}

#[tokio::test]
async fn compression_negotiated_end_to_end() {
    let options = Options::new().with_compression(6, 32);
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/deflate", options.clone())
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    let client_task = tokio::spawn(async move {
        let client = connect(&format!("ws://{addr}/deflate"), options)
            .await
            .unwrap();
        let message = vec![b'Z'; 4096];
        client.write(&message).await.unwrap();
        let reply = client.read_message().await.unwrap();
        assert_eq!(reply, message);
        client.close().await.unwrap();
    });

    let server = acceptor.accept().await.unwrap();
    let message = server.read_message().await.unwrap();
    assert_eq!(message.len(), 4096);
    server.write(&message).await.unwrap();

    client_task.await.unwrap();
    acceptor.close().await;
}

#[tokio::test]
async fn server_without_compression_leaves_client_plain() {
    // Client offers, server has the option off: nothing is negotiated and
    // traffic still round-trips.
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/plain", Options::default())
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    let client_task = tokio::spawn(async move {
        let client = connect(
            &format!("ws://{addr}/plain"),
            Options::new().with_compression(6, 16),
        )
        .await
        .unwrap();
        client.write(&vec![b'Q'; 600]).await.unwrap();
        client
    });

    let server = acceptor.accept().await.unwrap();
    assert_eq!(server.read_message().await.unwrap(), vec![b'Q'; 600]);

    drop(client_task.await.unwrap());
    acceptor.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_accept_fails_after() {
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/", Options::default())
        .await
        .unwrap();

    acceptor.close().await;
    acceptor.close().await;

    let err = acceptor.accept().await.unwrap_err();
    assert!(matches!(err, Error::Closed), "{err:?}");
}

#[tokio::test]
async fn queued_transports_are_closed_on_shutdown() {
    let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:0/q", Options::default())
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    // Enqueue a connection that is never accepted.
    let client = connect(&format!("ws://{addr}/q"), Options::default())
        .await
        .unwrap();

    // Give the upgrade task a beat to land in the queue, then shut down.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    acceptor.close().await;

    // The queued server transport was closed; the client sees the stream end.
    let err = client.read_message().await.unwrap_err();
    assert!(
        matches!(err, Error::UnexpectedEof | Error::Io(_)),
        "{err:?}"
    );
}

#[tokio::test]
async fn wss_accept_and_echo() {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();

    let dir = std::env::temp_dir();
    let cert_path = dir.join(format!("ws-transport-test-{}.crt", std::process::id()));
    let key_path = dir.join(format!("ws-transport-test-{}.key", std::process::id()));
    std::fs::File::create(&cert_path)
        .unwrap()
        .write_all(cert.pem().as_bytes())
        .unwrap();
    std::fs::File::create(&key_path)
        .unwrap()
        .write_all(key_pair.serialize_pem().as_bytes())
        .unwrap();

    let options = Options::new().with_tls_files(&cert_path, &key_path);
    let mut acceptor = WsAcceptor::bind("wss://127.0.0.1:0/secure", options)
        .await
        .unwrap();
    let addr = acceptor.local_addr();

    // Dial with a root store trusting only the test certificate; the crate's
    // `connect` would use the webpki roots and refuse the self-signed chain.
    let roots = ws_transport::tls::load_certs(&cert_path).unwrap();
    let config = ws_transport::tls::client_config_with_roots(&roots).unwrap();

    let client_task = tokio::spawn(async move {
        let tcp = TcpStream::connect(addr).await.unwrap();
        let connector = tokio_rustls::TlsConnector::from(config);
        let name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let mut stream = connector.connect(name, tcp).await.unwrap();

        let key = handshake::generate_key();
        stream
            .write_all(
                handshake::client_request(&format!("localhost:{}", addr.port()), "/secure", &key, None)
                    .as_bytes(),
            )
            .await
            .unwrap();
        let response = UpgradeResponse::read(&mut stream).await.unwrap();
        response.validate(&key).unwrap();

        let client = WebSocketTransport::new(
            stream,
            Role::Client,
            DeflateParams::default(),
            &Options::default(),
        );
        client.write(b"secure echo").await.unwrap();
        assert_eq!(client.read_message().await.unwrap(), b"secure echo");
        client.write_close(CloseCode::Normal, "done").await.unwrap();
    });

    let server = acceptor.accept().await.unwrap();
    let message = server.read_message().await.unwrap();
    server.write(&message).await.unwrap();

    client_task.await.unwrap();
    acceptor.close().await;

    let _ = std::fs::remove_file(cert_path);
    let _ = std::fs::remove_file(key_path);
}
