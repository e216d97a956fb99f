//! Listening, upgrading, and dialing WebSocket transports.
//!
//! [`WsAcceptor::bind`] owns the TCP (or TLS) listener and serves upgrades in
//! a background task. Each successful upgrade produces a
//! [`WebSocketTransport`] pushed onto a bounded queue that
//! [`WsAcceptor::accept`] drains; when the queue is full the upgrade task
//! blocks until a consumer takes a slot. The listener is bound before `bind`
//! returns, so a subsequent dial cannot race server startup.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::deflate::DeflateParams;
use crate::error::{Error, Result};
use crate::handshake::{self, UpgradeRequest, UpgradeResponse};
use crate::options::Options;
use crate::tls;
use crate::transport::{Role, WebSocketTransport};

/// A TCP stream, optionally wrapped in TLS on either side.
pub enum MaybeTlsStream {
    /// Plaintext `ws` stream.
    Plain(TcpStream),
    /// Accepted `wss` stream.
    ServerTls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    /// Dialed `wss` stream.
    ClientTls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::ServerTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            MaybeTlsStream::ClientTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::ServerTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            MaybeTlsStream::ClientTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::ServerTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            MaybeTlsStream::ClientTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::ServerTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            MaybeTlsStream::ClientTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Accepted transport type.
pub type AcceptedTransport = WebSocketTransport<MaybeTlsStream>;

struct WsUrl {
    tls: bool,
    host: String,
    port: u16,
    path: String,
}

fn parse_url(addr: &str) -> Result<WsUrl> {
    let (scheme, rest) = addr
        .split_once("://")
        .ok_or_else(|| Error::Handshake(format!("address {addr:?} has no scheme")))?;
    let tls = match scheme {
        "ws" => false,
        "wss" => true,
        other => {
            return Err(Error::Handshake(format!("unsupported scheme {other:?}")));
        }
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(Error::Handshake(format!("address {addr:?} has no host")));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse()
                .map_err(|_| Error::Handshake(format!("bad port in {addr:?}")))?,
        ),
        None => (authority, if tls { 443 } else { 80 }),
    };

    Ok(WsUrl {
        tls,
        host: host.to_owned(),
        port,
        path: path.to_owned(),
    })
}

/// Accepts upgraded WebSocket connections from a `ws://` or `wss://` listen
/// address.
pub struct WsAcceptor {
    incoming: mpsc::Receiver<AcceptedTransport>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
    closed: bool,
}

impl WsAcceptor {
    /// Bind the listen address and start serving upgrades.
    ///
    /// The TCP bind completes before this returns; there is no startup
    /// window in which a dial can race the listener. For `wss` addresses,
    /// `options` must carry `certificate_file` and `key_file`.
    pub async fn bind(addr: &str, options: Options) -> Result<Self> {
        let url = parse_url(addr)?;

        let tls_acceptor = if url.tls {
            let (Some(cert), Some(key)) = (&options.certificate_file, &options.key_file) else {
                return Err(Error::Tls(
                    "wss listener requires certificate_file and key_file".into(),
                ));
            };
            Some(TlsAcceptor::from(tls::server_config(cert, key)?))
        } else {
            None
        };

        let listener = TcpListener::bind((url.host.as_str(), url.port)).await?;
        let local_addr = listener.local_addr()?;

        let routes: Arc<Vec<String>> = Arc::new(if options.routers.is_empty() {
            vec![url.path.clone()]
        } else {
            options.routers.clone()
        });

        let (tx, rx) = mpsc::channel(options.effective_backlog());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let options = Arc::new(options);

        let task = tokio::spawn(serve(
            listener,
            tls_acceptor,
            options,
            routes,
            tx,
            shutdown_rx,
        ));
        log::debug!("websocket acceptor listening on {local_addr}");

        Ok(Self {
            incoming: rx,
            shutdown: shutdown_tx,
            task,
            local_addr,
            closed: false,
        })
    }

    /// The bound listen address (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The next upgraded transport, or [`Error::Closed`] once the acceptor
    /// has been closed.
    pub async fn accept(&mut self) -> Result<AcceptedTransport> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.incoming.recv().await.ok_or(Error::Closed)
    }

    /// Stop listening, drain queued transports (closing each), and mark the
    /// acceptor closed. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _ = self.shutdown.send(true);
        self.incoming.close();
        while let Some(transport) = self.incoming.recv().await {
            let _ = transport.close().await;
        }
        let _ = (&mut self.task).await;
        log::debug!("websocket acceptor on {} closed", self.local_addr);
    }
}

impl Drop for WsAcceptor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    options: Arc<Options>,
    routes: Arc<Vec<String>>,
    tx: mpsc::Sender<AcceptedTransport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let tls_acceptor = tls_acceptor.clone();
                    let options = Arc::clone(&options);
                    let routes = Arc::clone(&routes);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            upgrade(stream, tls_acceptor, options, routes, tx).await
                        {
                            log::debug!("upgrade from {peer} failed: {e}");
                        }
                    });
                }
                Err(e) => log::warn!("listener accept error: {e}"),
            },
        }
    }
}

async fn upgrade(
    stream: TcpStream,
    tls_acceptor: Option<TlsAcceptor>,
    options: Arc<Options>,
    routes: Arc<Vec<String>>,
    tx: mpsc::Sender<AcceptedTransport>,
) -> Result<()> {
    stream.set_nodelay(options.no_delay)?;

    let mut stream = match tls_acceptor {
        Some(acceptor) => MaybeTlsStream::ServerTls(Box::new(acceptor.accept(stream).await?)),
        None => MaybeTlsStream::Plain(stream),
    };

    let request = UpgradeRequest::read(&mut stream).await?;
    let path = request.path.split('?').next().unwrap_or(&request.path);
    if !routes.iter().any(|route| route == path) {
        stream
            .write_all(handshake::reject_response(404, "Not Found").as_bytes())
            .await?;
        stream.flush().await?;
        return Err(Error::Handshake(format!(
            "no upgrade route for {:?}",
            request.path
        )));
    }

    let negotiated = if options.compress_enabled {
        request
            .extensions()
            .map(DeflateParams::parse)
            .unwrap_or_default()
    } else {
        DeflateParams::default()
    };

    let response = handshake::accept_response(&request.key, negotiated.response().as_deref());
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    let transport = WebSocketTransport::with_request(
        stream,
        Role::Server,
        negotiated,
        &options,
        request.path,
        request.headers,
    );

    // A full queue blocks here until a consumer drains a slot; a closed
    // queue means the acceptor is shutting down and the connection dies.
    if let Err(rejected) = tx.send(transport).await {
        let _ = rejected.0.close().await;
        return Err(Error::Closed);
    }
    Ok(())
}

/// Dial a `ws://` or `wss://` URL and upgrade it to a WebSocket transport.
///
/// Offers `permessage-deflate` when `compress_enabled` is set and honors
/// whatever the server negotiates.
pub async fn connect(addr: &str, options: Options) -> Result<AcceptedTransport> {
    let url = parse_url(addr)?;

    let tcp = TcpStream::connect((url.host.as_str(), url.port)).await?;
    tcp.set_nodelay(options.no_delay)?;

    let mut stream = if url.tls {
        let connector = TlsConnector::from(tls::client_config());
        let name = rustls::pki_types::ServerName::try_from(url.host.clone())
            .map_err(|_| Error::Tls(format!("invalid server name {:?}", url.host)))?;
        MaybeTlsStream::ClientTls(Box::new(connector.connect(name, tcp).await?))
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    let key = handshake::generate_key();
    let offer = options.compress_enabled.then(DeflateParams::offer);
    let host = format!("{}:{}", url.host, url.port);
    stream
        .write_all(handshake::client_request(&host, &url.path, &key, offer).as_bytes())
        .await?;
    stream.flush().await?;

    let response = UpgradeResponse::read(&mut stream).await?;
    response.validate(&key)?;

    let negotiated = if options.compress_enabled {
        response
            .extensions()
            .map(DeflateParams::parse)
            .unwrap_or_default()
    } else {
        DeflateParams::default()
    };

    Ok(WebSocketTransport::with_request(
        stream,
        Role::Client,
        negotiated,
        &options,
        url.path,
        response.headers,
    ))
}
