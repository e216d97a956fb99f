//! WebSocket transport core: RFC 6455 framing over a byte-stream surface.
//!
//! This crate is the WebSocket member of a pluggable transport family. It
//! exposes connections as byte-stream transports with message boundaries:
//! reads hand out one inbound message at a time in caller-sized chunks,
//! writes emit one complete frame per call, and control frames (ping, pong,
//! close) are serviced internally. The `permessage-deflate` extension is
//! supported end to end, including `no_context_takeover` and
//! `max_window_bits` negotiation with persistent codec reuse.
//!
//! # Server
//!
//! ```rust,ignore
//! use ws_transport::{Options, WsAcceptor};
//!
//! let mut acceptor = WsAcceptor::bind("ws://127.0.0.1:9001/echo", Options::default()).await?;
//! while let Ok(transport) = acceptor.accept().await {
//!     tokio::spawn(async move {
//!         while let Ok(message) = transport.read_message().await {
//!             transport.write(&message).await?;
//!         }
//!         Ok::<_, ws_transport::Error>(())
//!     });
//! }
//! ```
//!
//! # Client
//!
//! ```rust,ignore
//! use ws_transport::{connect, Options};
//!
//! let transport = connect("ws://127.0.0.1:9001/echo", Options::default()).await?;
//! transport.write(b"hello").await?;
//! let reply = transport.read_message().await?;
//! ```

pub mod acceptor;
pub mod deflate;
pub mod error;
pub mod handshake;
pub mod options;
pub(crate) mod pool;
pub mod protocol;
pub mod tls;
pub mod transport;

pub use acceptor::{connect, AcceptedTransport, MaybeTlsStream, WsAcceptor};
pub use deflate::DeflateParams;
pub use error::{Error, Result};
pub use options::Options;
pub use protocol::{CloseCode, OpCode, OpMask};
pub use transport::{Role, WebSocketTransport};
