//! The WebSocket transport object.
//!
//! A [`WebSocketTransport`] owns its byte stream, split into a reader half
//! and a writer half, each serialized by its own async mutex. Reads surface
//! one message at a time as a chunked byte stream; writes emit one complete
//! message per call. The control-frame handler inside the reader takes the
//! writer lock only while a reply frame goes out.
//!
//! `close` publishes a close signal that every blocked read and write races
//! against, so in-flight I/O is interrupted even though the split halves
//! cannot close the underlying socket's read direction on their own.

mod reader;
mod role;
pub(crate) mod writer;

pub use role::Role;

use tokio::io::{self, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::deflate::DeflateParams;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::protocol::close::CloseCode;
use reader::MessageReader;
use writer::MessageWriter;

/// A WebSocket connection exposed as a byte-stream transport with message
/// boundaries.
///
/// # Reading
///
/// [`read`](Self::read) fills a buffer with the next chunk of the current
/// inbound message and returns `Ok(0)` as the end-of-message boundary.
/// Control frames (ping, pong, close) are handled internally and never
/// surface. [`read_message`](Self::read_message) collects one whole message.
///
/// # Writing
///
/// [`write`](Self::write) emits the payload as one complete message using
/// the transport's default op_code, compressing it when `permessage-deflate`
/// was negotiated and the payload meets the threshold.
///
/// # Concurrency
///
/// All methods take `&self`. Reads are serialized by the reader lock, writes
/// by the writer lock; frames from concurrent writes never interleave on the
/// wire. [`close`](Self::close) interrupts reads and writes blocked on the
/// stream; they fail with [`Error::Closed`].
pub struct WebSocketTransport<S> {
    reader: Mutex<MessageReader<ReadHalf<S>>>,
    writer: Mutex<MessageWriter<WriteHalf<S>>>,
    role: Role,
    route: String,
    headers: Vec<(String, String)>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl<S> std::fmt::Debug for WebSocketTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("role", &self.role)
            .field("route", &self.route)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> WebSocketTransport<S> {
    /// Build a transport over an already-upgraded stream.
    ///
    /// `negotiated` is the outcome of `permessage-deflate` negotiation for
    /// this connection; pass `DeflateParams::default()` when the extension
    /// was not negotiated. Compression is used only when both the global
    /// option and the negotiation allow it.
    pub fn new(stream: S, role: Role, negotiated: DeflateParams, options: &Options) -> Self {
        Self::with_request(stream, role, negotiated, options, String::new(), Vec::new())
    }

    pub(crate) fn with_request(
        stream: S,
        role: Role,
        negotiated: DeflateParams,
        options: &Options,
        route: String,
        headers: Vec<(String, String)>,
    ) -> Self {
        let (read_half, write_half) = io::split(stream);
        let (closed_tx, closed_rx) = watch::channel(false);
        log::debug!(
            "websocket transport up: role={role} route={route:?} compression={}",
            options.compress_enabled && negotiated.enabled
        );
        Self {
            reader: Mutex::new(MessageReader::new(read_half, role, negotiated, options)),
            writer: Mutex::new(MessageWriter::new(write_half, role, negotiated, options)),
            role,
            route,
            headers,
            closed_tx,
            closed_rx,
        }
    }

    /// Read the next chunk of the current inbound message.
    ///
    /// Returns the number of bytes copied into `buf`, or `Ok(0)` at the end
    /// of a message. Errors with a defined close status emit the close frame
    /// before surfacing. A read blocked on the stream fails with
    /// [`Error::Closed`] when the transport is closed from another task.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut closed = self.closed_rx.clone();
        if *closed.borrow() {
            return Err(Error::Closed);
        }

        let mut reader = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => return Err(Error::Closed),
            guard = self.reader.lock() => guard,
        };
        let result = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => return Err(Error::Closed),
            res = reader.read(buf, &self.writer) => res,
        };

        match result {
            Ok(n) => Ok(n),
            Err(e) => {
                reader.recover();
                if let Some(code) = e.close_code() {
                    if !reader.close_replied() {
                        if let Ok((mut closed, mut writer)) = self.writer_half().await {
                            let _ = tokio::select! {
                                _ = closed.wait_for(|closed| *closed) => Ok(()),
                                res = writer.write_close(code, "") => res,
                            };
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Collect one whole inbound message.
    pub async fn read_message(&self) -> Result<Vec<u8>> {
        let mut message = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(message);
            }
            message.extend_from_slice(&chunk[..n]);
        }
    }

    /// Write `payload` as one complete message, returning the uncompressed
    /// payload length.
    pub async fn write(&self, payload: &[u8]) -> Result<usize> {
        let (mut closed, mut writer) = self.writer_half().await?;
        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => Err(Error::Closed),
            res = writer.write_message(payload) => res,
        }
    }

    /// Write each buffer as its own complete message, in order, under one
    /// write-lock acquisition. Returns the summed payload length.
    pub async fn write_vectored(&self, bufs: &[impl AsRef<[u8]>]) -> Result<u64> {
        let (mut closed, mut writer) = self.writer_half().await?;
        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => Err(Error::Closed),
            res = writer.write_vectored(bufs) => res,
        }
    }

    /// Send a close frame with `code` and a reason capped at 123 bytes.
    pub async fn write_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        let (mut closed, mut writer) = self.writer_half().await?;
        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => Err(Error::Closed),
            res = writer.write_close(code, reason) => res,
        }
    }

    /// Flush buffered output, serialized with other writers.
    pub async fn flush(&self) -> Result<()> {
        let (mut closed, mut writer) = self.writer_half().await?;
        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => Err(Error::Closed),
            res = writer.flush() => res,
        }
    }

    /// Close the transport: interrupt in-flight reads and writes, release
    /// persistent codecs back to their pools, and shut the stream down.
    /// Idempotent; subsequent reads and writes fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed_tx.send_replace(true) {
            return Ok(());
        }
        log::debug!("websocket transport closing: role={}", self.role);

        // The close signal cancels any read or write blocked on the stream,
        // so both locks become available promptly.
        let mut reader = self.reader.lock().await;
        reader.release_codecs();
        drop(reader);

        let mut writer = self.writer.lock().await;
        writer.release_codecs();
        writer.shutdown().await
    }

    /// The upgrade request path for accepted transports, empty otherwise.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The upgrade request headers for accepted transports.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Which side of the connection this transport is.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Take the writer lock, racing it against the close signal.
    async fn writer_half(
        &self,
    ) -> Result<(
        watch::Receiver<bool>,
        MutexGuard<'_, MessageWriter<WriteHalf<S>>>,
    )> {
        let mut closed = self.closed_rx.clone();
        if *closed.borrow() {
            return Err(Error::Closed);
        }
        let guard = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => return Err(Error::Closed),
            guard = self.writer.lock() => guard,
        };
        Ok((closed, guard))
    }
}

impl<S> Drop for WebSocketTransport<S> {
    fn drop(&mut self) {
        // Codec release is idempotent; this covers transports dropped
        // without close and readers that were cancelled mid-message.
        self.reader.get_mut().release_codecs();
        self.writer.get_mut().release_codecs();
    }
}
