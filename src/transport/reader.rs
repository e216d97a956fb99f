//! Message-level frame reader.
//!
//! The reader exposes one inbound message at a time as a byte stream: once a
//! data frame of an accepted type begins, `read` yields payload bytes
//! (possibly spanning several fragment frames) until the message is
//! exhausted, then returns `Ok(0)` as the end-of-message boundary. Control
//! frames arriving between or inside fragmented messages are dispatched
//! inline and never surface to the caller.
//!
//! Ordering is deliberate: control frames are handled before the accept mask
//! is consulted, and the accept mask is only consulted for non-control
//! frames. A message of an unaccepted type is discarded, answered with a
//! close frame carrying status 1003, and reading continues.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

use crate::deflate::{DeflateParams, FlateDecoder};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::pool;
use crate::protocol::close::{parse_close_payload, CloseCode};
use crate::protocol::header::{FrameHeader, MAX_CONTROL_PAYLOAD};
use crate::protocol::mask::xor_mask;
use crate::protocol::opcode::{OpCode, OpMask};
use crate::protocol::utf8::Utf8Validator;
use crate::transport::writer::MessageWriter;
use crate::transport::Role;

const DISCARD_CHUNK: usize = 8 * 1024;

/// Fragment state machine. Control frames never transition it; data frames
/// with `fin = false` enter or stay in `InMessage`, a final data frame
/// returns it to `Idle`.
enum FragmentState {
    Idle,
    InMessage {
        op_code: OpCode,
        utf8: Option<Utf8Validator>,
        compressed: bool,
    },
}

/// The partially consumed payload of the current uncompressed frame.
struct FrameState {
    remaining: u64,
    fin: bool,
    mask: Option<([u8; 4], usize)>,
}

/// Decompressed message waiting to be handed out in `read`-sized pieces.
struct Inflated {
    data: BytesMut,
    pos: usize,
}

/// Inbound compression state for one connection.
struct ReaderDeflate {
    /// Present iff the peer is permitted context takeover. Carries the
    /// shared LZ77 window across messages.
    persistent: Option<FlateDecoder>,
    /// Inflater leased for the message currently being read.
    active: Option<DecoderLease>,
    /// Accumulated decompressed output of that message.
    out: Option<BytesMut>,
}

/// Inflater borrowed for the duration of one message.
enum DecoderLease {
    Persistent(FlateDecoder),
    Pooled(FlateDecoder),
}

impl DecoderLease {
    fn decoder(&mut self) -> &mut FlateDecoder {
        match self {
            DecoderLease::Persistent(dec) | DecoderLease::Pooled(dec) => dec,
        }
    }

    /// Message completed: a persistent inflater keeps its window, a pooled
    /// one goes back (reset) for the next borrower.
    fn release(self, slot: &mut ReaderDeflate) {
        match self {
            DecoderLease::Persistent(dec) => slot.persistent = Some(dec),
            DecoderLease::Pooled(dec) => pool::decoders().put(dec),
        }
    }

    /// Message failed: restart a persistent inflater, drop a pooled one.
    fn discard(self, slot: &mut ReaderDeflate) {
        match self {
            DecoderLease::Persistent(mut dec) => {
                dec.reset();
                slot.persistent = Some(dec);
            }
            DecoderLease::Pooled(_) => {}
        }
    }
}

pub(crate) struct MessageReader<R> {
    stream: BufReader<R>,
    role: Role,
    accept: OpMask,
    check_utf8: bool,
    max_frame_size: u64,
    state: FragmentState,
    frame: Option<FrameState>,
    inflated: Option<Inflated>,
    compress: Option<ReaderDeflate>,
    /// Set once the control handler has answered a close frame, so the
    /// error path does not emit a second close.
    close_replied: bool,
}

impl<R> MessageReader<R> {
    pub(crate) fn new(stream: R, role: Role, negotiated: DeflateParams, options: &Options) -> Self
    where
        R: AsyncRead,
    {
        let compress = (options.compress_enabled && negotiated.enabled).then(|| ReaderDeflate {
            persistent: (!negotiated.peer_no_context_takeover(role))
                .then(|| pool::decoders().get()),
            active: None,
            out: None,
        });

        Self {
            stream: BufReader::with_capacity(options.read_buffer_size.max(512), stream),
            role,
            accept: options.accept_mask,
            check_utf8: options.check_utf8,
            max_frame_size: options.max_frame_size,
            state: FragmentState::Idle,
            frame: None,
            inflated: None,
            compress,
            close_replied: false,
        }
    }

    pub(crate) fn close_replied(&self) -> bool {
        self.close_replied
    }

    /// Drop any in-progress message state after an error: clear the fragment
    /// machine, dispose of the leased inflater, and recycle buffers.
    pub(crate) fn recover(&mut self) {
        self.frame = None;
        self.state = FragmentState::Idle;
        if let Some(inflated) = self.inflated.take() {
            pool::buffers().put(inflated.data);
        }
        if let Some(slot) = &mut self.compress {
            if let Some(lease) = slot.active.take() {
                lease.discard(slot);
            }
            if let Some(out) = slot.out.take() {
                pool::buffers().put(out);
            }
        }
    }

    /// Return the persistent inflater, if any, to the process pool.
    /// Idempotent; called on transport close and drop.
    pub(crate) fn release_codecs(&mut self) {
        self.recover();
        if let Some(slot) = &mut self.compress {
            if let Some(dec) = slot.persistent.take() {
                pool::decoders().put(dec);
            }
        }
    }
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Copy the next chunk of the current message into `buf`.
    ///
    /// Returns `Ok(0)` as the end-of-message boundary; a non-empty `buf`
    /// never observes `Ok(0)` mid-message.
    pub(crate) async fn read<W: AsyncWrite + Unpin>(
        &mut self,
        buf: &mut [u8],
        writer: &Mutex<MessageWriter<W>>,
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            // Drain a decompressed message first.
            if let Some(inflated) = &mut self.inflated {
                if inflated.pos < inflated.data.len() {
                    let n = (inflated.data.len() - inflated.pos).min(buf.len());
                    buf[..n].copy_from_slice(&inflated.data[inflated.pos..inflated.pos + n]);
                    inflated.pos += n;
                    return Ok(n);
                }
                if let Some(done) = self.inflated.take() {
                    pool::buffers().put(done.data);
                }
                return Ok(0);
            }

            // Continue the frame currently being streamed.
            if let Some(frame) = &mut self.frame {
                if frame.remaining > 0 {
                    let want = frame.remaining.min(buf.len() as u64) as usize;
                    let n = self.stream.read(&mut buf[..want]).await?;
                    if n == 0 {
                        return Err(Error::UnexpectedEof);
                    }
                    if let Some((mask, offset)) = &mut frame.mask {
                        *offset = xor_mask(&mut buf[..n], *mask, *offset);
                    }
                    frame.remaining -= n as u64;
                    if let FragmentState::InMessage {
                        utf8: Some(validator),
                        ..
                    } = &mut self.state
                    {
                        validator.feed(&buf[..n])?;
                    }
                    return Ok(n);
                }

                let fin = frame.fin;
                self.frame = None;
                if fin {
                    if let FragmentState::InMessage {
                        utf8: Some(validator),
                        ..
                    } = &mut self.state
                    {
                        validator.finish()?;
                    }
                    self.state = FragmentState::Idle;
                    return Ok(0);
                }
                // Non-final frame exhausted: pull the next fragment.
            }

            let header = FrameHeader::read(&mut self.stream).await?;
            self.validate_header(&header)?;

            // Control frames bypass the accept mask and the fragment machine.
            if header.op_code.is_control() {
                self.handle_control(&header, writer).await?;
                continue;
            }

            if matches!(self.state, FragmentState::Idle) {
                if header.op_code == OpCode::Continuation {
                    return Err(Error::Protocol("continuation frame outside a message"));
                }
                if !self.accept.accepts(header.op_code) {
                    log::debug!("discarding unaccepted {} message", header.op_code);
                    self.discard_message(&header, writer).await?;
                    writer
                        .lock()
                        .await
                        .write_close(CloseCode::UnsupportedData, "unsupported data type")
                        .await?;
                    continue;
                }

                let utf8 =
                    (header.op_code == OpCode::Text && self.check_utf8).then(Utf8Validator::new);
                self.state = FragmentState::InMessage {
                    op_code: header.op_code,
                    utf8,
                    compressed: header.rsv1,
                };
                if header.rsv1 {
                    self.begin_inflate(&header)?;
                }
            } else {
                if header.op_code != OpCode::Continuation {
                    return Err(Error::Protocol("data frame inside a fragmented message"));
                }
                if header.rsv1 {
                    return Err(Error::Protocol("RSV1 set on continuation frame"));
                }
            }

            if matches!(
                self.state,
                FragmentState::InMessage {
                    compressed: true,
                    ..
                }
            ) {
                self.inflate_frame(&header).await?;
                if header.fin {
                    self.finish_inflate()?;
                }
                continue;
            }

            self.frame = Some(FrameState {
                remaining: header.length,
                fin: header.fin,
                mask: header.masked.then_some((header.mask, 0)),
            });
        }
    }

    /// Header validation that depends on connection state and side.
    fn validate_header(&self, header: &FrameHeader) -> Result<()> {
        if header.rsv2 || header.rsv3 {
            return Err(Error::Protocol("reserved bits set"));
        }
        if header.rsv1 {
            if self.compress.is_none() {
                return Err(Error::Protocol("RSV1 set without negotiated compression"));
            }
            if header.op_code.is_control() {
                return Err(Error::Protocol("compressed control frame"));
            }
        }

        if self.role.expects_masked() && !header.masked {
            return Err(Error::Protocol("unmasked frame from client"));
        }
        if !self.role.expects_masked() && header.masked {
            return Err(Error::Protocol("masked frame from server"));
        }

        if self.max_frame_size > 0 && header.length > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: header.length,
                max: self.max_frame_size,
            });
        }

        if header.op_code.is_control() {
            if !header.fin {
                return Err(Error::Protocol("fragmented control frame"));
            }
            if header.length > MAX_CONTROL_PAYLOAD {
                return Err(Error::Protocol("control frame payload over 125 bytes"));
            }
        }
        Ok(())
    }

    /// Reply to ping, swallow pong, answer close and report `PeerClosed`.
    ///
    /// The write lock is held only while the reply frame goes out.
    async fn handle_control<W: AsyncWrite + Unpin>(
        &mut self,
        header: &FrameHeader,
        writer: &Mutex<MessageWriter<W>>,
    ) -> Result<()> {
        let len = header.length as usize;
        let mut payload = [0u8; MAX_CONTROL_PAYLOAD as usize];
        self.read_exact(&mut payload[..len]).await?;
        if header.masked {
            xor_mask(&mut payload[..len], header.mask, 0);
        }

        match header.op_code {
            OpCode::Ping => {
                writer
                    .lock()
                    .await
                    .write_control(OpCode::Pong, &payload[..len])
                    .await
            }
            OpCode::Pong => Ok(()),
            OpCode::Close => match parse_close_payload(&payload[..len]) {
                Ok((code, reason)) => {
                    self.close_replied = true;
                    let _ = writer.lock().await.write_close(code, "").await;
                    Err(Error::PeerClosed { code, reason })
                }
                Err(e) => {
                    self.close_replied = true;
                    let _ = writer
                        .lock()
                        .await
                        .write_close(CloseCode::ProtocolError, "invalid close frame")
                        .await;
                    Err(e)
                }
            },
            _ => unreachable!("validated as control frame"),
        }
    }

    /// Lease an inflater and an output buffer for a compressed message.
    fn begin_inflate(&mut self, header: &FrameHeader) -> Result<()> {
        let Some(slot) = &mut self.compress else {
            return Err(Error::Protocol("RSV1 set without negotiated compression"));
        };
        let lease = match slot.persistent.take() {
            Some(dec) => DecoderLease::Persistent(dec),
            None => DecoderLease::Pooled(pool::decoders().get()),
        };
        slot.active = Some(lease);
        slot.out = Some(pool::buffers().get((header.length as usize).saturating_mul(2)));
        Ok(())
    }

    /// Consume one compressed frame's payload into the leased inflater.
    async fn inflate_frame(&mut self, header: &FrameHeader) -> Result<()> {
        let mut remaining = header.length;
        let mut mask = header.masked.then_some((header.mask, 0usize));
        let mut scratch = pool::slices().get(DISCARD_CHUNK);

        let result = loop {
            if remaining == 0 {
                break Ok(());
            }
            let want = remaining.min(scratch.len() as u64) as usize;
            let n = match self.stream.read(&mut scratch[..want]).await {
                Ok(0) => break Err(Error::UnexpectedEof),
                Ok(n) => n,
                Err(e) => break Err(Error::Io(e)),
            };
            if let Some((key, offset)) = &mut mask {
                *offset = xor_mask(&mut scratch[..n], *key, *offset);
            }

            let Some(slot) = &mut self.compress else {
                break Err(Error::Protocol("RSV1 set without negotiated compression"));
            };
            let (Some(lease), Some(out)) = (slot.active.as_mut(), slot.out.as_mut()) else {
                break Err(Error::Compression("inflater not leased".into()));
            };
            if let Err(e) = lease.decoder().feed(&scratch[..n], out) {
                break Err(e);
            }
            remaining -= n as u64;
        };

        pool::slices().put(scratch);
        result
    }

    /// Final fragment consumed: deliver the sync-flush tail, validate UTF-8,
    /// return the inflater, and stage the message for delivery.
    fn finish_inflate(&mut self) -> Result<()> {
        let is_text = matches!(
            self.state,
            FragmentState::InMessage {
                op_code: OpCode::Text,
                ..
            }
        );

        let Some(slot) = &mut self.compress else {
            return Err(Error::Compression("inflater not leased".into()));
        };
        let (Some(mut lease), Some(mut out)) = (slot.active.take(), slot.out.take()) else {
            return Err(Error::Compression("inflater not leased".into()));
        };

        match lease.decoder().finish(&mut out) {
            Ok(()) => lease.release(slot),
            Err(e) => {
                lease.discard(slot);
                pool::buffers().put(out);
                return Err(e);
            }
        }

        if is_text && self.check_utf8 && std::str::from_utf8(&out).is_err() {
            pool::buffers().put(out);
            return Err(Error::InvalidUtf8);
        }

        self.state = FragmentState::Idle;
        self.inflated = Some(Inflated { data: out, pos: 0 });
        Ok(())
    }

    /// Discard an unaccepted message in full, fragments and all, dispatching
    /// any interleaved control frames.
    async fn discard_message<W: AsyncWrite + Unpin>(
        &mut self,
        first: &FrameHeader,
        writer: &Mutex<MessageWriter<W>>,
    ) -> Result<()> {
        self.discard_payload(first).await?;
        let mut fin = first.fin;
        while !fin {
            let header = FrameHeader::read(&mut self.stream).await?;
            self.validate_header(&header)?;
            if header.op_code.is_control() {
                self.handle_control(&header, writer).await?;
                continue;
            }
            if header.op_code != OpCode::Continuation {
                return Err(Error::Protocol("data frame inside a fragmented message"));
            }
            self.discard_payload(&header).await?;
            fin = header.fin;
        }
        Ok(())
    }

    async fn discard_payload(&mut self, header: &FrameHeader) -> Result<()> {
        let mut remaining = header.length;
        let mut scratch = pool::slices().get(DISCARD_CHUNK);
        let result = loop {
            if remaining == 0 {
                break Ok(());
            }
            let want = remaining.min(scratch.len() as u64) as usize;
            match self.stream.read(&mut scratch[..want]).await {
                Ok(0) => break Err(Error::UnexpectedEof),
                Ok(n) => remaining -= n as u64,
                Err(e) => break Err(Error::Io(e)),
            }
        };
        pool::slices().put(scratch);
        result
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream.read_exact(buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof
            } else {
                Error::Io(e)
            }
        })?;
        Ok(())
    }
}
