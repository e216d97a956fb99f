//! Message-level frame writer.
//!
//! Each call stages one complete frame — optional per-message compression,
//! client-side masking, header packing — into a `BytesMut` write buffer and
//! flushes it as a single gathered `[header | payload]` write. Callers
//! serialize access through the transport's write lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::deflate::{DeflateParams, FlateEncoder};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::pool;
use crate::protocol::close::{encode_close_payload, CloseCode};
use crate::protocol::header::{FrameHeader, MAX_CONTROL_PAYLOAD, MAX_HEADER_SIZE};
use crate::protocol::mask::xor_mask;
use crate::protocol::opcode::OpCode;
use crate::transport::Role;

/// Outbound compression state for one connection.
struct WriterDeflate {
    threshold: u64,
    level: u32,
    window_bits: Option<u8>,
    /// Present iff context takeover is permitted for our side. Carries the
    /// LZ77 window across messages.
    persistent: Option<FlateEncoder>,
}

/// Deflater borrowed for the duration of one message.
enum EncoderLease {
    Persistent(FlateEncoder),
    Pooled(FlateEncoder),
}

impl EncoderLease {
    fn encoder(&mut self) -> &mut FlateEncoder {
        match self {
            EncoderLease::Persistent(enc) | EncoderLease::Pooled(enc) => enc,
        }
    }

    /// Message completed: a persistent deflater keeps its window, a pooled
    /// one goes back (reset) for the next borrower.
    fn release(self, slot: &mut WriterDeflate) {
        match self {
            EncoderLease::Persistent(enc) => slot.persistent = Some(enc),
            EncoderLease::Pooled(enc) => pool::encoders().put(enc),
        }
    }

    /// Message failed: restart a persistent deflater, drop a pooled one.
    fn discard(self, slot: &mut WriterDeflate) {
        match self {
            EncoderLease::Persistent(mut enc) => {
                enc.reset();
                slot.persistent = Some(enc);
            }
            EncoderLease::Pooled(_) => {}
        }
    }
}

pub(crate) struct MessageWriter<W> {
    stream: W,
    write_buf: BytesMut,
    role: Role,
    op_code: OpCode,
    mask_state: u32,
    compress: Option<WriterDeflate>,
}

impl<W> MessageWriter<W> {
    pub(crate) fn new(stream: W, role: Role, negotiated: DeflateParams, options: &Options) -> Self {
        let compress = (options.compress_enabled && negotiated.enabled).then(|| {
            let window_bits = negotiated.our_max_window_bits(role);
            let persistent = (!negotiated.our_no_context_takeover(role))
                .then(|| pool::encoders().get(options.compress_level, window_bits));
            WriterDeflate {
                threshold: options.compress_threshold,
                level: options.compress_level,
                window_bits,
                persistent,
            }
        });

        Self {
            stream,
            write_buf: BytesMut::with_capacity(options.write_buffer_size.max(512)),
            role,
            op_code: options.op_code,
            mask_state: connection_seed(),
            compress,
        }
    }

    /// Return the persistent deflater, if any, to the process pool.
    /// Idempotent; called on transport close and drop.
    pub(crate) fn release_codecs(&mut self) {
        if let Some(slot) = &mut self.compress {
            if let Some(enc) = slot.persistent.take() {
                pool::encoders().put(enc);
            }
        }
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        self.mask_state = self.mask_state.wrapping_add(0x9E37_79B9);
        let a = self.mask_state;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        c.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }

    /// Stage one message frame in the write buffer, returning the
    /// uncompressed payload length.
    fn stage_message(&mut self, payload: &[u8]) -> Result<usize> {
        let data_len = payload.len();
        let mut rsv1 = false;
        let mut deflated: Option<BytesMut> = None;

        if let Some(slot) = &mut self.compress {
            if data_len as u64 >= slot.threshold {
                let mut out = pool::buffers().get(data_len);
                let mut lease = match slot.persistent.take() {
                    Some(enc) => EncoderLease::Persistent(enc),
                    None => EncoderLease::Pooled(pool::encoders().get(slot.level, slot.window_bits)),
                };

                match lease.encoder().compress(payload, &mut out) {
                    Ok(()) => {
                        lease.release(slot);
                        rsv1 = true;
                        deflated = Some(out);
                    }
                    Err(e) => {
                        lease.discard(slot);
                        pool::buffers().put(out);
                        return Err(e);
                    }
                }
            }
        }

        let data = deflated.as_deref().unwrap_or(payload);
        let result = self.stage_frame(self.op_code, rsv1, data);
        if let Some(out) = deflated {
            pool::buffers().put(out);
        }
        result?;
        Ok(data_len)
    }

    /// Append one packed frame to the write buffer, masking in place when
    /// this side is a client.
    fn stage_frame(&mut self, op: OpCode, rsv1: bool, payload: &[u8]) -> Result<()> {
        let mut header = FrameHeader::new(op, payload.len() as u64);
        header.rsv1 = rsv1;
        if self.role.must_mask() {
            header.masked = true;
            header.mask = self.generate_mask();
        }

        let mut head = [0u8; MAX_HEADER_SIZE];
        let hn = header.write(&mut head)?;

        self.write_buf.reserve(hn + payload.len());
        self.write_buf.put_slice(&head[..hn]);
        let start = self.write_buf.len();
        self.write_buf.put_slice(payload);
        if header.masked {
            xor_mask(&mut self.write_buf[start..], header.mask, 0);
        }
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Write one complete message, returning the uncompressed payload length.
    pub(crate) async fn write_message(&mut self, payload: &[u8]) -> Result<usize> {
        let n = self.stage_message(payload)?;
        self.flush().await?;
        Ok(n)
    }

    /// Write one message per buffer, in order, with a single trailing flush.
    pub(crate) async fn write_vectored(&mut self, bufs: &[impl AsRef<[u8]>]) -> Result<u64> {
        let mut total = 0u64;
        for buf in bufs {
            total += self.stage_message(buf.as_ref())? as u64;
        }
        self.flush().await?;
        Ok(total)
    }

    /// Emit a control frame and flush it.
    pub(crate) async fn write_control(&mut self, op: OpCode, payload: &[u8]) -> Result<()> {
        debug_assert!(op.is_control());
        debug_assert!(payload.len() as u64 <= MAX_CONTROL_PAYLOAD);
        self.stage_frame(op, false, payload)?;
        self.flush().await
    }

    /// Emit a close frame: 2-byte big-endian status plus a bounded reason.
    pub(crate) async fn write_close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        let payload = encode_close_payload(code, reason);
        self.write_control(OpCode::Close, &payload).await
    }

    /// Drain the write buffer to the stream and flush it.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        while self.write_buf.has_remaining() {
            let n = self.stream.write(self.write_buf.chunk()).await?;
            if n == 0 {
                return Err(Error::Io(std::io::ErrorKind::WriteZero.into()));
            }
            self.write_buf.advance(n);
        }
        self.stream.flush().await?;
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        // Anything a cancelled flush left behind is discarded; the frame
        // boundary is already compromised.
        self.write_buf.clear();
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn process_seed() -> u32 {
    static SEED: OnceLock<u32> = OnceLock::new();
    *SEED.get_or_init(|| {
        let mut buf = [0u8; 4];
        if getrandom::getrandom(&mut buf).is_ok() {
            u32::from_le_bytes(buf)
        } else {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u32)
                .unwrap_or(0x9E37_79B9)
        }
    })
}

/// Per-connection mask seed: the process seed stepped by a golden-ratio
/// counter so concurrent connections do not share mask sequences.
fn connection_seed() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    process_seed().wrapping_add(COUNTER.fetch_add(0x9E37_79B9, Ordering::Relaxed))
}
