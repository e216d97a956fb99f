//! Restartable raw-DEFLATE codec wrappers for `permessage-deflate`.
//!
//! RFC 7692 strips the 4-byte `00 00 FF FF` sync-flush tail from compressed
//! messages on the wire. The wrappers re-create that boundary: the decoder
//! appends the tail after the wire payload is exhausted, the encoder verifies
//! the compressor emitted it and strips it before the payload is framed.
//!
//! Both wrappers are restartable: `reset` rebinds them to a fresh stream and
//! clears any previous error state. When context takeover is negotiated the
//! same instance is carried across messages *without* resetting, which is
//! what preserves the shared LZ77 window.

use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};

/// The sync-flush tail elided from the wire (RFC 7692 Section 7.2.1).
pub(crate) const SYNC_FLUSH_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const CHUNK: usize = 4096;
const MAX_CODEC_ITERATIONS: usize = 100_000;

/// Cap on the decompressed size of a single message, guarding against
/// decompression bombs.
const MAX_INFLATED_SIZE: usize = 64 * 1024 * 1024;

/// Streaming raw-DEFLATE decompressor for inbound messages.
///
/// Feed each (unmasked) compressed fragment with [`feed`](Self::feed); call
/// [`finish`](Self::finish) at the end of the message to deliver the elided
/// sync-flush tail.
#[derive(Debug)]
pub struct FlateDecoder {
    inner: Decompress,
}

impl Default for FlateDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlateDecoder {
    /// A fresh decoder with an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
        }
    }

    /// Drop all window history and clear any error state.
    pub fn reset(&mut self) {
        self.inner.reset(false);
    }

    /// Decompress the next chunk of wire payload into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compression`] if the stream is malformed or the
    /// decompressed message exceeds the bomb guard.
    pub fn feed(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        self.run(input, out)
    }

    /// Deliver the elided `00 00 FF FF` tail, completing the message.
    ///
    /// # Errors
    ///
    /// Same conditions as [`feed`](Self::feed).
    pub fn finish(&mut self, out: &mut BytesMut) -> Result<()> {
        self.run(&SYNC_FLUSH_TAIL, out)
    }

    fn run(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let mut pos = 0;
        let mut iterations = 0;
        while pos < input.len() {
            iterations += 1;
            if iterations > MAX_CODEC_ITERATIONS {
                return Err(Error::Compression("decompression stalled".into()));
            }

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .decompress(&input[pos..], &mut out[old_len..], FlushDecompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;

            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.truncate(old_len + produced);
            pos += consumed;

            if out.len() > MAX_INFLATED_SIZE {
                return Err(Error::Compression("decompressed message too large".into()));
            }
            if status == Status::StreamEnd || (consumed == 0 && produced == 0) {
                break;
            }
        }
        Ok(())
    }
}

/// Raw-DEFLATE compressor for outbound messages.
///
/// [`compress`](Self::compress) consumes a whole message payload, sync-flushes,
/// verifies the canonical tail, and strips it.
#[derive(Debug)]
pub struct FlateEncoder {
    inner: Compress,
    level: u32,
    window_bits: Option<u8>,
}

impl FlateEncoder {
    /// A fresh encoder at `level` with the default 15-bit window.
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            inner: Compress::new(Compression::new(level), false),
            level,
            window_bits: None,
        }
    }

    /// A fresh encoder with a negotiated `max_window_bits` window.
    ///
    /// Raw DEFLATE cannot use an 8-bit window, so bits are clamped to 9-15.
    #[must_use]
    pub fn with_window_bits(level: u32, bits: u8) -> Self {
        let clamped = bits.clamp(9, 15);
        Self {
            inner: Compress::new_with_window_bits(Compression::new(level), false, clamped),
            level,
            window_bits: Some(clamped),
        }
    }

    /// Compression level this encoder was built with.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Window bits this encoder was built with, if constrained.
    #[must_use]
    pub fn window_bits(&self) -> Option<u8> {
        self.window_bits
    }

    /// Drop all window history and clear any error state.
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Compress `input`, appending the stripped-tail output to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compression`] if the compressor fails or its flushed
    /// output does not end in the canonical `00 00 FF FF` tail.
    pub fn compress(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let start = out.len();
        let mut pos = 0;
        let mut iterations = 0;

        while pos < input.len() {
            iterations += 1;
            if iterations > MAX_CODEC_ITERATIONS {
                return Err(Error::Compression("compression stalled".into()));
            }

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            self.inner
                .compress(&input[pos..], &mut out[old_len..], FlushCompress::None)
                .map_err(|e| Error::Compression(e.to_string()))?;

            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.truncate(old_len + produced);
            pos += consumed;
        }

        loop {
            iterations += 1;
            if iterations > MAX_CODEC_ITERATIONS {
                return Err(Error::Compression("compression flush stalled".into()));
            }

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let before_out = self.inner.total_out();
            self.inner
                .compress(&[], &mut out[old_len..], FlushCompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;

            let produced = (self.inner.total_out() - before_out) as usize;
            out.truncate(old_len + produced);
            if produced == 0 {
                break;
            }
        }

        let emitted = out.len() - start;
        if emitted < SYNC_FLUSH_TAIL.len() || out[out.len() - 4..] != SYNC_FLUSH_TAIL {
            return Err(Error::Compression("missing sync-flush tail".into()));
        }
        out.truncate(out.len() - 4);
        Ok(())
    }
}
