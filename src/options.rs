//! Connection and acceptor options.

use std::path::PathBuf;

use crate::protocol::opcode::{OpCode, OpMask};

/// Floor for the accept-queue capacity.
pub const MIN_BACKLOG: usize = 64;

/// Options controlling transports created by the acceptor or dialer.
///
/// Defaults mirror a production text-message setup: text op_code, backlog of
/// 128, Nagle disabled, best-speed compression above 512 bytes (only when
/// `compress_enabled` is set and the handshake negotiates the extension).
#[derive(Debug, Clone)]
pub struct Options {
    /// Default op_code for outbound messages; also seeds the accept mask.
    pub op_code: OpCode,
    /// Inbound data op_codes surfaced to readers.
    pub accept_mask: OpMask,
    /// Upgrade paths registered on the listener. Empty means the listen
    /// URL's own path.
    pub routers: Vec<String>,
    /// Enforce UTF-8 validation on inbound text messages.
    pub check_utf8: bool,
    /// Reject inbound frames longer than this. Zero disables the check.
    pub max_frame_size: u64,
    /// Buffering hint for the read half of the stream.
    pub read_buffer_size: usize,
    /// Buffering hint for the write half of the stream.
    pub write_buffer_size: usize,
    /// Accept-queue capacity, clamped to at least [`MIN_BACKLOG`].
    pub backlog: usize,
    /// Disable Nagle on TCP streams.
    pub no_delay: bool,
    /// Globally permit `permessage-deflate` negotiation. Compression is
    /// never used on a connection that did not negotiate it.
    pub compress_enabled: bool,
    /// DEFLATE level, 0-9.
    pub compress_level: u32,
    /// Minimum payload length to compress.
    pub compress_threshold: u64,
    /// PEM certificate chain for `wss` listeners.
    pub certificate_file: Option<PathBuf>,
    /// PEM private key for `wss` listeners.
    pub key_file: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            op_code: OpCode::Text,
            accept_mask: OpMask::TEXT,
            routers: Vec::new(),
            check_utf8: false,
            max_frame_size: 0,
            read_buffer_size: 8 * 1024,
            write_buffer_size: 8 * 1024,
            backlog: 128,
            no_delay: true,
            compress_enabled: false,
            compress_level: 1,
            compress_threshold: 512,
            certificate_file: None,
            key_file: None,
        }
    }
}

impl Options {
    /// Options with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outbound op_code and align the accept mask with it.
    #[must_use]
    pub fn with_op_code(mut self, op_code: OpCode) -> Self {
        self.op_code = op_code;
        self.accept_mask = OpMask::only(op_code);
        self
    }

    /// Override the inbound accept mask independently of `op_code`.
    #[must_use]
    pub fn with_accept_mask(mut self, mask: OpMask) -> Self {
        self.accept_mask = mask;
        self
    }

    /// Register explicit upgrade paths.
    #[must_use]
    pub fn with_routers(mut self, routers: Vec<String>) -> Self {
        self.routers = routers;
        self
    }

    /// Toggle UTF-8 validation of text messages.
    #[must_use]
    pub fn with_check_utf8(mut self, check: bool) -> Self {
        self.check_utf8 = check;
        self
    }

    /// Set the per-frame inbound size limit (0 disables).
    #[must_use]
    pub fn with_max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Set the accept-queue capacity (clamped to [`MIN_BACKLOG`] on use).
    #[must_use]
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    /// Enable `permessage-deflate` negotiation.
    #[must_use]
    pub fn with_compression(mut self, level: u32, threshold: u64) -> Self {
        self.compress_enabled = true;
        self.compress_level = level.min(9);
        self.compress_threshold = threshold;
        self
    }

    /// TLS material for `wss` listeners.
    #[must_use]
    pub fn with_tls_files(
        mut self,
        certificate_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        self.certificate_file = Some(certificate_file.into());
        self.key_file = Some(key_file.into());
        self
    }

    /// Backlog with the floor applied.
    #[must_use]
    pub fn effective_backlog(&self) -> usize {
        self.backlog.max(MIN_BACKLOG)
    }
}
