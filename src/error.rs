//! Error types for the WebSocket transport.
//!
//! Every failure a transport, acceptor, or codec can surface is a variant of
//! [`Error`]. Variants that have a defined on-wire consequence map to a close
//! status code via [`Error::close_code`].

use thiserror::Error;

use crate::protocol::close::CloseCode;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by WebSocket transports and acceptors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Stream ended mid-frame or mid-message.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Inbound frame exceeded the configured `max_frame_size`.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame payload length.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Protocol violation: malformed header, fragmented control frame,
    /// reserved bits without a negotiated extension, invalid close payload.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// 64-bit length field with its most significant bit set.
    #[error("frame header length has most significant bit set")]
    HeaderLengthMsb,

    /// Frame length outside the representable 63-bit range.
    #[error("unexpected frame header length")]
    HeaderLengthUnexpected,

    /// Reserved or unknown op_code on the wire.
    #[error("reserved op_code: {0:#x}")]
    ReservedOpCode(u8),

    /// Text message failed UTF-8 validation.
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Received an op_code outside the accept mask. The reader recovers from
    /// this locally (discard, close 1003, continue); the variant exists for
    /// the rare paths that cannot.
    #[error("unsupported data type (op_code {0:#x})")]
    UnsupportedData(u8),

    /// Decompressor rejected the payload or the compressor produced output
    /// without the canonical sync-flush tail.
    #[error("compression failure: {0}")]
    Compression(String),

    /// Graceful close initiated by the peer.
    #[error("peer closed connection: {code} ({reason:?})")]
    PeerClosed {
        /// Status code from the close frame, `NoStatusReceived` if absent.
        code: CloseCode,
        /// UTF-8 reason text, possibly empty.
        reason: String,
    },

    /// HTTP upgrade failed.
    #[error("invalid handshake: {0}")]
    Handshake(String),

    /// Transport or acceptor used after `close`.
    #[error("transport is closed")]
    Closed,

    /// TLS configuration or negotiation failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Underlying stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The close status this error should put on the wire before it is
    /// surfaced to the caller, if any.
    ///
    /// `PeerClosed` returns `None` because the close handshake has already
    /// been answered; I/O errors return `None` because the stream is gone.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::Protocol(_)
            | Error::HeaderLengthMsb
            | Error::HeaderLengthUnexpected
            | Error::ReservedOpCode(_) => Some(CloseCode::ProtocolError),
            Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
            Error::FrameTooLarge { .. } => Some(CloseCode::MessageTooBig),
            Error::UnsupportedData(_) => Some(CloseCode::UnsupportedData),
            Error::Compression(_) => Some(CloseCode::InternalError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_sizes() {
        let err = Error::FrameTooLarge {
            size: 70_000,
            max: 65_536,
        };
        assert_eq!(err.to_string(), "frame too large: 70000 bytes (max: 65536)");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(Error::from(io), Error::Io(_)));
    }

    #[test]
    fn close_codes_follow_propagation_policy() {
        assert_eq!(
            Error::Protocol("x").close_code(),
            Some(CloseCode::ProtocolError)
        );
        assert_eq!(
            Error::InvalidUtf8.close_code(),
            Some(CloseCode::InvalidPayload)
        );
        assert_eq!(
            Error::FrameTooLarge { size: 2, max: 1 }.close_code(),
            Some(CloseCode::MessageTooBig)
        );
        assert_eq!(
            Error::Compression("bad tail".into()).close_code(),
            Some(CloseCode::InternalError)
        );
        assert_eq!(Error::UnexpectedEof.close_code(), None);
        assert_eq!(
            Error::PeerClosed {
                code: CloseCode::Normal,
                reason: String::new()
            }
            .close_code(),
            None
        );
    }
}
