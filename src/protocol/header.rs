//! Frame header codec (RFC 6455 Section 5.2).
//!
//! Headers are 2 to 14 bytes on the wire:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK set)                     |
//! +---------------------------------------------------------------+
//! ```
//!
//! Both operations are pure with respect to connection state; role-dependent
//! validation (mask presence, size limits) lives in the frame reader.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::protocol::opcode::OpCode;

/// Largest possible encoded header: 2 fixed + 8 length + 4 mask bytes.
pub const MAX_HEADER_SIZE: usize = 14;

/// Control frames carry at most this many payload bytes.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

const FIN_BIT: u8 = 0x80;
const RSV1_BIT: u8 = 0x40;
const RSV2_BIT: u8 = 0x20;
const RSV3_BIT: u8 = 0x10;
const MASK_BIT: u8 = 0x80;

/// A parsed WebSocket frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of the message.
    pub fin: bool,
    /// Per-message compression bit when `permessage-deflate` is negotiated.
    pub rsv1: bool,
    /// Reserved, must be zero.
    pub rsv2: bool,
    /// Reserved, must be zero.
    pub rsv3: bool,
    /// Frame op_code.
    pub op_code: OpCode,
    /// Whether the payload is masked; `mask` is meaningful iff set.
    pub masked: bool,
    /// Payload length in bytes (63-bit non-negative).
    pub length: u64,
    /// Masking key.
    pub mask: [u8; 4],
}

impl FrameHeader {
    /// A final unfragmented data/control header with no extension bits.
    #[must_use]
    pub fn new(op_code: OpCode, length: u64) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            op_code,
            masked: false,
            length,
            mask: [0; 4],
        }
    }

    /// Read a header from the stream: 2 fixed bytes, then 0/2/8 extended
    /// length bytes, then 4 mask bytes if the MASK bit is set.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedEof`] if the stream ends inside the header
    /// - [`Error::ReservedOpCode`] for op_codes 0x3-0x7 and 0xB-0xF
    /// - [`Error::HeaderLengthMsb`] if the 64-bit length has its MSB set
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Self> {
        let mut fixed = [0u8; 2];
        read_full(stream, &mut fixed).await?;

        let fin = fixed[0] & FIN_BIT != 0;
        let rsv1 = fixed[0] & RSV1_BIT != 0;
        let rsv2 = fixed[0] & RSV2_BIT != 0;
        let rsv3 = fixed[0] & RSV3_BIT != 0;
        let op_code = OpCode::from_u8(fixed[0] & 0x0F)?;
        let masked = fixed[1] & MASK_BIT != 0;

        let length = match fixed[1] & 0x7F {
            len @ 0..=125 => u64::from(len),
            126 => {
                let mut ext = [0u8; 2];
                read_full(stream, &mut ext).await?;
                u64::from(u16::from_be_bytes(ext))
            }
            _ => {
                let mut ext = [0u8; 8];
                read_full(stream, &mut ext).await?;
                if ext[0] & 0x80 != 0 {
                    return Err(Error::HeaderLengthMsb);
                }
                u64::from_be_bytes(ext)
            }
        };

        let mut mask = [0u8; 4];
        if masked {
            read_full(stream, &mut mask).await?;
        }

        Ok(Self {
            fin,
            rsv1,
            rsv2,
            rsv3,
            op_code,
            masked,
            length,
            mask,
        })
    }

    /// Pack this header into `buf`, returning the number of bytes written.
    ///
    /// `buf` must hold at least [`MAX_HEADER_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HeaderLengthUnexpected`] if `length` does not fit the
    /// 63-bit wire representation.
    pub fn write(&self, buf: &mut [u8]) -> Result<usize> {
        const LEN7: u64 = 125;
        const LEN16: u64 = u16::MAX as u64;
        const LEN63: u64 = u64::MAX >> 1;

        let mut byte0 = self.op_code.as_u8();
        if self.fin {
            byte0 |= FIN_BIT;
        }
        if self.rsv1 {
            byte0 |= RSV1_BIT;
        }
        if self.rsv2 {
            byte0 |= RSV2_BIT;
        }
        if self.rsv3 {
            byte0 |= RSV3_BIT;
        }
        buf[0] = byte0;

        let mut n = match self.length {
            len @ 0..=LEN7 => {
                buf[1] = len as u8;
                2
            }
            len @ 126..=LEN16 => {
                buf[1] = 126;
                buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                4
            }
            len @ 65_536..=LEN63 => {
                buf[1] = 127;
                buf[2..10].copy_from_slice(&len.to_be_bytes());
                10
            }
            _ => return Err(Error::HeaderLengthUnexpected),
        };

        if self.masked {
            buf[1] |= MASK_BIT;
            buf[n..n + 4].copy_from_slice(&self.mask);
            n += 4;
        }

        Ok(n)
    }

    /// Encoded size of this header in bytes.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        let ext = if self.length <= 125 {
            0
        } else if self.length <= u64::from(u16::MAX) {
            2
        } else {
            8
        };
        2 + ext + if self.masked { 4 } else { 0 }
    }
}

async fn read_full<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::Io(e)
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(bytes: &[u8]) -> Result<FrameHeader> {
        let mut cursor = bytes;
        FrameHeader::read(&mut cursor).await
    }

    fn roundtrip(header: FrameHeader) {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        let n = header.write(&mut buf).unwrap();
        assert_eq!(n, header.wire_size());
        let parsed = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(parse(&buf[..n]));
        assert_eq!(parsed.unwrap(), header);
    }

    #[tokio::test]
    async fn short_length() {
        let header = parse(&[0x81, 0x05, 0, 0, 0, 0, 0]).await.unwrap();
        assert!(header.fin);
        assert_eq!(header.op_code, OpCode::Text);
        assert!(!header.masked);
        assert_eq!(header.length, 5);
    }

    #[tokio::test]
    async fn extended_16bit_length() {
        let header = parse(&[0x82, 0x7e, 0x01, 0x00]).await.unwrap();
        assert_eq!(header.op_code, OpCode::Binary);
        assert_eq!(header.length, 256);
    }

    #[tokio::test]
    async fn extended_64bit_length() {
        let mut bytes = vec![0x82, 0x7f];
        bytes.extend_from_slice(&70_000u64.to_be_bytes());
        let header = parse(&bytes).await.unwrap();
        assert_eq!(header.length, 70_000);
    }

    #[tokio::test]
    async fn msb_set_rejected() {
        let mut bytes = vec![0x82, 0x7f];
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(parse(&bytes).await, Err(Error::HeaderLengthMsb)));
    }

    #[tokio::test]
    async fn mask_key_extracted() {
        let header = parse(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d]).await.unwrap();
        assert!(header.masked);
        assert_eq!(header.mask, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(header.length, 5);
    }

    #[tokio::test]
    async fn truncated_header_is_unexpected_eof() {
        assert!(matches!(parse(&[0x81]).await, Err(Error::UnexpectedEof)));
        assert!(matches!(
            parse(&[0x82, 0x7e, 0x01]).await,
            Err(Error::UnexpectedEof)
        ));
        assert!(matches!(
            parse(&[0x81, 0x85, 0x37, 0xfa]).await,
            Err(Error::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn reserved_opcode_rejected() {
        assert!(matches!(
            parse(&[0x83, 0x00]).await,
            Err(Error::ReservedOpCode(0x3))
        ));
    }

    #[test]
    fn boundary_lengths_roundtrip() {
        for length in [0, 1, 125, 126, 65_535, 65_536, 70_000] {
            roundtrip(FrameHeader::new(OpCode::Binary, length));
        }
    }

    #[test]
    fn boundary_length_encodings() {
        let sizes = [(125, 2), (126, 4), (65_535, 4), (65_536, 10)];
        for (length, expect) in sizes {
            let mut buf = [0u8; MAX_HEADER_SIZE];
            let n = FrameHeader::new(OpCode::Binary, length).write(&mut buf).unwrap();
            assert_eq!(n, expect, "length={length}");
        }
    }

    #[test]
    fn masked_header_roundtrips() {
        let mut header = FrameHeader::new(OpCode::Text, 300);
        header.masked = true;
        header.mask = [9, 8, 7, 6];
        header.rsv1 = true;
        roundtrip(header);
    }

    #[test]
    fn overlong_length_rejected_on_write() {
        let header = FrameHeader::new(OpCode::Binary, u64::MAX);
        let mut buf = [0u8; MAX_HEADER_SIZE];
        assert!(matches!(
            header.write(&mut buf),
            Err(Error::HeaderLengthUnexpected)
        ));
    }
}
