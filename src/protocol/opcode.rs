//! WebSocket frame op_codes as defined in RFC 6455.

use crate::error::{Error, Result};

/// WebSocket frame op_code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame (0x0), only valid inside a fragmented sequence.
    Continuation = 0x0,
    /// Text frame (0x1). Payload must be valid UTF-8.
    Text = 0x1,
    /// Binary frame (0x2).
    Binary = 0x2,
    /// Close frame (0x8).
    Close = 0x8,
    /// Ping frame (0x9).
    Ping = 0x9,
    /// Pong frame (0xA).
    Pong = 0xA,
}

impl OpCode {
    /// Create an `OpCode` from its wire value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedOpCode`] for 0x3-0x7 and 0xB-0xF.
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::ReservedOpCode(other)),
        }
    }

    /// The wire value of this op_code.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Control frames: Close, Ping, Pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.as_u8() >= 0x8
    }

    /// Data frames: Continuation, Text, Binary.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpCode::Continuation => "Continuation",
            OpCode::Text => "Text",
            OpCode::Binary => "Binary",
            OpCode::Close => "Close",
            OpCode::Ping => "Ping",
            OpCode::Pong => "Pong",
        };
        f.write_str(name)
    }
}

/// Set of data op_codes a reader surfaces to its caller.
///
/// Frames whose op_code is not in the mask are discarded with a close frame
/// carrying status 1003. Control frames bypass the mask entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpMask(u8);

impl OpMask {
    /// Accept text messages only.
    pub const TEXT: OpMask = OpMask(1 << OpCode::Text as u8);
    /// Accept binary messages only.
    pub const BINARY: OpMask = OpMask(1 << OpCode::Binary as u8);
    /// Accept both text and binary messages.
    pub const ALL: OpMask = OpMask(Self::TEXT.0 | Self::BINARY.0);

    /// The mask accepting exactly one data op_code. Control op_codes have no
    /// accept bit; they are always handled internally.
    #[must_use]
    pub const fn only(op: OpCode) -> Self {
        if op.is_control() {
            OpMask(0)
        } else {
            OpMask(1 << op.as_u8())
        }
    }

    /// Whether `op` is surfaced to readers.
    #[inline]
    #[must_use]
    pub const fn accepts(self, op: OpCode) -> bool {
        !op.is_control() && self.0 & (1 << op.as_u8()) != 0
    }
}
