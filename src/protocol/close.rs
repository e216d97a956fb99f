//! Close frame status codes and payload rules (RFC 6455 Section 7).

use crate::error::{Error, Result};

/// A close frame payload is a 2-byte status code plus at most this many
/// bytes of UTF-8 reason text (125 control-frame bytes minus the code).
pub const MAX_REASON_LEN: usize = 123;

/// Close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 1001: endpoint is going away.
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: received a data type the endpoint cannot accept.
    UnsupportedData,
    /// 1005: no status code was present in the close frame. Synthesized
    /// locally for empty close payloads, never sent on the wire.
    NoStatusReceived,
    /// 1007: message payload inconsistent with its type (e.g. non-UTF-8 text).
    InvalidPayload,
    /// 1008: message violates endpoint policy.
    PolicyViolation,
    /// 1009: message too big to process.
    MessageTooBig,
    /// 1011: unexpected condition on the endpoint.
    InternalError,
    /// Any other registered (1012-1014) or private-use (3000-4999) code.
    Other(u16),
}

impl CloseCode {
    /// Map a wire value onto a `CloseCode`.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// The wire value of this code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }

    /// Whether this code may legally appear inside a close frame on the wire
    /// (RFC 6455 Section 7.4). 1004-1006 and 1015 are reserved for local use.
    #[must_use]
    pub const fn valid_on_wire(self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Parse a close frame payload into its status code and reason.
///
/// An empty payload yields `NoStatusReceived` with an empty reason.
///
/// # Errors
///
/// - [`Error::Protocol`] for a 1-byte payload or a code that must not appear
///   on the wire
/// - [`Error::InvalidUtf8`] if the reason is not valid UTF-8
pub fn parse_close_payload(payload: &[u8]) -> Result<(CloseCode, String)> {
    if payload.is_empty() {
        return Ok((CloseCode::NoStatusReceived, String::new()));
    }
    if payload.len() == 1 {
        return Err(Error::Protocol("close payload of a single byte"));
    }

    let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
    if !code.valid_on_wire() {
        return Err(Error::Protocol("close code not allowed on the wire"));
    }

    let reason = std::str::from_utf8(&payload[2..]).map_err(|_| Error::InvalidUtf8)?;
    Ok((code, reason.to_owned()))
}

/// Build a close frame payload: 2-byte big-endian code followed by the
/// reason, truncated to [`MAX_REASON_LEN`] bytes at a character boundary.
///
/// `NoStatusReceived` produces an empty payload.
#[must_use]
pub fn encode_close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    if code == CloseCode::NoStatusReceived {
        return Vec::new();
    }

    let mut cut = reason.len().min(MAX_REASON_LEN);
    while !reason.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut payload = Vec::with_capacity(2 + cut);
    payload.extend_from_slice(&code.as_u16().to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..cut]);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for code in [1000, 1001, 1002, 1003, 1007, 1008, 1009, 1011, 3000, 4999] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }

    #[test]
    fn empty_payload_means_no_status() {
        let (code, reason) = parse_close_payload(&[]).unwrap();
        assert_eq!(code, CloseCode::NoStatusReceived);
        assert!(reason.is_empty());
    }

    #[test]
    fn single_byte_payload_rejected() {
        assert!(matches!(
            parse_close_payload(&[0x03]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn reserved_codes_rejected() {
        for code in [0u16, 999, 1004, 1005, 1006, 1015, 2999] {
            let payload = code.to_be_bytes();
            assert!(
                matches!(parse_close_payload(&payload), Err(Error::Protocol(_))),
                "code={code}"
            );
        }
    }

    #[test]
    fn reason_must_be_utf8() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        assert!(matches!(
            parse_close_payload(&payload),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn parse_code_and_reason() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"going home");
        let (code, reason) = parse_close_payload(&payload).unwrap();
        assert_eq!(code, CloseCode::Normal);
        assert_eq!(reason, "going home");
    }

    #[test]
    fn encode_truncates_reason() {
        let long = "x".repeat(200);
        let payload = encode_close_payload(CloseCode::Normal, &long);
        assert_eq!(payload.len(), 2 + MAX_REASON_LEN);
    }

    #[test]
    fn encode_truncates_at_char_boundary() {
        // 62 two-byte characters: 124 bytes, one past the cap.
        let reason = "é".repeat(62);
        let payload = encode_close_payload(CloseCode::Normal, &reason);
        assert!(payload.len() <= 2 + MAX_REASON_LEN);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }

    #[test]
    fn no_status_encodes_empty() {
        assert!(encode_close_payload(CloseCode::NoStatusReceived, "ignored").is_empty());
    }
}
