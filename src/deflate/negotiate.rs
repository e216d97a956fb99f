//! `permessage-deflate` negotiation (RFC 7692 Section 7).
//!
//! Parses `Sec-WebSocket-Extensions` offers/responses into [`DeflateParams`]
//! and derives the per-connection context-takeover policy from them.

use crate::transport::Role;

/// Extension token in `Sec-WebSocket-Extensions`.
pub const EXTENSION_NAME: &str = "permessage-deflate";

/// Negotiated `permessage-deflate` parameters for one connection.
///
/// `enabled` is false unless the handshake actually carried the extension;
/// compression must never be used without it, regardless of the global
/// option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeflateParams {
    /// The extension was negotiated on this connection.
    pub enabled: bool,
    /// Client must discard its compression window after each message.
    pub client_no_context_takeover: bool,
    /// Server must discard its compression window after each message.
    pub server_no_context_takeover: bool,
    /// Client's LZ77 window bound, when offered with a value.
    pub client_max_window_bits: Option<u8>,
    /// Server's LZ77 window bound, when offered with a value.
    pub server_max_window_bits: Option<u8>,
}

impl DeflateParams {
    /// Parse a `Sec-WebSocket-Extensions` header value.
    ///
    /// Only the first `permessage-deflate` occurrence is considered.
    /// Parameters without values set flags; numeric values parse as base-10
    /// integers; non-numeric values are ignored silently.
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut params = Self::default();

        for offer in header.split(',') {
            let mut tokens = offer.split(';');
            let name = tokens.next().unwrap_or("").trim();
            if name != EXTENSION_NAME {
                continue;
            }

            params.enabled = true;
            for token in tokens {
                let (key, value) = match token.split_once('=') {
                    Some((k, v)) => (k.trim(), Some(v.trim().trim_matches('"'))),
                    None => (token.trim(), None),
                };
                match key {
                    "client_no_context_takeover" => params.client_no_context_takeover = true,
                    "server_no_context_takeover" => params.server_no_context_takeover = true,
                    "client_max_window_bits" => {
                        if let Some(bits) = value.and_then(parse_window_bits) {
                            params.client_max_window_bits = Some(bits);
                        }
                    }
                    "server_max_window_bits" => {
                        if let Some(bits) = value.and_then(parse_window_bits) {
                            params.server_max_window_bits = Some(bits);
                        }
                    }
                    _ => {}
                }
            }
            // First occurrence wins.
            break;
        }

        params
    }

    /// The offer a client sends when compression is enabled.
    #[must_use]
    pub fn offer() -> &'static str {
        EXTENSION_NAME
    }

    /// The `Sec-WebSocket-Extensions` response value accepting this offer.
    ///
    /// Returns `None` when the extension was not negotiated.
    #[must_use]
    pub fn response(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let mut value = String::from(EXTENSION_NAME);
        if self.client_no_context_takeover {
            value.push_str("; client_no_context_takeover");
        }
        if self.server_no_context_takeover {
            value.push_str("; server_no_context_takeover");
        }
        if let Some(bits) = self.client_max_window_bits {
            value.push_str(&format!("; client_max_window_bits={bits}"));
        }
        if let Some(bits) = self.server_max_window_bits {
            value.push_str(&format!("; server_max_window_bits={bits}"));
        }
        Some(value)
    }

    /// Whether the *peer* (the side sending us compressed messages) must
    /// discard its window after each message. When false, a persistent
    /// inflater is kept for the connection.
    #[must_use]
    pub fn peer_no_context_takeover(&self, role: Role) -> bool {
        match role {
            Role::Server => self.client_no_context_takeover,
            Role::Client => self.server_no_context_takeover,
        }
    }

    /// Whether *our* side must discard its window after each message. When
    /// false, a persistent deflater is kept for the connection.
    #[must_use]
    pub fn our_no_context_takeover(&self, role: Role) -> bool {
        match role {
            Role::Server => self.server_no_context_takeover,
            Role::Client => self.client_no_context_takeover,
        }
    }

    /// The window bound constraining our deflater, if one was negotiated.
    #[must_use]
    pub fn our_max_window_bits(&self, role: Role) -> Option<u8> {
        match role {
            Role::Server => self.server_max_window_bits,
            Role::Client => self.client_max_window_bits,
        }
    }
}

fn parse_window_bits(value: &str) -> Option<u8> {
    let bits: u8 = value.parse().ok()?;
    (8..=15).contains(&bits).then_some(bits)
}
