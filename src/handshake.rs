//! HTTP upgrade handshake (RFC 6455 Section 4).
//!
//! Only the minimum of HTTP needed to switch protocols: parse a GET upgrade
//! request or a 101 response, compute the accept key, and emit the matching
//! head. The head is read byte by byte so no stream data past the blank line
//! is consumed; everything after it belongs to the frame layer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// GUID concatenated with the client key for `Sec-WebSocket-Accept`
/// (RFC 6455 Section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_HANDSHAKE_SIZE: usize = 8 * 1024;

/// Compute `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`:
/// `Base64(SHA-1(key + GUID))`.
///
/// ```
/// use ws_transport::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A random 16-byte `Sec-WebSocket-Key` for client handshakes.
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    if getrandom::getrandom(&mut nonce).is_err() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let fallback = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0x9E37_79B9);
        nonce.copy_from_slice(&fallback.to_le_bytes());
    }
    BASE64.encode(nonce)
}

/// A parsed client upgrade request.
#[derive(Debug)]
pub struct UpgradeRequest {
    /// Request path, including any query string.
    pub path: String,
    /// Headers in arrival order, names as sent.
    pub headers: Vec<(String, String)>,
    /// The client's `Sec-WebSocket-Key`.
    pub key: String,
}

impl UpgradeRequest {
    /// Read and validate an upgrade request from the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] for anything other than a well-formed
    /// `GET` with the websocket upgrade headers and version 13.
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let head = read_head(stream).await?;
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::Handshake("empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");
        let version = parts.next().unwrap_or("");
        if method != "GET" {
            return Err(Error::Handshake(format!("unexpected method {method:?}")));
        }
        if path.is_empty() || !version.starts_with("HTTP/1.1") {
            return Err(Error::Handshake("malformed request line".into()));
        }

        let headers = parse_headers(lines)?;
        require_token(&headers, "upgrade", "websocket")?;
        require_token(&headers, "connection", "upgrade")?;
        if find_header(&headers, "sec-websocket-version") != Some("13") {
            return Err(Error::Handshake("Sec-WebSocket-Version must be 13".into()));
        }
        let key = find_header(&headers, "sec-websocket-key")
            .ok_or_else(|| Error::Handshake("missing Sec-WebSocket-Key".into()))?
            .to_owned();

        Ok(Self {
            path: path.to_owned(),
            headers,
            key,
        })
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The `Sec-WebSocket-Extensions` offer, if present.
    #[must_use]
    pub fn extensions(&self) -> Option<&str> {
        self.header("sec-websocket-extensions")
    }
}

/// A parsed server response to an upgrade request.
#[derive(Debug)]
pub struct UpgradeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers in arrival order, names as sent.
    pub headers: Vec<(String, String)>,
}

impl UpgradeResponse {
    /// Read a response head from the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] on a malformed status line or headers.
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let head = read_head(stream).await?;
        let mut lines = head.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::Handshake("empty response".into()))?;
        let mut parts = status_line.split_whitespace();
        let version = parts.next().unwrap_or("");
        let status: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Handshake("malformed status line".into()))?;
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::Handshake("malformed status line".into()));
        }

        Ok(Self {
            status,
            headers: parse_headers(lines)?,
        })
    }

    /// Validate a 101 upgrade against the key we sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] for a non-101 status, missing upgrade
    /// headers, or an accept key mismatch.
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.status != 101 {
            return Err(Error::Handshake(format!(
                "expected 101 Switching Protocols, got {}",
                self.status
            )));
        }
        require_token(&self.headers, "upgrade", "websocket")?;
        require_token(&self.headers, "connection", "upgrade")?;
        let accept = find_header(&self.headers, "sec-websocket-accept")
            .ok_or_else(|| Error::Handshake("missing Sec-WebSocket-Accept".into()))?;
        if accept != compute_accept_key(key) {
            return Err(Error::Handshake("Sec-WebSocket-Accept mismatch".into()));
        }
        Ok(())
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The negotiated `Sec-WebSocket-Extensions`, if any.
    #[must_use]
    pub fn extensions(&self) -> Option<&str> {
        self.header("sec-websocket-extensions")
    }
}

/// The 101 response head accepting an upgrade, with an optional negotiated
/// extensions header.
#[must_use]
pub fn accept_response(key: &str, extensions: Option<&str>) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        compute_accept_key(key)
    );
    if let Some(extensions) = extensions {
        response.push_str("Sec-WebSocket-Extensions: ");
        response.push_str(extensions);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");
    response
}

/// A minimal rejection head for failed upgrades.
#[must_use]
pub fn reject_response(status: u16, reason: &str) -> String {
    format!("HTTP/1.1 {status} {reason}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
}

/// The client upgrade request head.
#[must_use]
pub fn client_request(host: &str, path: &str, key: &str, extensions: Option<&str>) -> String {
    let mut request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    if let Some(extensions) = extensions {
        request.push_str("Sec-WebSocket-Extensions: ");
        request.push_str(extensions);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}

/// Read the head up to and including the blank line, one byte at a time so
/// nothing past it is consumed.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut head = Vec::with_capacity(256);
    loop {
        let byte = stream.read_u8().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Handshake("stream ended inside handshake".into())
            } else {
                Error::Io(e)
            }
        })?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_HANDSHAKE_SIZE {
            return Err(Error::Handshake("handshake head too large".into()));
        }
    }
    String::from_utf8(head).map_err(|_| Error::Handshake("handshake head is not UTF-8".into()))
}

fn parse_headers<'a, I>(lines: I) -> Result<Vec<(String, String)>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Handshake("malformed header line".into()))?;
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }
    Ok(headers)
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Require `header` to contain `token` in its comma-separated value list.
fn require_token(headers: &[(String, String)], header: &str, token: &str) -> Result<()> {
    let value = find_header(headers, header)
        .ok_or_else(|| Error::Handshake(format!("missing {header} header")))?;
    if value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
    {
        Ok(())
    } else {
        Err(Error::Handshake(format!("{header} header lacks {token:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_distinct_base64() {
        let a = generate_key();
        let b = generate_key();
        assert_ne!(a, b);
        assert_eq!(BASE64.decode(&a).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn parses_wellformed_request() {
        let head = "GET /chat?room=1 HTTP/1.1\r\n\
                    Host: example.test\r\n\
                    Upgrade: websocket\r\n\
                    Connection: keep-alive, Upgrade\r\n\
                    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                    Sec-WebSocket-Version: 13\r\n\r\n";
        let mut bytes = head.as_bytes();
        let request = UpgradeRequest::read(&mut bytes).await.unwrap();
        assert_eq!(request.path, "/chat?room=1");
        assert_eq!(request.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(request.header("host"), Some("example.test"));
        assert!(bytes.is_empty(), "nothing past the head is consumed");
    }

    #[tokio::test]
    async fn leaves_frame_bytes_untouched() {
        let mut data = b"GET / HTTP/1.1\r\n\
                    Upgrade: websocket\r\n\
                    Connection: Upgrade\r\n\
                    Sec-WebSocket-Key: abc\r\n\
                    Sec-WebSocket-Version: 13\r\n\r\n\x81\x05hello"
            .as_slice();
        UpgradeRequest::read(&mut data).await.unwrap();
        assert_eq!(data, b"\x81\x05hello");
    }

    #[tokio::test]
    async fn rejects_wrong_method_and_version() {
        let post = "POST / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert!(matches!(
            UpgradeRequest::read(&mut post.as_bytes()).await,
            Err(Error::Handshake(_))
        ));

        let old = "GET / HTTP/1.1\r\n\
                   Upgrade: websocket\r\n\
                   Connection: Upgrade\r\n\
                   Sec-WebSocket-Key: abc\r\n\
                   Sec-WebSocket-Version: 8\r\n\r\n";
        assert!(matches!(
            UpgradeRequest::read(&mut old.as_bytes()).await,
            Err(Error::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn rejects_missing_upgrade_header() {
        let head = "GET / HTTP/1.1\r\n\
                    Connection: Upgrade\r\n\
                    Sec-WebSocket-Key: abc\r\n\
                    Sec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(
            UpgradeRequest::read(&mut head.as_bytes()).await,
            Err(Error::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn response_validation_checks_accept_key() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let head = accept_response(key, None);
        let response = UpgradeResponse::read(&mut head.as_bytes()).await.unwrap();
        response.validate(key).unwrap();
        assert!(matches!(
            response.validate("someotherkey0123456789ab"),
            Err(Error::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn response_carries_negotiated_extensions() {
        let head = accept_response("abc", Some("permessage-deflate; server_no_context_takeover"));
        let response = UpgradeResponse::read(&mut head.as_bytes()).await.unwrap();
        assert_eq!(
            response.extensions(),
            Some("permessage-deflate; server_no_context_takeover")
        );
    }

    #[tokio::test]
    async fn non_101_status_rejected() {
        let head = reject_response(404, "Not Found");
        let response = UpgradeResponse::read(&mut head.as_bytes()).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(matches!(response.validate("abc"), Err(Error::Handshake(_))));
    }

    #[test]
    fn client_request_includes_offer() {
        let head = client_request("example.test:80", "/ws", "key123", Some("permessage-deflate"));
        assert!(head.starts_with("GET /ws HTTP/1.1\r\n"));
        assert!(head.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn oversized_head_rejected() {
        let mut head = String::from("GET / HTTP/1.1\r\n");
        head.push_str(&"X-Filler: padding\r\n".repeat(1000));
        head.push_str("\r\n");
        assert!(matches!(
            UpgradeRequest::read(&mut head.as_bytes()).await,
            Err(Error::Handshake(_))
        ));
    }
}
