//! HTTP/1.1 upgrade handshake (RFC 6455 §4, server side).
//!
//! Parsing and response rendering are pure: the caller owns the socket and
//! decides how to transmit the rendered bytes and when to close.

use base64::Engine;
use chrono::Utc;
use sha1::{Digest, Sha1};

use crate::error::WsError;

/// RFC 6455 GUID appended to the client key before hashing.
const KEY_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// The client's `Sec-WebSocket-Key`, verbatim.
    pub key: String,
}

/// Compute `Sec-WebSocket-Accept` from a client key:
/// `base64(sha1(key || GUID))` per RFC 6455 §4.2.2.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(KEY_GUID);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Validate a complete HTTP/1.1 upgrade request (through `\r\n\r\n`).
///
/// Header names and token comparisons are case-insensitive. Failures carry
/// the HTTP status the server should answer with.
pub fn parse_upgrade(data: &[u8]) -> Result<UpgradeRequest, WsError> {
    let mut lines = data.split(|&b| b == b'\n').map(|l| l.strip_suffix(b"\r").unwrap_or(l));

    let request_line = lines.next().unwrap_or(b"");
    let mut tokens = request_line.split(|&b| b == b' ');
    let method = tokens.next().unwrap_or(b"");
    if method != b"GET" {
        return Err(WsError::handshake(405, "request method is not GET"));
    }
    if tokens.next().is_none_or(|uri| uri.is_empty()) {
        return Err(WsError::handshake(400, "request uri invalid"));
    }

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in lines {
        let Some(idx) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(&line[..idx]).trim().to_ascii_lowercase();
        let value = String::from_utf8_lossy(&line[idx + 1..]).trim().to_string();
        headers.push((name, value));
    }
    let header = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    };
    let header_is = |name: &str, token: &str| {
        header(name).is_some_and(|v| v.eq_ignore_ascii_case(token))
    };

    if !header_is("connection", "upgrade") {
        return Err(WsError::handshake(
            400,
            "'upgrade' token not found in 'Connection' header",
        ));
    }
    if !header_is("upgrade", "websocket") {
        return Err(WsError::handshake(
            400,
            "'websocket' token not found in 'Upgrade' header",
        ));
    }
    if !header_is("sec-websocket-version", "13") {
        return Err(WsError::handshake(
            400,
            "unsupported version: 13 not found in 'Sec-Websocket-Version' header",
        ));
    }

    match header("sec-websocket-key") {
        Some(key) if !key.trim().is_empty() => Ok(UpgradeRequest {
            key: key.to_string(),
        }),
        _ => Err(WsError::handshake(
            400,
            "'Sec-WebSocket-Key' header is missing or blank",
        )),
    }
}

/// Render the `101 Switching Protocols` response for a validated request.
pub fn accept_response(request: &UpgradeRequest) -> Vec<u8> {
    render_response(
        101,
        &[
            ("Connection", "upgrade".to_string()),
            ("Upgrade", "websocket".to_string()),
            ("Sec-WebSocket-Accept", accept_key(&request.key)),
        ],
        b"",
    )
}

/// Render the error response for a failed handshake. Any non-handshake
/// error maps to 400 with its display text as the body.
pub fn rejection_response(err: &WsError) -> Vec<u8> {
    let (status, reason) = match err {
        WsError::Handshake { status, reason } => (*status, reason.clone()),
        other => (400, other.to_string()),
    };
    render_response(
        status,
        &[
            ("Content-Type", "text/plain; charset=UTF-8".to_string()),
            ("X-Content-Type-Options", "nosniff".to_string()),
            ("Sec-Websocket-Version", "13".to_string()),
        ],
        reason.as_bytes(),
    )
}

fn render_response(status: u16, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status_text(status).as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"Content-Length: ");
    out.extend_from_slice(body.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(b"Date: ");
    out.extend_from_slice(
        Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
            .as_bytes(),
    );
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(body);
    out
}

fn status_text(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn rfc6455_sample_accept_key() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn sample_request_parses() {
        let request = parse_upgrade(SAMPLE_REQUEST).unwrap();
        assert_eq!(request.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn non_get_method_is_405() {
        let err = parse_upgrade(b"POST / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap_err();
        assert_eq!(
            err,
            WsError::Handshake {
                status: 405,
                reason: "request method is not GET".into()
            }
        );
    }

    #[test]
    fn missing_uri_is_400() {
        let err = parse_upgrade(b"GET\r\n\r\n").unwrap_err();
        assert!(matches!(err, WsError::Handshake { status: 400, .. }));
    }

    #[test]
    fn missing_connection_header_is_400() {
        let err = parse_upgrade(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap_err();
        let WsError::Handshake { status, reason } = err else {
            panic!("expected handshake error");
        };
        assert_eq!(status, 400);
        assert!(reason.contains("'Connection' header"));
    }

    #[test]
    fn blank_key_is_400() {
        let err = parse_upgrade(
            b"GET / HTTP/1.1\r\nConnection: upgrade\r\nUpgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key:   \r\n\r\n",
        )
        .unwrap_err();
        let WsError::Handshake { status, reason } = err else {
            panic!("expected handshake error");
        };
        assert_eq!(status, 400);
        assert!(reason.contains("Sec-WebSocket-Key"));
    }

    #[test]
    fn header_names_and_tokens_are_case_insensitive() {
        let request = parse_upgrade(
            b"GET / HTTP/1.1\r\nCONNECTION: UPGRADE\r\nupgrade: WebSocket\r\n\
              SEC-WEBSOCKET-VERSION: 13\r\nsec-websocket-key: abc123\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.key, "abc123");
    }

    #[test]
    fn accept_response_shape() {
        let request = UpgradeRequest {
            key: "dGhlIHNhbXBsZSBub25jZQ==".into(),
        };
        let response = String::from_utf8(accept_response(&request)).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Connection: upgrade\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.contains("Content-Length: 0\r\n"));
        assert!(response.contains("Date: "));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn rejection_response_carries_status_and_body() {
        let err = WsError::handshake(405, "request method is not GET");
        let response = String::from_utf8(rejection_response(&err)).unwrap();
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(response.contains("Content-Type: text/plain; charset=UTF-8\r\n"));
        assert!(response.contains("X-Content-Type-Options: nosniff\r\n"));
        assert!(response.contains("Sec-Websocket-Version: 13\r\n"));
        assert!(response.contains("Content-Length: 25\r\n"));
        assert!(response.ends_with("\r\n\r\nrequest method is not GET"));
    }
}
