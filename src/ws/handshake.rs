//! Upgrade request validation and accept-key derivation (§4.6).
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{ParseError, WickError};
use crate::http::{Method, Request, Response};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept = base64(SHA1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Validates an upgrade request per §4.6 and returns the computed accept
/// key. `Sec-WebSocket-Protocol`/`-Extensions` are surfaced to the caller
/// but otherwise unused.
pub fn validate_handshake(request: &Request) -> Result<String, WickError> {
    if request.method != Method::Get {
        return Err(ParseError::InvalidFormat.into());
    }
    let upgrade = request.header("upgrade").unwrap_or("");
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(ParseError::InvalidFormat.into());
    }
    let connection = request.header("connection").unwrap_or("");
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(ParseError::InvalidFormat.into());
    }
    if request.header("sec-websocket-version") != Some("13") {
        return Err(ParseError::InvalidFormat.into());
    }
    let key = request
        .header("sec-websocket-key")
        .ok_or(ParseError::InvalidFormat)?;

    Ok(accept_key(key))
}

/// Builds the `101 Switching Protocols` response for a validated handshake.
pub fn build_101_response(accept: &str, protocol: Option<&str>, extensions: Option<&str>) -> Response {
    let mut resp = Response::new(101);
    resp.header("Upgrade", "websocket");
    resp.header("Connection", "Upgrade");
    resp.header("Sec-WebSocket-Accept", accept);
    resp.header("Sec-WebSocket-Version", "13");
    if let Some(protocol) = protocol {
        resp.header("Sec-WebSocket-Protocol", protocol);
    }
    if let Some(extensions) = extensions {
        resp.header("Sec-WebSocket-Extensions", extensions);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_the_rfc6455_example_accept_key() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn validates_a_well_formed_upgrade_request() {
        let mut req = Request::new(Method::Get, "/ws".to_string(), "HTTP/1.1".to_string());
        req.set_header("Upgrade", "websocket");
        req.set_header("Connection", "Upgrade");
        req.set_header("Sec-WebSocket-Version", "13");
        req.set_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        let accept = validate_handshake(&req).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_missing_upgrade_header() {
        let mut req = Request::new(Method::Get, "/ws".to_string(), "HTTP/1.1".to_string());
        req.set_header("Connection", "Upgrade");
        req.set_header("Sec-WebSocket-Version", "13");
        req.set_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        assert!(validate_handshake(&req).is_err());
    }

    #[test]
    fn build_101_response_includes_required_headers() {
        let resp = build_101_response("abc123", Some("chat"), None);
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols"));
        assert!(text.contains("Sec-WebSocket-Accept: abc123"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat"));
    }
}
