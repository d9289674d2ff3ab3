//! Byte-level request-line and header parsing (§4.1).
use crate::error::ParseError;
use crate::http::method::Method;
use crate::http::request::Request;
use crate::util::find_bytes;

/// Header block larger than this is rejected outright rather than buffered
/// indefinitely waiting for a terminator that may never arrive.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Cap on a non-multipart body read via `Content-Length` (§4.1 step 6).
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Result of splitting the header block from the rest of the buffer.
pub struct ParsedHead {
    pub request: Request,
    /// Byte offset into the original buffer where the body begins.
    pub body_offset: usize,
    pub content_length: Option<usize>,
    pub multipart_boundary: Option<String>,
}

/// Parses the request line and header block out of `buf`, which may contain
/// more bytes after the terminator (body bytes already read ahead).
///
/// Accepts `\r\n\r\n` as the header terminator and tolerates a bare `\n\n`
/// (§4.1 step 1), matching the teacher's permissive line splitting.
pub fn parse_head(buf: &[u8]) -> Result<ParsedHead, ParseError> {
    let (header_end, terminator_len) = match find_bytes(buf, b"\r\n\r\n") {
        Some(idx) => (idx, 4),
        None => match find_bytes(buf, b"\n\n") {
            Some(idx) => (idx, 2),
            None => {
                if buf.len() > MAX_HEADER_BYTES {
                    return Err(ParseError::TooLarge);
                }
                return Err(ParseError::Incomplete);
            }
        },
    };
    if header_end > MAX_HEADER_BYTES {
        return Err(ParseError::TooLarge);
    }

    let head = &buf[..header_end];
    let mut lines = split_lines(head);
    let request_line = lines.next().ok_or(ParseError::InvalidFormat)?;
    let (method, path, query_raw, proto) = parse_request_line(request_line)?;

    let mut request = Request::new(method, path, proto);
    for raw_query_pair in query_raw.split('&').filter(|s| !s.is_empty()) {
        let (name, value) = match raw_query_pair.split_once('=') {
            Some((n, v)) => (n, v),
            None => (raw_query_pair, ""),
        };
        request.set_query(percent_decode(name), percent_decode(value));
    }

    let mut content_length = None;
    for line in lines {
        let line = strip_trailing_cr(line);
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidFormat)?;
        let name = name.trim();
        let value = value.trim();
        request.set_header(name, value);
        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(value.parse::<usize>().map_err(|_| ParseError::InvalidFormat)?);
        }
    }

    let multipart_boundary = request
        .header("content-type")
        .and_then(|ct| multipart_boundary(ct));

    if let Some(len) = content_length {
        if len > MAX_BODY_BYTES {
            return Err(ParseError::TooLarge);
        }
    }

    Ok(ParsedHead {
        request,
        body_offset: header_end + terminator_len,
        content_length,
        multipart_boundary,
    })
}

fn parse_request_line(line: &str) -> Result<(Method, String, String, String), ParseError> {
    let line = strip_trailing_cr(line);
    let mut parts = line.split(' ');
    let method_token = parts.next().ok_or(ParseError::InvalidFormat)?;
    let target = parts.next().ok_or(ParseError::InvalidFormat)?;
    let proto = parts.next().ok_or(ParseError::InvalidFormat)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidFormat);
    }

    let method = Method::from_bytes(method_token.as_bytes()).ok_or(ParseError::UnsupportedMethod)?;

    let (raw_path, raw_query) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };
    let decoded_path = percent_decode(raw_path);
    if path_has_traversal(&decoded_path) {
        return Err(ParseError::PathTraversal);
    }

    Ok((method, decoded_path, raw_query.to_string(), proto.to_string()))
}

fn path_has_traversal(path: &str) -> bool {
    path.split('/').any(|segment| segment == "..")
}

fn split_lines(buf: &[u8]) -> impl Iterator<Item = &str> {
    buf.split(|&b| b == b'\n').filter_map(|line| std::str::from_utf8(line).ok())
}

fn strip_trailing_cr(s: &str) -> &str {
    s.strip_suffix('\r').unwrap_or(s)
}

/// Percent-decodes a path or query component. Invalid escapes pass through
/// verbatim rather than failing the whole request.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    if !lower.starts_with("multipart/form-data") {
        return None;
    }
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_with_query() {
        let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let parsed = parse_head(raw).unwrap();
        assert_eq!(parsed.request.path, "/hello");
        assert_eq!(parsed.request.query("name"), Some("world"));
        assert_eq!(parsed.request.header("host"), Some("localhost"));
        assert_eq!(parsed.body_offset, raw.len());
    }

    #[test]
    fn rejects_path_traversal() {
        let raw = b"GET /../../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(matches!(parse_head(raw), Err(ParseError::PathTraversal)));
    }

    #[test]
    fn rejects_unsupported_method() {
        let raw = b"TRACE / HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_head(raw), Err(ParseError::UnsupportedMethod)));
    }

    #[test]
    fn incomplete_head_is_retried() {
        let raw = b"GET / HTTP/1.1\r\nHost: x";
        assert!(matches!(parse_head(raw), Err(ParseError::Incomplete)));
    }

    #[test]
    fn detects_content_length_and_multipart_boundary() {
        let raw = b"POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XYZ\r\nContent-Length: 10\r\n\r\n";
        let parsed = parse_head(raw).unwrap();
        assert_eq!(parsed.content_length, Some(10));
        assert_eq!(parsed.multipart_boundary.as_deref(), Some("XYZ"));
    }

    #[test]
    fn percent_decode_handles_plus_and_hex() {
        assert_eq!(percent_decode("a+b%20c"), "a b c");
    }
}
