use std::time::SystemTime;

/// A `Set-Cookie` entry (§3).
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }

    fn serialize(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={}", domain));
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out.push_str(&format!("; SameSite={}", self.same_site.as_str()));
        out
    }
}

/// Returns the canonical `First-Letter-Upper` casing of a header name (§3 invariant b).
fn canonicalize(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A mutable HTTP response builder (§3, §4.3).
///
/// Default security headers are applied in the constructor and can be
/// overridden by later [`Response::header`] calls, compared under
/// canonicalized casing, matching the teacher's mutable-builder shape.
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    pub body: String,
}

impl Response {
    pub fn new(status: u16) -> Self {
        let mut resp = Self {
            status,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: String::new(),
        };
        resp.header("Server", "wick");
        resp.header("Date", &httpdate::fmt_http_date(SystemTime::now()));
        resp.header("X-Content-Type-Options", "nosniff");
        resp.header("X-Frame-Options", "DENY");
        resp.header("X-XSS-Protection", "1; mode=block");
        resp
    }

    pub fn ok(body: impl Into<String>) -> Self {
        let mut resp = Self::new(200);
        resp.body = body.into();
        resp
    }

    pub fn not_found() -> Self {
        let mut resp = Self::new(404);
        resp.body = "404 Not Found".to_string();
        resp
    }

    /// Serializes `value` with `serde_json` and wraps it as a JSON response.
    /// A serialization failure (only reachable via a hand-written
    /// `Serialize` impl that errors) falls back to a 500.
    pub fn json(status: u16, value: &impl serde::Serialize) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => {
                let mut resp = Self::new(status);
                resp.body = body;
                resp.header("Content-Type", "application/json");
                resp
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize json response body");
                let mut resp = Self::new(500);
                resp.body = "{\"error\":\"failed to serialize response\"}".to_string();
                resp.header("Content-Type", "application/json");
                resp
            }
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut resp = Self::new(status);
        resp.body = body.into();
        resp.header("Content-Type", "text/plain; charset=utf-8");
        resp
    }

    /// Sets (overriding, canonicalized-case-insensitively) a header.
    /// `Content-Length` may not be set directly — the writer computes it.
    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let canonical = canonicalize(name);
        if canonical.eq_ignore_ascii_case("Content-Length") {
            tracing::warn!("ignoring explicit Content-Length; the writer computes it");
            return self;
        }
        if let Some(existing) = self.headers.iter_mut().find(|(n, _)| n == &canonical) {
            existing.1 = value.into();
        } else {
            self.headers.push((canonical, value.into()));
        }
        self
    }

    pub fn set_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.push(cookie);
        self
    }

    fn has_header(&self, name: &str) -> bool {
        let canonical = canonicalize(name);
        self.headers.iter().any(|(n, _)| n == &canonical)
    }

    /// Copies `prior`'s headers and cookies onto `self`, skipping any header
    /// name `self` already sets. Used to carry a pre-filter's or
    /// middleware's mutations into a response a handler built from scratch
    /// (§5 pre-filter contract: "a pure function of Request returning a
    /// boolean plus mutations to Response").
    pub fn absorb_from(&mut self, prior: &Response) {
        for (name, value) in &prior.headers {
            if !self.has_header(name) {
                self.header(name, value.clone());
            }
        }
        self.cookies.splice(0..0, prior.cookies.iter().cloned());
    }

    /// Serializes the response into the bytes written to the socket (§4.3).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            reason_phrase(self.status)
        ));
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        for cookie in &self.cookies {
            out.push_str(&format!("Set-Cookie: {}\r\n", cookie.serialize()));
        }
        let body_len = self.body.as_bytes().len();
        if body_len > 0 {
            out.push_str(&format!("Content-Length: {}\r\n", body_len));
        }
        out.push_str("Connection: close\r\n");
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_serializes_the_given_value() {
        #[derive(serde::Serialize)]
        struct Greeting {
            message: &'static str,
        }
        let resp = Response::json(200, &Greeting { message: "hi" });
        assert_eq!(resp.body, "{\"message\":\"hi\"}");
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Content-Type: application/json"));
    }

    #[test]
    fn default_headers_are_present() {
        let resp = Response::ok("hi");
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("X-Content-Type-Options: nosniff"));
        assert!(text.contains("X-Frame-Options: DENY"));
        assert!(text.contains("Connection: close"));
        assert!(text.contains("Content-Length: 2"));
    }

    #[test]
    fn header_override_is_canonicalized_case_insensitive() {
        let mut resp = Response::ok("");
        resp.header("x-frame-options", "SAMEORIGIN");
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("X-Frame-Options: SAMEORIGIN"));
        assert!(!text.contains("X-Frame-Options: DENY"));
    }

    #[test]
    fn content_length_cannot_be_set_directly() {
        let mut resp = Response::ok("hello");
        resp.header("Content-Length", "999");
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Content-Length: 5"));
        assert!(!text.contains("Content-Length: 999"));
    }

    #[test]
    fn cookie_default_attributes() {
        let mut resp = Response::ok("");
        resp.set_cookie(Cookie::new("session", "abc123"));
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Set-Cookie: session=abc123; HttpOnly; SameSite=Lax"));
    }

    #[test]
    fn absorb_from_fills_gaps_without_overriding() {
        let mut prior = Response::new(200);
        prior.header("X-RateLimit-Remaining", "3");
        prior.header("X-Frame-Options", "SAMEORIGIN");
        prior.set_cookie(Cookie::new("session", "abc123"));

        let mut resp = Response::ok("handled");
        resp.absorb_from(&prior);

        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("X-RateLimit-Remaining: 3"));
        assert!(text.contains("X-Frame-Options: DENY"), "resp's own header must win");
        assert!(text.contains("Set-Cookie: session=abc123"));
    }

    #[test]
    fn empty_body_omits_content_length() {
        let resp = Response::new(204);
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("Content-Length"));
    }
}
