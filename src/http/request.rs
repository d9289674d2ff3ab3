use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use crate::http::method::Method;
use crate::util::ShieldedReader;

/// An uploaded file extracted from a multipart part (§3, §4.2).
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field_name: String,
    pub filename: String,
    pub content_type: String,
    pub path: PathBuf,
    pub size: u64,
}

/// An immutable HTTP request (§3).
///
/// Per the design notes in §9, this is the "split" shape: `Request` is
/// cheap and fully owned. A request whose content type was
/// `multipart/form-data` never carries a live stream — by the time a
/// `Request` exists, the multipart decoder has already drained the
/// socket into `files`/`query`. The live, still-open stream is only
/// present transiently while the parser hands bytes to the multipart
/// decoder, never on the `Request` a handler sees.
pub struct Request {
    pub method: Method,
    pub path: String,
    pub proto: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub body: String,
    pub files: HashMap<String, FilePart>,
}

impl Request {
    pub fn new(method: Method, path: String, proto: String) -> Self {
        Self {
            method,
            path,
            proto,
            headers: HashMap::new(),
            query: HashMap::new(),
            path_params: HashMap::new(),
            body: String::new(),
            files: HashMap::new(),
        }
    }

    /// Inserts a header. Per §3, later occurrences of the same name are
    /// ignored at the top level — only multipart subpart parsing (§4.2)
    /// applies the comma-join policy, via [`Request::push_header_joined`].
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.entry(name.to_lowercase()).or_insert_with(|| value.to_string());
    }

    /// Comma-joins a repeated header, used when re-parsing multipart part
    /// headers where duplicate header lines must be preserved (§3).
    pub fn push_header_joined(&mut self, name: &str, value: &str) {
        let key = name.to_lowercase();
        self.headers
            .entry(key)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    /// Case-insensitive header lookup (§3 invariant a).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn set_query(&mut self, name: String, value: String) {
        self.query.insert(name, value);
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(|s| s.as_str())
    }
}

/// A boxed, close-shielded stream positioned right after the header
/// terminator (§4.1 "Non-closure contract"). Handed to the multipart
/// decoder, never stored on `Request` itself.
pub type BodyStream = ShieldedReader<Box<dyn Read + Send>>;
