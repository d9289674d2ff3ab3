//! Streaming `multipart/form-data` decoder (§4.2).
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{ParseError, PolicyError, WickError};
use crate::http::request::Request;
use crate::util::BoundaryScanner;

const READ_CHUNK: usize = 16 * 1024;
const WRITE_CHUNK: usize = 8 * 1024;
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

const BLOCKED_EXTENSIONS: &[&str] = &[".exe", ".sh", ".bat", ".cmd", ".com", ".scr"];

/// Where decoded file parts are streamed to disk (§4.2 step 5).
pub struct MultipartConfig {
    pub temp_dir: PathBuf,
    pub max_file_size: u64,
}

impl MultipartConfig {
    pub fn from_env() -> Self {
        Self {
            temp_dir: std::env::var("WICK_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("temp")),
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

/// Reads the parts out of `reader`, folding each into `request`: plain
/// fields merge into the query map, file parts are streamed to disk and
/// recorded in `request.files`. On a name collision between a field and a
/// file, the file wins (§4.2 step 6).
pub fn decode_multipart<R: Read>(
    mut reader: R,
    boundary: &str,
    request: &mut Request,
    config: &MultipartConfig,
) -> Result<(), WickError> {
    std::fs::create_dir_all(&config.temp_dir)?;

    let opening = format!("--{}", boundary);
    let closing = format!("--{}--", boundary);
    let scanner = BoundaryScanner::new(opening.as_bytes());

    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    fill(&mut reader, &mut buf, READ_CHUNK)?;

    // Discard the preamble (RFC 2046 permits arbitrary bytes before the first
    // boundary) and consume the first delimiter line (§4.2 step 1).
    skip_preamble(&mut reader, &mut buf, &scanner, &closing)?;

    loop {
        let headers_end = loop {
            if let Some(idx) = crate::util::find_bytes(&buf, b"\r\n\r\n") {
                break idx;
            }
            if fill(&mut reader, &mut buf, READ_CHUNK)? == 0 {
                return Err(ParseError::Incomplete.into());
            }
        };
        let header_block = buf[..headers_end].to_vec();
        buf.drain(..headers_end + 4);

        let (field_name, filename) = parse_content_disposition(&header_block)
            .ok_or(ParseError::InvalidFormat)?;
        // A present-but-empty `filename=""` is not a file part (§4.2 step 4:
        // "if filename is present and non-empty").
        let filename = filename.filter(|f| !f.is_empty());

        match filename {
            None => {
                let mut sink = Vec::new();
                stream_part_body_capped(&mut reader, &scanner, &mut buf, &mut sink, u64::MAX)?;
                request.set_query(field_name, String::from_utf8_lossy(&sink).into_owned());
                if !advance_past_delimiter_line(&mut reader, &mut buf, &scanner, &closing)? {
                    break;
                }
            }
            Some(filename) => {
                validate_filename(&filename)?;
                let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_for_fs(&filename));
                let path = config.temp_dir.join(&stored_name);
                let mut file = File::create(&path)?;

                let result = stream_part_body_capped(
                    &mut reader,
                    &scanner,
                    &mut buf,
                    &mut file,
                    config.max_file_size,
                );
                let written = match result {
                    Ok(n) => n,
                    Err(e) => {
                        let _ = std::fs::remove_file(&path);
                        return Err(e);
                    }
                };

                let sniffed = sniff_content_type(&path, &filename)?;
                request.files.insert(
                    field_name.clone(),
                    crate::http::request::FilePart {
                        field_name,
                        filename,
                        content_type: sniffed,
                        path,
                        size: written,
                    },
                );
                if !advance_past_delimiter_line(&mut reader, &mut buf, &scanner, &closing)? {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Reads more bytes from `reader` into `buf`, up to `chunk` bytes. Returns
/// the number of bytes read (0 at EOF).
fn fill<R: Read>(reader: &mut R, buf: &mut Vec<u8>, chunk: usize) -> Result<usize, WickError> {
    let start = buf.len();
    buf.resize(start + chunk, 0);
    let n = reader.read(&mut buf[start..])?;
    buf.truncate(start + n);
    Ok(n)
}

/// Streams bytes from `buf`/`reader` into `sink` until the next delimiter is
/// found, writing in 8 KiB chunks and holding back only the minimal partial
/// match tail, enforcing `max_size` along the way.
fn stream_part_body_capped<R: Read, W: Write>(
    reader: &mut R,
    scanner: &BoundaryScanner,
    buf: &mut Vec<u8>,
    sink: &mut W,
    max_size: u64,
) -> Result<u64, WickError> {
    let mut written: u64 = 0;
    loop {
        if let Some(idx) = scanner.find(buf) {
            let body_end = idx.saturating_sub(2); // strip the CRLF before the delimiter
            write_all_capped(sink, &buf[..body_end], &mut written, max_size)?;
            buf.drain(..idx);
            return Ok(written);
        }
        let tail = scanner.partial_tail_len(buf);
        let safe_len = buf.len().saturating_sub(tail);
        if safe_len > 0 {
            let chunk_owned = buf[..safe_len].to_vec();
            for chunk in chunk_owned.chunks(WRITE_CHUNK) {
                write_all_capped(sink, chunk, &mut written, max_size)?;
            }
            buf.drain(..safe_len);
        }
        if fill(reader, buf, READ_CHUNK)? == 0 {
            return Err(ParseError::Incomplete.into());
        }
    }
}

fn write_all_capped<W: Write>(
    sink: &mut W,
    chunk: &[u8],
    written: &mut u64,
    max_size: u64,
) -> Result<(), WickError> {
    *written += chunk.len() as u64;
    if *written > max_size {
        return Err(ParseError::TooLarge.into());
    }
    sink.write_all(chunk)?;
    Ok(())
}

/// Discards preamble bytes preceding the first boundary. RFC 2046 permits
/// arbitrary content here, so this scans byte-by-byte for the opening
/// delimiter rather than assuming the first line already is one, then hands
/// off to [`advance_past_delimiter_line`] to consume the delimiter itself.
fn skip_preamble<R: Read>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    scanner: &BoundaryScanner,
    closing: &str,
) -> Result<bool, WickError> {
    loop {
        if let Some(idx) = scanner.find(buf) {
            buf.drain(..idx);
            return advance_past_delimiter_line(reader, buf, scanner, closing);
        }
        let tail = scanner.partial_tail_len(buf);
        let safe_len = buf.len().saturating_sub(tail);
        if safe_len > 0 {
            buf.drain(..safe_len);
        }
        if fill(reader, buf, READ_CHUNK)? == 0 {
            return Err(ParseError::Incomplete.into());
        }
    }
}

/// After a part body has been drained, `buf` starts with the delimiter line
/// itself (`--boundary` or `--boundary--`) followed by `\r\n`. Consumes it
/// and reports whether it was the closing delimiter.
fn advance_past_delimiter_line<R: Read>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    scanner: &BoundaryScanner,
    closing: &str,
) -> Result<bool, WickError> {
    let line_end = loop {
        if let Some(idx) = crate::util::find_bytes(buf, b"\r\n") {
            break idx;
        }
        if fill(reader, buf, READ_CHUNK)? == 0 {
            // A bare EOF right after the closing delimiter (no trailing CRLF) is fine.
            let is_closing = buf.starts_with(closing.as_bytes());
            buf.clear();
            return Ok(!is_closing);
        }
    };
    let line = buf[..line_end].to_vec();
    buf.drain(..line_end + 2);
    let _ = scanner;
    Ok(line != closing.as_bytes())
}

fn parse_content_disposition(header_block: &[u8]) -> Option<(String, Option<String>)> {
    let text = String::from_utf8_lossy(header_block);
    let disposition = text
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-disposition"))?;
    let name = extract_quoted(disposition, "name=")?;
    let filename = extract_quoted(disposition, "filename=");
    Some((name, filename))
}

fn extract_quoted(haystack: &str, key: &str) -> Option<String> {
    let idx = haystack.find(key)? + key.len();
    let rest = &haystack[idx..];
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn validate_filename(filename: &str) -> Result<(), WickError> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(PolicyError::RejectedUpload(format!("unsafe filename: {}", filename)).into());
    }
    let lower = filename.to_ascii_lowercase();
    if BLOCKED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return Err(PolicyError::RejectedUpload(format!("blocked extension: {}", filename)).into());
    }
    Ok(())
}

fn sanitize_for_fs(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

const MAGIC_TABLE: &[(&[u8], &str)] = &[
    (&[0x89, b'P', b'N', b'G'], "image/png"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF", "application/pdf"),
    (&[0x50, 0x4B, 0x03, 0x04], "application/zip"),
];

const EXTENSION_TABLE: &[(&str, &str)] = &[
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
    (".pdf", "application/pdf"),
    (".txt", "text/plain"),
    (".html", "text/html"),
    (".json", "application/json"),
];

/// Determines the stored content type for an uploaded file: sniff the first
/// bytes on disk, fall back to the declared extension, fall back to
/// octet-stream (§4.2 step 7).
fn sniff_content_type(path: &Path, filename: &str) -> Result<String, WickError> {
    let mut header = [0u8; 8];
    let mut file = File::open(path)?;
    let n = file.read(&mut header)?;
    let header = &header[..n];
    for (magic, mime) in MAGIC_TABLE {
        if header.starts_with(magic) {
            return Ok((*mime).to_string());
        }
    }
    let lower = filename.to_ascii_lowercase();
    for (ext, mime) in EXTENSION_TABLE {
        if lower.ends_with(ext) {
            return Ok((*mime).to_string());
        }
    }
    Ok("application/octet-stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(boundary: &str) -> Vec<u8> {
        format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             hello world\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             file contents\r\n\
             --{b}--\r\n",
            b = boundary
        )
        .into_bytes()
    }

    #[test]
    fn decodes_field_and_file_parts() {
        let dir = std::env::temp_dir().join(format!("wick-test-{}", Uuid::new_v4()));
        let config = MultipartConfig {
            temp_dir: dir.clone(),
            max_file_size: MAX_FILE_SIZE,
        };
        let mut request = Request::new(
            crate::http::method::Method::Post,
            "/upload".to_string(),
            "HTTP/1.1".to_string(),
        );
        let cursor = Cursor::new(sample("XYZ"));
        decode_multipart(cursor, "XYZ", &mut request, &config).unwrap();

        assert_eq!(request.query("title"), Some("hello world"));
        let file = request.files.get("file").unwrap();
        assert_eq!(file.filename, "a.txt");
        let contents = std::fs::read_to_string(&file.path).unwrap();
        assert_eq!(contents, "file contents");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_blocked_extension() {
        assert!(validate_filename("payload.exe").is_err());
        assert!(validate_filename("../../etc/passwd").is_err());
        assert!(validate_filename("report.pdf").is_ok());
    }

    #[test]
    fn sniffs_png_magic_over_extension() {
        let dir = std::env::temp_dir().join(format!("wick-sniff-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("photo.txt");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0, 0, 0, 0]).unwrap();
        let mime = sniff_content_type(&path, "photo.txt").unwrap();
        assert_eq!(mime, "image/png");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sniffs_html_extension_with_no_magic_bytes() {
        let dir = std::env::temp_dir().join(format!("wick-sniff-html-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("report.html");
        std::fs::write(&path, b"<!doctype html><p>hi</p>").unwrap();
        let mime = sniff_content_type(&path, "report.html").unwrap();
        assert_eq!(mime, "text/html");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unrecognized_extension_with_no_magic_falls_back_to_octet_stream() {
        let dir = std::env::temp_dir().join(format!("wick-sniff-unknown-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("archive.zip");
        std::fs::write(&path, b"not really a zip").unwrap();
        let mime = sniff_content_type(&path, "archive.zip").unwrap();
        assert_eq!(mime, "application/octet-stream");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_filename_is_treated_as_a_plain_field() {
        let dir = std::env::temp_dir().join(format!("wick-test-empty-filename-{}", Uuid::new_v4()));
        let config = MultipartConfig {
            temp_dir: dir.clone(),
            max_file_size: MAX_FILE_SIZE,
        };
        let mut request = Request::new(
            crate::http::method::Method::Post,
            "/upload".to_string(),
            "HTTP/1.1".to_string(),
        );
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"avatar\"; filename=\"\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             \r\n\
             --{b}--\r\n",
            b = "XYZ"
        );
        decode_multipart(Cursor::new(body.into_bytes()), "XYZ", &mut request, &config).unwrap();

        assert!(request.files.get("avatar").is_none());
        assert_eq!(request.query("avatar"), Some(""));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn preamble_bytes_before_the_first_boundary_are_skipped() {
        let dir = std::env::temp_dir().join(format!("wick-test-preamble-{}", Uuid::new_v4()));
        let config = MultipartConfig {
            temp_dir: dir.clone(),
            max_file_size: MAX_FILE_SIZE,
        };
        let mut request = Request::new(
            crate::http::method::Method::Post,
            "/upload".to_string(),
            "HTTP/1.1".to_string(),
        );
        let body = format!(
            "This is ignored preamble text per RFC 2046.\r\n\
             It may span multiple lines and does not start with the boundary.\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             hello world\r\n\
             --{b}--\r\n",
            b = "XYZ"
        );
        decode_multipart(Cursor::new(body.into_bytes()), "XYZ", &mut request, &config).unwrap();

        assert_eq!(request.query("title"), Some("hello world"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
