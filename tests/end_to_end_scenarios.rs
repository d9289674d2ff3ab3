use std::io::Read;

use wick::http::{multipart, parser, Method, Request, Response};
use wick::router::Router;
use wick::ws::{handshake, WebSocketFrame};

#[test]
fn simple_get_with_query_returns_greeting() {
    let input = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let parsed = parser::parse_head(input).expect("head should parse");
    let mut request = parsed.request;

    let mut router = Router::new();
    router.get("/hello", |req: &Request| {
        let name = req.query("name").unwrap_or("");
        Ok(Response::text(200, &format!("hi {}", name)))
    });

    let response = router.handle(&mut request);
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "hi world");
}

#[test]
fn path_parameters_are_captured_before_dispatch() {
    let input = b"GET /users/123 HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let parsed = parser::parse_head(input).expect("head should parse");
    let mut request = parsed.request;

    let mut router = Router::new();
    router.get("/users/:id", |req: &Request| {
        let id = req.path_params.get("id").cloned().unwrap_or_default();
        Ok(Response::text(200, &id))
    });

    let response = router.handle(&mut request);
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "123");
}

#[test]
fn multipart_upload_extracts_field_and_file() {
    let boundary = "WickTestBoundary7MA4YWxkTrZu0gW";
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"username\"\r\n\r\n\
         \u{503c}\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"avatar\"; filename=\"m.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         \u{6587}\u{4ef6}\u{5185}\u{5bb9}\r\n\
         --{b}--\r\n",
        b = boundary
    );

    let mut request = Request::new(Method::Post, "/upload".to_string(), "HTTP/1.1".to_string());
    let config = multipart::MultipartConfig {
        temp_dir: std::env::temp_dir(),
        max_file_size: 1024 * 1024,
    };

    multipart::decode_multipart(body.as_bytes(), boundary, &mut request, &config)
        .expect("multipart body should decode");

    assert_eq!(request.query("username"), Some("\u{503c}"));
    let file = request.files.get("avatar").expect("avatar file should be present");
    assert_eq!(file.filename, "m.txt");

    let mut contents = String::new();
    std::fs::File::open(&file.path)
        .expect("temp file should exist")
        .read_to_string(&mut contents)
        .expect("temp file should be valid utf-8");
    assert_eq!(contents, "\u{6587}\u{4ef6}\u{5185}\u{5bb9}");

    std::fs::remove_file(&file.path).ok();
}

#[test]
fn blocked_extension_is_rejected_and_leaves_no_temp_file() {
    let boundary = "WickBlockedBoundary7MA4YWxkTrZu0gW";
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"payload\"; filename=\"virus.exe\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         not really a virus\r\n\
         --{b}--\r\n",
        b = boundary
    );

    let mut request = Request::new(Method::Post, "/upload".to_string(), "HTTP/1.1".to_string());
    let temp_dir = std::env::temp_dir();
    let config = multipart::MultipartConfig {
        temp_dir: temp_dir.clone(),
        max_file_size: 1024 * 1024,
    };

    let before: Vec<_> = std::fs::read_dir(&temp_dir).unwrap().filter_map(|e| e.ok()).collect();

    let result = multipart::decode_multipart(body.as_bytes(), boundary, &mut request, &config);
    assert!(result.is_err(), "blocked extension must be rejected");

    let after: Vec<_> = std::fs::read_dir(&temp_dir).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(before.len(), after.len(), "no temp file should remain after rejection");
}

#[test]
fn handshake_computes_the_documented_accept_key() {
    let mut request = Request::new(Method::Get, "/ws".to_string(), "HTTP/1.1".to_string());
    request.set_header("Upgrade", "websocket");
    request.set_header("Connection", "Upgrade");
    request.set_header("Sec-WebSocket-Version", "13");
    request.set_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");

    let accept = handshake::validate_handshake(&request).expect("handshake should validate");
    assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");

    let response = handshake::build_101_response(&accept, None, None);
    let text = String::from_utf8(response.to_bytes()).unwrap();
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
}

#[test]
fn text_frame_round_trips_through_parse_and_serialize() {
    let frame = WebSocketFrame::text("Hello, WebSocket!");
    let bytes = frame.to_bytes();

    let (parsed, consumed) = WebSocketFrame::parse(&bytes).expect("frame should parse");
    assert_eq!(consumed, bytes.len());
    assert!(parsed.fin);
    assert_eq!(parsed.opcode, wick::ws::OpCode::Text);
    assert_eq!(parsed.payload, b"Hello, WebSocket!");
}
