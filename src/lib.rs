//! A self-contained HTTP/1.1 server with an integrated RFC 6455 WebSocket
//! endpoint. No web framework underneath: routing, multipart decoding, and
//! the WebSocket frame codec are all implemented directly over `std::net`
//! and raw `libc` syscalls.
pub mod config;
pub mod error;
pub mod http;
pub mod router;
pub mod server;
pub mod util;
pub mod ws;

pub use error::{ParseError, PolicyError, WickError, WickResult};
pub use router::{Handler, HandlerError, HandlerResult, Middleware, Router};
pub use server::HttpServer;
