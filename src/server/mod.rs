//! HTTP server loop (§4.5): accept, parse, pre-filter, route, respond, close.
mod pool;

use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::HttpConfig;
use crate::error::{ParseError, WickError, WickResult};
use crate::http::multipart::{self, MultipartConfig};
use crate::http::parser::{self, MAX_HEADER_BYTES};
use crate::http::response::Response;
use crate::router::Router;
use crate::util::ShieldedReader;

use pool::ThreadPool;

const READ_CHUNK: usize = 4 * 1024;

/// Boundary interface through which an external security/policy component
/// may reject a request before it reaches the router (§1 "pre-filter").
/// Shares the middleware contract: mutate the response, return `false` to
/// short-circuit.
pub type PreFilter = Arc<dyn Fn(&crate::http::Request, &mut Response) -> bool + Send + Sync>;

pub struct HttpServer {
    config: HttpConfig,
    router: Router,
    pre_filter: Option<PreFilter>,
}

impl HttpServer {
    pub fn new(config: HttpConfig, router: Router) -> Self {
        Self {
            config,
            router,
            pre_filter: None,
        }
    }

    pub fn with_pre_filter<F>(mut self, pre_filter: F) -> Self
    where
        F: Fn(&crate::http::Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.pre_filter = Some(Arc::new(pre_filter));
        self
    }

    /// Binds the listening socket and runs until a Ctrl-C signal is observed.
    pub fn serve(self) -> WickResult<()> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))?;
        listener.set_nonblocking(true)?;
        tracing::info!(host = %self.config.host, port = self.config.port, "http server listening");

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_signal = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received, draining http listener");
            shutdown_signal.store(true, Ordering::Release);
        })
        .map_err(|e| WickError::Other(format!("failed to install signal handler: {}", e)))?;

        let router = Arc::new(self.router);
        let pre_filter = self.pre_filter;
        let pool = ThreadPool::new(self.config.workers);

        while !shutdown.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let router = router.clone();
                    let pre_filter = pre_filter.clone();
                    tracing::debug!(%addr, "accepted http connection");
                    pool.execute(move || {
                        if let Err(e) = handle_connection(stream, &router, pre_filter.as_ref()) {
                            tracing::warn!(error = %e, "connection handling failed");
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!("http server shut down cleanly");
        Ok(())
    }
}

fn handle_connection(
    mut stream: TcpStream,
    router: &Router,
    pre_filter: Option<&PreFilter>,
) -> WickResult<()> {
    stream.set_nonblocking(false)?;
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);

    let parsed = loop {
        match parser::parse_head(&buf) {
            Ok(parsed) => break parsed,
            Err(ParseError::Incomplete) => {
                let start = buf.len();
                buf.resize(start + READ_CHUNK, 0);
                let n = stream.read(&mut buf[start..])?;
                buf.truncate(start + n);
                if n == 0 {
                    return Ok(());
                }
                if buf.len() > MAX_HEADER_BYTES {
                    write_response(&mut stream, &error_response(400, "header block too large"))?;
                    return Ok(());
                }
            }
            Err(e) => {
                write_response(&mut stream, &error_response(WickError::from(e).status_code(), "bad request"))?;
                return Ok(());
            }
        }
    };

    let crate::http::parser::ParsedHead {
        mut request,
        body_offset,
        content_length,
        multipart_boundary,
    } = parsed;

    let leftover = buf[body_offset..].to_vec();

    if let Some(boundary) = multipart_boundary {
        let cloned = stream.try_clone()?;
        let chained: Box<dyn Read + Send> = Box::new(Cursor::new(leftover).chain(cloned));
        let shielded = ShieldedReader::new(chained);
        let config = MultipartConfig::from_env();
        if let Err(e) = multipart::decode_multipart(shielded, &boundary, &mut request, &config) {
            write_response(&mut stream, &error_response(400, &format!("{}", e)))?;
            return Ok(());
        }
    } else if let Some(len) = content_length {
        let mut body = leftover;
        if body.len() < len {
            let mut remaining = vec![0u8; len - body.len()];
            stream.read_exact(&mut remaining)?;
            body.extend_from_slice(&remaining);
        } else {
            body.truncate(len);
        }
        request.body = String::from_utf8_lossy(&body).into_owned();
    }

    let mut response = Response::new(200);
    if let Some(pre_filter) = pre_filter {
        if !pre_filter(&request, &mut response) {
            return write_response(&mut stream, &response);
        }
    }

    let response = router.handle_with(&mut request, response);
    write_response(&mut stream, &response)
}

fn write_response(stream: &mut TcpStream, response: &Response) -> WickResult<()> {
    stream.write_all(&response.to_bytes())?;
    stream.flush()?;
    Ok(())
}

fn error_response(status: u16, message: &str) -> Response {
    let mut resp = Response::new(status);
    resp.body = message.to_string();
    resp
}
