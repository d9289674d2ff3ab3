//! Non-blocking selector loop: accept, handshake, frame dispatch, heartbeat,
//! and broadcast (§4.9).
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::WsConfig;
use crate::error::WickResult;
use crate::http::parser;
use crate::ws::connection::{Callbacks, ConnectionState, WebSocketConnection};
use crate::ws::frame::{close_code, WebSocketFrame};
use crate::ws::handshake;
use crate::ws::slab::Slab;
use crate::ws::syscalls::{self, Selector, READABLE, WRITABLE};

const LISTENER_TOKEN: u64 = u64::MAX;
const READ_CHUNK: usize = 8 * 1024;
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

enum Endpoint {
    Handshaking { buf: Vec<u8> },
    Promoted {
        conn: Arc<WebSocketConnection>,
        read_buf: Vec<u8>,
        write_in_progress: Option<(Vec<u8>, usize)>,
        pending_close: Option<(u16, String)>,
    },
}

struct Entry {
    fd: RawFd,
    addr: std::net::SocketAddr,
    endpoint: Endpoint,
}

type Registry = Arc<Mutex<Slab<Entry>>>;

/// A cloneable, thread-safe reference to the running driver's connection
/// registry (§5 "connection registry", §4.9 "Broadcast").
#[derive(Clone)]
pub struct WsHandle {
    registry: Registry,
}

impl WsHandle {
    pub fn broadcast_text(&self, text: &str) {
        let registry = self.registry.lock().expect("ws registry mutex poisoned");
        for (_, entry) in registry.iter() {
            if let Endpoint::Promoted { conn, .. } = &entry.endpoint {
                if conn.state() == ConnectionState::Open {
                    let _ = conn.send_text(text);
                }
            }
        }
    }

    pub fn broadcast_binary(&self, payload: &[u8]) {
        let registry = self.registry.lock().expect("ws registry mutex poisoned");
        for (_, entry) in registry.iter() {
            if let Endpoint::Promoted { conn, .. } = &entry.endpoint {
                if conn.state() == ConnectionState::Open {
                    let _ = conn.send_binary(payload.to_vec());
                }
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().expect("ws registry mutex poisoned").len()
    }
}

pub struct WsServer {
    config: WsConfig,
    callbacks: Callbacks,
}

impl WsServer {
    pub fn new(config: WsConfig, callbacks: Callbacks) -> Self {
        Self { config, callbacks }
    }

    /// Starts the driver and heartbeat threads and returns a handle plus the
    /// driver's join handle (§5: "the driver task must be started before
    /// the heartbeat task").
    pub fn spawn(self) -> WickResult<(WsHandle, thread::JoinHandle<()>)> {
        let listen_fd = syscalls::create_listen_socket(&self.config.host, self.config.port)?;
        let selector = Arc::new(Selector::new()?);
        selector.add(listen_fd, LISTENER_TOKEN, READABLE)?;

        let registry: Registry = Arc::new(Mutex::new(Slab::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let shutdown_signal = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received, draining websocket driver");
            shutdown_signal.store(true, Ordering::Release);
        })
        .ok();

        let driver_registry = registry.clone();
        let driver_selector = selector.clone();
        let driver_shutdown = shutdown.clone();
        let config = self.config.clone();
        let callbacks = self.callbacks;

        let driver = thread::Builder::new()
            .name("wick-ws-driver".to_string())
            .spawn(move || {
                run_driver(
                    listen_fd,
                    driver_selector,
                    driver_registry,
                    driver_shutdown,
                    config,
                    callbacks,
                )
            })
            .expect("failed to spawn websocket driver thread");

        let heartbeat_registry = registry.clone();
        let heartbeat_shutdown = shutdown.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let max_inactivity = self.config.max_inactivity;
        thread::Builder::new()
            .name("wick-ws-heartbeat".to_string())
            .spawn(move || run_heartbeat(heartbeat_registry, heartbeat_shutdown, heartbeat_interval, max_inactivity))
            .expect("failed to spawn websocket heartbeat thread");

        Ok((WsHandle { registry }, driver))
    }
}

fn run_heartbeat(registry: Registry, shutdown: Arc<AtomicBool>, interval: Duration, max_inactivity: Duration) {
    let max_inactivity_millis = max_inactivity.as_millis() as i64;
    while !shutdown.load(Ordering::Acquire) {
        thread::sleep(interval);
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let guard = registry.lock().expect("ws registry mutex poisoned");
        for (_, entry) in guard.iter() {
            if let Endpoint::Promoted { conn, .. } = &entry.endpoint {
                if conn.state() != ConnectionState::Open {
                    continue;
                }
                if now - conn.last_activity_millis() > max_inactivity_millis {
                    conn.initiate_close(close_code::GOING_AWAY, "Inactivity timeout");
                } else {
                    let _ = conn.send_ping();
                }
            }
        }
    }
}

fn run_driver(
    listen_fd: RawFd,
    selector: Arc<Selector>,
    registry: Registry,
    shutdown: Arc<AtomicBool>,
    config: WsConfig,
    callbacks: Callbacks,
) {
    let mut events = vec![syscalls::new_event(); 256];

    let mut shutdown_deadline: Option<std::time::Instant> = None;

    loop {
        if shutdown.load(Ordering::Acquire) && shutdown_deadline.is_none() {
            let guard = registry.lock().expect("ws registry mutex poisoned");
            for (_, entry) in guard.iter() {
                if let Endpoint::Promoted { conn, .. } = &entry.endpoint {
                    conn.initiate_close(close_code::GOING_AWAY, "server shutting down");
                }
            }
            drop(guard);
            shutdown_deadline = Some(std::time::Instant::now() + SHUTDOWN_DRAIN);
        }

        if let Some(deadline) = shutdown_deadline {
            if std::time::Instant::now() >= deadline || registry.lock().expect("ws registry mutex poisoned").is_empty() {
                break;
            }
        }

        let n = match selector.wait(&mut events, 200) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "selector wait failed");
                continue;
            }
        };

        for event in &events[..n] {
            if event.u64 == LISTENER_TOKEN {
                accept_loop(listen_fd, &selector, &registry);
                continue;
            }
            let token = event.u64 as usize;
            let readable = event.events as i32 & READABLE != 0;
            let writable = event.events as i32 & WRITABLE != 0;

            if readable {
                handle_readable(token, &selector, &registry, &config, &callbacks);
            }
            if writable {
                handle_writable(token, &selector, &registry);
            }
        }

        reap_closed(&selector, &registry);
    }

    let guard = registry.lock().expect("ws registry mutex poisoned");
    for (_, entry) in guard.iter() {
        syscalls::close_fd(entry.fd);
    }
    drop(guard);
    syscalls::close_fd(listen_fd);
    tracing::info!("websocket driver shut down");
}

fn accept_loop(listen_fd: RawFd, selector: &Selector, registry: &Registry) {
    loop {
        match syscalls::accept_connection(listen_fd) {
            Ok(Some((fd, addr))) => {
                let mut guard = registry.lock().expect("ws registry mutex poisoned");
                let token = guard.insert(Entry {
                    fd,
                    addr,
                    endpoint: Endpoint::Handshaking { buf: Vec::new() },
                });
                drop(guard);
                if let Err(e) = selector.add(fd, token as u64, READABLE) {
                    tracing::warn!(error = %e, "failed to register accepted socket");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn handle_readable(token: usize, selector: &Selector, registry: &Registry, config: &WsConfig, callbacks: &Callbacks) {
    let mut guard = registry.lock().expect("ws registry mutex poisoned");
    let fd = match guard.get(token) {
        Some(entry) => entry.fd,
        None => return,
    };

    // The selector is edge-triggered, so drain the socket until it reports
    // no more data; a single short read per wakeup would stall the stream.
    let mut chunk = [0u8; READ_CHUNK];
    let mut drained = Vec::new();
    loop {
        match syscalls::read_nonblocking(fd, &mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                drained.extend_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "read failed, closing connection");
                if let Some(entry) = guard.get(token) {
                    if let Endpoint::Promoted { conn, .. } = &entry.endpoint {
                        conn.fire_error(&e);
                        conn.finish_close(close_code::ABNORMAL, "transport error".to_string());
                    }
                }
                let _ = selector.delete(fd);
                return;
            }
        }
    }

    if drained.is_empty() {
        return;
    }
    let n = drained.len();
    let chunk = drained;

    let entry = match guard.get_mut(token) {
        Some(entry) => entry,
        None => return,
    };

    match &mut entry.endpoint {
        Endpoint::Handshaking { buf } => {
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > config.max_message_size {
                tracing::warn!("handshake request exceeded max message size");
                let _ = selector.delete(fd);
                guard.remove(token);
                return;
            }
            match parser::parse_head(buf) {
                Ok(parsed) => {
                    let response = match handshake::validate_handshake(&parsed.request) {
                        Ok(accept) => {
                            let protocol = parsed.request.header("sec-websocket-protocol").map(String::from);
                            let extensions = parsed.request.header("sec-websocket-extensions").map(String::from);
                            handshake::build_101_response(&accept, protocol.as_deref(), extensions.as_deref())
                        }
                        Err(_) => crate::http::Response::new(400),
                    };
                    let bytes = response.to_bytes();
                    let _ = syscalls::write_nonblocking(fd, &bytes);

                    if response.status == 101 {
                        let conn = Arc::new(WebSocketConnection::new(entry.addr.to_string(), callbacks.clone()));
                        conn.fire_open();
                        entry.endpoint = Endpoint::Promoted {
                            conn,
                            read_buf: Vec::new(),
                            write_in_progress: None,
                            pending_close: None,
                        };
                    } else {
                        let _ = selector.delete(fd);
                        guard.remove(token);
                    }
                }
                Err(crate::error::ParseError::Incomplete) => {}
                Err(_) => {
                    let bytes = crate::http::Response::new(400).to_bytes();
                    let _ = syscalls::write_nonblocking(fd, &bytes);
                    let _ = selector.delete(fd);
                    guard.remove(token);
                }
            }
        }
        Endpoint::Promoted {
            conn,
            read_buf,
            pending_close,
            ..
        } => {
            read_buf.extend_from_slice(&chunk[..n]);
            loop {
                match WebSocketFrame::parse(read_buf) {
                    Ok((frame, consumed)) => {
                        read_buf.drain(..consumed);
                        if let Some(close) = conn.dispatch(frame) {
                            *pending_close = Some(close);
                        }
                    }
                    Err(crate::error::ParseError::Incomplete) => break,
                    Err(_) => {
                        conn.initiate_close(close_code::PROTOCOL_ERROR, "malformed frame");
                        break;
                    }
                }
            }
            if conn.has_pending() {
                let _ = selector.modify(fd, token as u64, READABLE | WRITABLE);
            }
        }
    }
}

fn handle_writable(token: usize, selector: &Selector, registry: &Registry) {
    let mut guard = registry.lock().expect("ws registry mutex poisoned");
    let fd = match guard.get(token) {
        Some(entry) => entry.fd,
        None => return,
    };

    let entry = match guard.get_mut(token) {
        Some(entry) => entry,
        None => return,
    };

    let (conn, write_in_progress, pending_close) = match &mut entry.endpoint {
        Endpoint::Promoted {
            conn,
            write_in_progress,
            pending_close,
            ..
        } => (conn, write_in_progress, pending_close),
        Endpoint::Handshaking { .. } => return,
    };

    // Pop at most one buffer per writable event (§4.9 "on writable, drain one
    // buffer per event; when the queue empties, drop writable interest") so a
    // connection with a deep backlog can't starve the other connections the
    // single driver thread also has to service.
    if write_in_progress.is_none() {
        match conn.pop_pending() {
            Some(bytes) => *write_in_progress = Some((bytes, 0)),
            None => return,
        }
    }

    loop {
        let (bytes, offset) = write_in_progress.as_mut().unwrap();
        match syscalls::write_nonblocking(fd, &bytes[*offset..]) {
            Ok(0) => break,
            Ok(written) => {
                *offset += written;
                if *offset >= bytes.len() {
                    *write_in_progress = None;
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "write failed, closing connection");
                conn.fire_error(&e);
                conn.finish_close(close_code::ABNORMAL, "transport error".to_string());
                let _ = selector.delete(fd);
                return;
            }
        }
    }

    if !conn.has_pending() && write_in_progress.is_none() {
        let _ = selector.modify(fd, token as u64, READABLE);
        if let Some((code, reason)) = pending_close.take() {
            conn.finish_close(code, reason);
        }
    }
}

fn reap_closed(selector: &Selector, registry: &Registry) {
    let mut guard = registry.lock().expect("ws registry mutex poisoned");
    let closed: Vec<usize> = guard
        .iter()
        .filter_map(|(token, entry)| match &entry.endpoint {
            Endpoint::Promoted { conn, .. } if conn.state() == ConnectionState::Closed => Some(token),
            _ => None,
        })
        .collect();
    for token in closed {
        if let Some(entry) = guard.remove(token) {
            let _ = selector.delete(entry.fd);
            syscalls::close_fd(entry.fd);
        }
    }
}
