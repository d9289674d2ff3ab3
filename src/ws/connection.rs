//! Per-connection state machine, send queue, and frame dispatch (§4.8).
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::error::WickError;
use crate::ws::frame::{close_code, OpCode, WebSocketFrame};

/// Queue capacity beyond which `send` fails rather than growing unbounded
/// (§3 invariant d, §9 "Back-pressure on the send queue").
pub const SEND_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// The five user-supplied lifecycle callbacks (§3 "WebSocketConnection").
#[derive(Clone)]
pub struct Callbacks {
    pub on_text: Arc<dyn Fn(&WebSocketConnection, String) + Send + Sync>,
    pub on_binary: Arc<dyn Fn(&WebSocketConnection, Vec<u8>) + Send + Sync>,
    pub on_open: Arc<dyn Fn(&WebSocketConnection) + Send + Sync>,
    pub on_close: Arc<dyn Fn(&WebSocketConnection, u16, String) + Send + Sync>,
    pub on_error: Arc<dyn Fn(&WebSocketConnection, &WickError) + Send + Sync>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct WebSocketConnection {
    pub id: Uuid,
    pub remote_addr: String,
    pub connected_at_millis: i64,
    closed_at_millis: Mutex<Option<i64>>,
    last_activity_millis: AtomicI64,
    state: Mutex<ConnectionState>,
    closing: AtomicBool,
    close_fired: AtomicBool,
    send_queue: Mutex<VecDeque<Vec<u8>>>,
    callbacks: Callbacks,
}

impl WebSocketConnection {
    pub fn new(remote_addr: String, callbacks: Callbacks) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            connected_at_millis: now_millis(),
            closed_at_millis: Mutex::new(None),
            last_activity_millis: AtomicI64::new(now_millis()),
            state: Mutex::new(ConnectionState::Open),
            closing: AtomicBool::new(false),
            close_fired: AtomicBool::new(false),
            send_queue: Mutex::new(VecDeque::new()),
            callbacks,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state mutex poisoned")
    }

    pub fn last_activity_millis(&self) -> i64 {
        self.last_activity_millis.load(Ordering::Relaxed)
    }

    fn mark_activity(&self) {
        self.last_activity_millis.store(now_millis(), Ordering::Relaxed);
    }

    /// Fires `open` once the connection is registered (§3 "Lifecycle").
    pub fn fire_open(&self) {
        (self.callbacks.on_open)(self);
    }

    /// Enqueues an unmasked frame for the driver to write. Fails once the
    /// queue is at capacity (§4.8 "Send discipline", a programming error
    /// per §9, not a recoverable condition).
    fn enqueue(&self, frame: WebSocketFrame) -> Result<(), WickError> {
        let bytes = frame.to_bytes();
        let mut queue = self.send_queue.lock().expect("send queue mutex poisoned");
        if queue.len() >= SEND_QUEUE_CAPACITY {
            return Err(WickError::Other(format!(
                "send queue for connection {} is full",
                self.id
            )));
        }
        queue.push_back(bytes);
        drop(queue);
        self.mark_activity();
        Ok(())
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), WickError> {
        self.enqueue(WebSocketFrame::text(text))
    }

    pub fn send_binary(&self, payload: Vec<u8>) -> Result<(), WickError> {
        self.enqueue(WebSocketFrame::binary(payload))
    }

    /// Enqueues a heartbeat ping (§4.9 "Heartbeat").
    pub fn send_ping(&self) -> Result<(), WickError> {
        self.enqueue(WebSocketFrame::ping(Vec::new()))
    }

    /// Pops the next pending outbound frame, if any, for the driver to write.
    pub fn pop_pending(&self) -> Option<Vec<u8>> {
        self.send_queue.lock().expect("send queue mutex poisoned").pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.send_queue.lock().expect("send queue mutex poisoned").is_empty()
    }

    /// Initiates a close, local or remote (§4.8 "States"). Enqueues an echo
    /// close frame the first time this is called for the connection.
    pub fn initiate_close(&self, code: u16, reason: &str) {
        let already_closing = self.closing.swap(true, Ordering::AcqRel);
        {
            let mut state = self.state.lock().expect("connection state mutex poisoned");
            if *state == ConnectionState::Open {
                *state = ConnectionState::Closing;
            }
        }
        if !already_closing {
            let _ = self.enqueue(WebSocketFrame::close(code, reason));
        }
    }

    /// Transitions to CLOSED and fires `onClose` exactly once (§3 invariant e).
    pub fn finish_close(&self, code: u16, reason: String) {
        let mut state = self.state.lock().expect("connection state mutex poisoned");
        *state = ConnectionState::Closed;
        drop(state);
        *self.closed_at_millis.lock().expect("closed_at mutex poisoned") = Some(now_millis());
        if !self.close_fired.swap(true, Ordering::AcqRel) {
            (self.callbacks.on_close)(self, code, reason);
        }
    }

    pub fn fire_error(&self, err: &WickError) {
        (self.callbacks.on_error)(self, err);
    }

    /// Dispatches one fully-parsed frame per §4.8's per-opcode table.
    /// Returns `Some((code, reason))` if this frame should drive the
    /// connection to CLOSED once the echo (if any) has been flushed.
    pub fn dispatch(&self, frame: WebSocketFrame) -> Option<(u16, String)> {
        self.mark_activity();
        match frame.opcode {
            OpCode::Text => {
                match String::from_utf8(frame.payload) {
                    Ok(text) => (self.callbacks.on_text)(self, text),
                    Err(_) => {
                        self.initiate_close(close_code::INVALID_DATA, "invalid utf-8 in text frame");
                    }
                }
                None
            }
            OpCode::Binary => {
                (self.callbacks.on_binary)(self, frame.payload);
                None
            }
            OpCode::Ping => {
                let _ = self.enqueue(WebSocketFrame::pong(frame.payload));
                None
            }
            OpCode::Pong => None,
            OpCode::Close => {
                let (code, reason) = WebSocketFrame::parse_close_payload(&frame.payload);
                let already_closing = self.closing.load(Ordering::Acquire);
                if !already_closing {
                    self.initiate_close(code, &reason);
                }
                Some((code, reason))
            }
            OpCode::Continuation => {
                self.initiate_close(close_code::PROTOCOL_ERROR, "fragmented messages are not supported");
                Some((close_code::PROTOCOL_ERROR, "continuation unsupported".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn silent_callbacks() -> Callbacks {
        Callbacks {
            on_text: Arc::new(|_c, _t| {}),
            on_binary: Arc::new(|_c, _b| {}),
            on_open: Arc::new(|_c| {}),
            on_close: Arc::new(|_c, _code, _reason| {}),
            on_error: Arc::new(|_c, _e| {}),
        }
    }

    #[test]
    fn send_respects_queue_capacity() {
        let conn = WebSocketConnection::new("127.0.0.1:1".to_string(), silent_callbacks());
        for _ in 0..SEND_QUEUE_CAPACITY {
            conn.send_text("x").unwrap();
        }
        assert!(conn.send_text("overflow").is_err());
    }

    #[test]
    fn close_dispatch_transitions_to_closing_then_closed() {
        let conn = WebSocketConnection::new("127.0.0.1:1".to_string(), silent_callbacks());
        assert_eq!(conn.state(), ConnectionState::Open);
        let result = conn.dispatch(WebSocketFrame::close(1000, "bye"));
        assert_eq!(conn.state(), ConnectionState::Closing);
        let (code, reason) = result.unwrap();
        assert_eq!(code, 1000);
        assert_eq!(reason, "bye");
        conn.finish_close(code, reason);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn close_callback_fires_exactly_once() {
        let fire_count = Arc::new(AtomicUsize::new(0));
        let counted = fire_count.clone();
        let callbacks = Callbacks {
            on_close: Arc::new(move |_c, _code, _reason| {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            ..silent_callbacks()
        };
        let conn = WebSocketConnection::new("127.0.0.1:1".to_string(), callbacks);
        conn.finish_close(1000, "bye".to_string());
        conn.finish_close(1000, "bye again".to_string());
        assert_eq!(fire_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ping_enqueues_matching_pong() {
        let conn = WebSocketConnection::new("127.0.0.1:1".to_string(), silent_callbacks());
        conn.dispatch(WebSocketFrame::ping(vec![1, 2, 3]));
        let pending = conn.pop_pending().unwrap();
        let (parsed, _) = WebSocketFrame::parse(&pending).unwrap();
        assert_eq!(parsed.opcode, OpCode::Pong);
        assert_eq!(parsed.payload, vec![1, 2, 3]);
    }

    #[test]
    fn continuation_frame_is_rejected_with_protocol_error() {
        let conn = WebSocketConnection::new("127.0.0.1:1".to_string(), silent_callbacks());
        let frame = WebSocketFrame {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode: OpCode::Continuation,
            masked: false,
            payload: vec![],
        };
        let result = conn.dispatch(frame);
        assert_eq!(result.unwrap().0, close_code::PROTOCOL_ERROR);
    }
}
