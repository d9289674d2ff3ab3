//! RFC 6455 WebSocket endpoint: handshake, frame codec, connection state
//! machine, and the epoll/kqueue-driven server loop (§3, §4, §5).
pub mod connection;
pub mod frame;
pub mod handshake;
mod server;
mod slab;
mod syscalls;

pub use connection::{Callbacks, ConnectionState, WebSocketConnection};
pub use frame::{close_code, OpCode, WebSocketFrame};
pub use server::{WsHandle, WsServer};
