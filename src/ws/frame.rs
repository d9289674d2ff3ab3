//! RFC 6455 frame parsing and serialization (§4.7).
use rand::RngCore;

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        self.as_u8() >= 0x8
    }
}

/// RFC 6455 close status codes (§4.8).
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const ABNORMAL: u16 = 1006;
    pub const INVALID_DATA: u16 = 1007;
    pub const POLICY: u16 = 1008;
    pub const TOO_LARGE: u16 = 1009;
    pub const SERVER_ERROR: u16 = 1011;
}

#[derive(Debug, Clone)]
pub struct WebSocketFrame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl WebSocketFrame {
    fn base(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload,
        }
    }

    pub fn text(payload: impl Into<String>) -> Self {
        Self::base(OpCode::Text, payload.into().into_bytes())
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Self::base(OpCode::Binary, payload)
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Self::base(OpCode::Ping, payload)
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::base(OpCode::Pong, payload)
    }

    /// Builds a close frame with a 2-byte big-endian status code prefix
    /// followed by the UTF-8 reason (§4.7 `createCloseFrame`).
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::base(OpCode::Close, payload)
    }

    /// Parses `(code, reason)` out of a CLOSE frame's payload, defaulting to
    /// `1000` when the payload is empty (§4.8 CLOSE dispatch).
    pub fn parse_close_payload(payload: &[u8]) -> (u16, String) {
        if payload.len() < 2 {
            return (close_code::NORMAL, String::new());
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        (code, reason)
    }

    /// Parses one frame from the front of `buf`, returning the frame and the
    /// number of bytes consumed. `ParseError::Incomplete` means the caller
    /// should read more bytes and retry (§4.7 "Parse").
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::Incomplete);
        }
        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & 0x80 != 0;
        let rsv1 = byte0 & 0x40 != 0;
        let rsv2 = byte0 & 0x20 != 0;
        let rsv3 = byte0 & 0x10 != 0;
        let opcode = OpCode::from_u8(byte0 & 0x0F).ok_or(ParseError::InvalidFormat)?;

        let masked = byte1 & 0x80 != 0;
        let len7 = byte1 & 0x7F;

        let mut cursor = 2usize;
        let payload_len: u64 = match len7 {
            126 => {
                if buf.len() < cursor + 2 {
                    return Err(ParseError::Incomplete);
                }
                let len = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]) as u64;
                cursor += 2;
                len
            }
            127 => {
                if buf.len() < cursor + 8 {
                    return Err(ParseError::Incomplete);
                }
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&buf[cursor..cursor + 8]);
                let len = u64::from_be_bytes(arr);
                if len & (1 << 63) != 0 {
                    return Err(ParseError::InvalidFormat);
                }
                cursor += 8;
                len
            }
            n => n as u64,
        };

        let mask_key = if masked {
            if buf.len() < cursor + 4 {
                return Err(ParseError::Incomplete);
            }
            let key = [buf[cursor], buf[cursor + 1], buf[cursor + 2], buf[cursor + 3]];
            cursor += 4;
            Some(key)
        } else {
            None
        };

        let payload_len = payload_len as usize;
        if buf.len() < cursor + payload_len {
            return Err(ParseError::Incomplete);
        }
        let mut payload = buf[cursor..cursor + payload_len].to_vec();
        if let Some(key) = mask_key {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }
        cursor += payload_len;

        Ok((
            Self {
                fin,
                rsv1,
                rsv2,
                rsv3,
                opcode,
                masked,
                payload,
            },
            cursor,
        ))
    }

    /// Serializes the frame. Server-to-client frames are never masked
    /// (§4.8 "Send discipline"); when `self.masked` is set, a fresh 4-byte
    /// mask is drawn from a CSPRNG and applied to the payload on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 14);

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        out.push(byte0);

        let len = self.payload.len();
        let mask_bit = if self.masked { 0x80 } else { 0x00 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if self.masked {
            let mut key = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut key);
            out.extend_from_slice(&key);
            out.extend(self.payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        } else {
            out.extend_from_slice(&self.payload);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_unmasked_text_frame() {
        let frame = WebSocketFrame::text("Hello, WebSocket!");
        let bytes = frame.to_bytes();
        let (parsed, consumed) = WebSocketFrame::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.opcode, OpCode::Text);
        assert!(parsed.fin);
        assert_eq!(parsed.payload, b"Hello, WebSocket!");
    }

    #[test]
    fn masked_round_trip_preserves_payload() {
        let mut frame = WebSocketFrame::binary(vec![1, 2, 3, 4, 5]);
        frame.masked = true;
        let bytes = frame.to_bytes();
        let (parsed, _) = WebSocketFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn incomplete_buffer_requests_more_bytes() {
        let frame = WebSocketFrame::text("hello world");
        let bytes = frame.to_bytes();
        assert!(matches!(
            WebSocketFrame::parse(&bytes[..bytes.len() - 1]),
            Err(ParseError::Incomplete)
        ));
    }

    #[test]
    fn close_frame_round_trips_code_and_reason() {
        for code in [1000u16, 1001, 4999] {
            let frame = WebSocketFrame::close(code, "bye");
            let (parsed_code, parsed_reason) = WebSocketFrame::parse_close_payload(&frame.payload);
            assert_eq!(parsed_code, code);
            assert_eq!(parsed_reason, "bye");
        }
    }

    #[test]
    fn long_payload_uses_extended_length_encoding() {
        let payload = vec![7u8; 70_000];
        let frame = WebSocketFrame::binary(payload.clone());
        let bytes = frame.to_bytes();
        assert_eq!(bytes[1] & 0x7F, 127);
        let (parsed, _) = WebSocketFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.payload, payload);
    }
}
