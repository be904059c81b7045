//! Message framing for the com wire.
//!
//! ```text
//! [u32 BE magic][u32 BE total_length][u32 BE type][u32 BE request_id][payload bytes][NUL]
//! ```
//!
//! `total_length` covers the header, the payload and the trailing NUL and
//! must satisfy `HEADER_SIZE < total_length < MAX_MESSAGE_LENGTH`.

use crate::config::WireConfig;
use crate::{GlueError, Result};

/// Message type field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Result,
    Reserved1,
    Reserved2,
    Reserved3,
    Reserved4,
}

impl MessageType {
    pub fn to_u32(self) -> u32 {
        match self {
            MessageType::Request => 0,
            MessageType::Result => 1,
            MessageType::Reserved1 => 2,
            MessageType::Reserved2 => 3,
            MessageType::Reserved3 => 4,
            MessageType::Reserved4 => 5,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => MessageType::Request,
            1 => MessageType::Result,
            2 => MessageType::Reserved1,
            3 => MessageType::Reserved2,
            4 => MessageType::Reserved3,
            5 => MessageType::Reserved4,
            _ => return None,
        })
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub request: u32,
    pub payload: String,
}

/// Encode one frame.
pub fn encode_frame(kind: MessageType, request: u32, payload: &str) -> Result<Vec<u8>> {
    let total = WireConfig::HEADER_SIZE + payload.len() + 1;
    if total >= WireConfig::MAX_MESSAGE_LENGTH {
        return Err(GlueError::MessageTooLarge {
            len: total,
            limit: WireConfig::MAX_MESSAGE_LENGTH,
        });
    }
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&WireConfig::MAGIC.to_be_bytes());
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.extend_from_slice(&kind.to_u32().to_be_bytes());
    frame.extend_from_slice(&request.to_be_bytes());
    frame.extend_from_slice(payload.as_bytes());
    frame.push(0);
    Ok(frame)
}

/// Outcome of one attempt to pull a frame out of a [`FrameBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(Message),
    /// A well formed frame of a reserved type, already consumed.
    Skipped { kind: MessageType, request: u32 },
    /// More bytes are needed.
    Incomplete,
    /// The stream is corrupt; the buffer has been discarded.
    Invalid(String),
}

/// Accumulates partial reads and yields complete frames.
///
/// Decoded frames only advance a read offset; [`FrameBuffer::compact`]
/// drops the consumed prefix in one move.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    start: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffered bytes not yet decoded.
    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
    }

    /// Release the bytes of frames already returned.
    pub fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    /// Decode the next frame, if a complete one is buffered.
    pub fn next_frame(&mut self) -> Decoded {
        let data = &self.buf[self.start..];
        // magic + total_length + type
        if data.len() < 12 {
            return Decoded::Incomplete;
        }
        let magic = read_u32(data, 0);
        let total = read_u32(data, 4) as usize;
        let kind = read_u32(data, 8);

        if magic != WireConfig::MAGIC {
            self.clear();
            return Decoded::Invalid(format!("message with invalid magic: 0x{magic:08x}"));
        }
        if total <= WireConfig::HEADER_SIZE || total >= WireConfig::MAX_MESSAGE_LENGTH {
            self.clear();
            return Decoded::Invalid(format!(
                "message (type={kind}) with invalid length: {} < {total} < {}",
                WireConfig::HEADER_SIZE,
                WireConfig::MAX_MESSAGE_LENGTH
            ));
        }
        if data.len() < total {
            return Decoded::Incomplete;
        }
        let Some(kind) = MessageType::from_u32(kind) else {
            self.clear();
            return Decoded::Invalid(format!("message with invalid type: {kind}"));
        };

        let request = read_u32(data, 12);
        // the last byte is the NUL terminator
        let payload_end = total - 1;
        let decoded = match kind {
            MessageType::Request | MessageType::Result => Decoded::Message(Message {
                kind,
                request,
                payload: String::from_utf8_lossy(&data[WireConfig::HEADER_SIZE..payload_end])
                    .into_owned(),
            }),
            _ => Decoded::Skipped { kind, request },
        };
        self.start += total;
        decoded
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(MessageType::Result, 0x0102_0304, "ok").unwrap();
        assert_eq!(&frame[0..4], b"BSEm");
        assert_eq!(read_u32(&frame, 4) as usize, frame.len());
        assert_eq!(read_u32(&frame, 8), 1);
        assert_eq!(read_u32(&frame, 12), 0x0102_0304);
        assert_eq!(&frame[16..], b"ok\0");
    }

    #[test]
    fn test_decode_encoded_payloads() {
        let mut buffer = FrameBuffer::new();
        for payload in ["", "x", "[129,\"echo\"]", "ünïcödé"] {
            buffer.extend(&encode_frame(MessageType::Request, 9, payload).unwrap());
            assert_eq!(
                buffer.next_frame(),
                Decoded::Message(Message {
                    kind: MessageType::Request,
                    request: 9,
                    payload: payload.to_string(),
                })
            );
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_frames_wait_for_more() {
        let frame = encode_frame(MessageType::Request, 1, "hello").unwrap();
        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame[..10]);
        assert_eq!(buffer.next_frame(), Decoded::Incomplete);
        buffer.extend(&frame[10..20]);
        assert_eq!(buffer.next_frame(), Decoded::Incomplete);
        buffer.extend(&frame[20..]);
        assert!(matches!(buffer.next_frame(), Decoded::Message(_)));
    }

    #[test]
    fn test_bad_magic_discards_buffer() {
        let mut frame = encode_frame(MessageType::Request, 1, "x").unwrap();
        frame[0] = b'X';
        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame);
        assert!(matches!(buffer.next_frame(), Decoded::Invalid(_)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_bad_length_is_invalid() {
        let mut frame = encode_frame(MessageType::Request, 1, "x").unwrap();
        frame[4..8].copy_from_slice(&16u32.to_be_bytes());
        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame);
        assert!(matches!(buffer.next_frame(), Decoded::Invalid(_)));

        frame[4..8].copy_from_slice(&(WireConfig::MAX_MESSAGE_LENGTH as u32).to_be_bytes());
        buffer.extend(&frame);
        assert!(matches!(buffer.next_frame(), Decoded::Invalid(_)));
    }

    #[test]
    fn test_reserved_types_are_skipped() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&encode_frame(MessageType::Reserved2, 4, "zzz").unwrap());
        buffer.extend(&encode_frame(MessageType::Result, 5, "r").unwrap());
        assert_eq!(
            buffer.next_frame(),
            Decoded::Skipped {
                kind: MessageType::Reserved2,
                request: 4
            }
        );
        assert!(matches!(buffer.next_frame(), Decoded::Message(m) if m.request == 5));
    }

    #[test]
    fn test_unknown_type_is_invalid() {
        let mut frame = encode_frame(MessageType::Request, 1, "x").unwrap();
        frame[8..12].copy_from_slice(&6u32.to_be_bytes());
        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame);
        assert!(matches!(buffer.next_frame(), Decoded::Invalid(_)));
    }

    #[test]
    fn test_burst_is_consumed_by_offset_then_compacted() {
        let mut buffer = FrameBuffer::new();
        for n in 0..1000u32 {
            buffer.extend(&encode_frame(MessageType::Request, n + 1, "x").unwrap());
        }
        let stored = buffer.buf.len();
        for n in 0..1000u32 {
            assert!(matches!(buffer.next_frame(), Decoded::Message(m) if m.request == n + 1));
            // nothing is moved while frames are decoded
            assert_eq!(buffer.buf.len(), stored);
        }
        assert_eq!(buffer.next_frame(), Decoded::Incomplete);
        assert!(buffer.is_empty());

        buffer.compact();
        assert_eq!((buffer.buf.len(), buffer.start), (0, 0));
    }

    #[test]
    fn test_compact_keeps_partial_frame() {
        let first = encode_frame(MessageType::Result, 1, "one").unwrap();
        let second = encode_frame(MessageType::Result, 2, "two").unwrap();
        let mut buffer = FrameBuffer::new();
        buffer.extend(&first);
        buffer.extend(&second[..7]);
        assert!(matches!(buffer.next_frame(), Decoded::Message(m) if m.request == 1));
        buffer.compact();
        assert_eq!(buffer.len(), 7);
        buffer.extend(&second[7..]);
        assert!(matches!(buffer.next_frame(), Decoded::Message(m) if m.payload == "two"));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = "a".repeat(WireConfig::MAX_MESSAGE_LENGTH);
        assert!(matches!(
            encode_frame(MessageType::Request, 1, &payload),
            Err(GlueError::MessageTooLarge { .. })
        ));
    }
}
