//! Length-prefixed frame layer
//!
//! Frame format:
//! ```text
//! +---------------+------------------+
//! | length        | payload          |
//! | (2 bytes, BE) | (length bytes)   |
//! +---------------+------------------+
//! ```
//!
//! A frame of length 0 is valid and carries an empty payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

/// Frame header size: 2-byte big-endian payload length
pub const FRAME_HEADER_LEN: usize = 2;

/// Maximum frame payload size (everything a u16 length can describe)
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Append one framed payload to `buf`
pub fn encode_frame(payload: &[u8], buf: &mut BytesMut) -> io::Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame payload too large: {} bytes (max: {})",
                payload.len(),
                MAX_PAYLOAD_LEN
            ),
        ));
    }

    buf.reserve(FRAME_HEADER_LEN + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(())
}

/// Streaming frame decoder
///
/// Buffers bytes fed from the socket and yields complete payloads strictly
/// in arrival order. `pending_len` remembers a header whose payload has not
/// fully arrived yet, so a frame may span any number of reads.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
    pending_len: Option<usize>,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            pending_len: None,
        }
    }

    /// Feed received data into the codec
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete payload, or None if more data is needed
    pub fn next_payload(&mut self) -> Option<Bytes> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if self.buffer.len() < FRAME_HEADER_LEN {
                    return None;
                }
                let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
                self.buffer.advance(FRAME_HEADER_LEN);
                self.pending_len = Some(len);
                len
            }
        };

        if self.buffer.len() < len {
            return None;
        }

        self.pending_len = None;
        Some(self.buffer.split_to(len).freeze())
    }

    /// Number of bytes buffered but not yet consumed as payloads
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
