//! Wire framing: `[opcode: u8][length: u16 big endian][payload: length bytes]`.
//!
//! [`FrameDecoder`] is resumable. It checkpoints after the opcode and after
//! the length, so a frame split across any number of reads is reassembled
//! without re-reading fields it already consumed.

use crate::error::ProtocolError;
use crate::protocol::Message;
use crate::session::Session;
use std::sync::Arc;
use tracing::trace;

/// Size of the opcode and length prefix.
pub const HEADER_LEN: usize = 3;

/// Largest payload a 16 bit length prefix can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Appends one complete frame to `out`.
pub fn encode_frame(opcode: u8, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let length = u16::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge(payload.len()))?;
    out.reserve(HEADER_LEN + payload.len());
    out.push(opcode);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// A raw frame before protocol decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    ReadOpcode,
    ReadLength { opcode: u8 },
    ReadContent { opcode: u8, length: usize },
}

/// Incremental frame reader.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    buffer: Vec<u8>,
    // Start of the unconsumed bytes; consumed ones are compacted away on feed.
    position: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadOpcode,
            buffer: Vec::new(),
            position: 0,
        }
    }

    /// Buffers bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.position > 0 {
            self.buffer.drain(..self.position);
            self.position = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    fn take(&mut self, count: usize) -> Option<&[u8]> {
        let start = self.position;
        let end = start.checked_add(count)?;
        if end > self.buffer.len() {
            return None;
        }
        self.position = end;
        Some(&self.buffer[start..end])
    }

    /// Returns the next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.state {
                DecoderState::ReadOpcode => {
                    let opcode = self.take(1)?[0];
                    self.state = DecoderState::ReadLength { opcode };
                }
                DecoderState::ReadLength { opcode } => {
                    let length = self.take(2)?;
                    let length = u16::from_be_bytes([length[0], length[1]]) as usize;
                    self.state = DecoderState::ReadContent { opcode, length };
                }
                DecoderState::ReadContent { opcode, length } => {
                    let payload = self.take(length)?.to_vec();
                    self.state = DecoderState::ReadOpcode;
                    return Some(Frame { opcode, payload });
                }
            }
        }
    }

    /// Bytes received but not yet consumed by a frame field.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// True when the decoder sits on a frame boundary.
    pub fn is_idle(&self) -> bool {
        self.state == DecoderState::ReadOpcode && self.buffered() == 0
    }
}

/// Turns transport bytes into messages queued on a session.
///
/// Frames are decoded with whatever protocol the session holds at the time the
/// frame completes, and each queued message remembers that protocol. A session
/// without a protocol drops what it receives.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    frames: FrameDecoder,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` and queues every message they complete.
    ///
    /// # Returns
    ///
    /// The number of messages queued on `session`.
    pub fn decode(&mut self, session: &Session, bytes: &[u8]) -> Result<usize, ProtocolError> {
        self.frames.feed(bytes);
        let mut queued = 0;
        while let Some(frame) = self.frames.next_frame() {
            let Some(protocol) = session.protocol() else {
                trace!(session = %session.id(), opcode = frame.opcode, "Dropping frame, no protocol bound");
                continue;
            };
            let message: Arc<dyn Message> = Arc::from(protocol.decode(frame.opcode, &frame.payload)?);
            session.enqueue_inbound(protocol, message);
            queued += 1;
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_resumes_after_every_checkpoint() {
        let mut wire = Vec::new();
        encode_frame(0x01, b"PING", &mut wire).unwrap();
        encode_frame(0x00, b"", &mut wire).unwrap();
        assert_eq!(wire[..HEADER_LEN], [0x01, 0x00, 0x04]);

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &wire {
            decoder.feed(std::slice::from_ref(byte));
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame);
            }
        }

        assert_eq!(
            frames,
            vec![
                Frame { opcode: 0x01, payload: b"PING".to_vec() },
                Frame { opcode: 0x00, payload: Vec::new() },
            ]
        );
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_partial_header_is_kept_until_completed() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x07, 0x01]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 1);

        decoder.feed(&[0x00]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 0);

        decoder.feed(&vec![0xAB; 256]);
        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.opcode, 0x07);
        assert_eq!(frame.payload.len(), 256);
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_burst_of_small_frames_is_consumed_in_place() {
        let mut wire = Vec::new();
        for _ in 0..40_000 {
            encode_frame(0x03, b"", &mut wire).unwrap();
        }
        wire.extend_from_slice(&[0x01, 0x00]);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire);
        let mut count = 0;
        while let Some(frame) = decoder.next_frame() {
            assert_eq!(frame.opcode, 0x03);
            count += 1;
        }
        assert_eq!(count, 40_000);
        assert_eq!(decoder.buffered(), 1);
        assert_eq!(decoder.buffer.len(), wire.len());

        // Consumed bytes are dropped on the next feed.
        decoder.feed(&[0x02, b'h', b'i']);
        assert_eq!(decoder.buffer.len(), 3);
        assert_eq!(
            decoder.next_frame(),
            Some(Frame { opcode: 0x01, payload: b"hi".to_vec() })
        );
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_oversized_payloads_are_rejected() {
        let mut out = Vec::new();
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            encode_frame(0x02, &payload, &mut out),
            Err(ProtocolError::FrameTooLarge(len)) if len == MAX_PAYLOAD + 1
        ));
        assert!(out.is_empty());
    }
}
