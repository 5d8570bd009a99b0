//! # Frame Reassembly
//!
//! Rebuilds fixed-length frames from the sensor's unbounded byte stream.
//!
//! The assembler has two states:
//!
//! - **Empty**: bytes are dropped until a header byte (`0x55`) arrives.
//! - **Accumulating**: every byte is appended, header or not, until the
//!   buffer holds [`FRAME_LEN`] bytes. The buffer is then handed out and the
//!   assembler returns to Empty, ready for the next header.
//!
//! The assembler does not validate checksums; a misaligned candidate fails
//! [`decode_frame`](super::protocol::decode_frame) and the stream
//! resynchronizes on a later header.

use super::protocol::{FRAME_HEADER, FRAME_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    Accumulating { buffer: [u8; FRAME_LEN], len: usize },
}

/// Byte-synchronous frame reassembler
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    state: State,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Creates an assembler in the Empty state.
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::Empty }
    }

    /// Whether a partial frame is buffered
    #[must_use]
    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, State::Accumulating { .. })
    }

    /// Feed one byte; returns a candidate frame once [`FRAME_LEN`] bytes
    /// have been collected.
    ///
    /// # Examples
    ///
    /// ```
    /// use moonraker::imu::framer::FrameAssembler;
    /// use moonraker::imu::protocol::{encode_frame, FRAME_TYPE_ANGLE};
    ///
    /// let mut assembler = FrameAssembler::new();
    /// let bytes = encode_frame(FRAME_TYPE_ANGLE, [0, 0, 0, 0]);
    ///
    /// let mut frames = Vec::new();
    /// for &b in [0x00, 0x13].iter().chain(bytes.iter()) {
    ///     if let Some(frame) = assembler.push(b) {
    ///         frames.push(frame);
    ///     }
    /// }
    /// assert_eq!(frames, vec![bytes]);
    /// ```
    pub fn push(&mut self, byte: u8) -> Option<[u8; FRAME_LEN]> {
        match &mut self.state {
            State::Empty => {
                if byte == FRAME_HEADER {
                    let mut buffer = [0u8; FRAME_LEN];
                    buffer[0] = byte;
                    self.state = State::Accumulating { buffer, len: 1 };
                }
                None
            }
            State::Accumulating { buffer, len } => {
                buffer[*len] = byte;
                *len += 1;

                if *len == FRAME_LEN {
                    let frame = *buffer;
                    self.state = State::Empty;
                    Some(frame)
                } else {
                    None
                }
            }
        }
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.state = State::Empty;
    }
}
