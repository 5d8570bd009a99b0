//! # Sensor Frame Protocol
//!
//! Fixed-length binary frames emitted by the inertial/magnetic sensor.
//!
//! ```text
//! +------+------+----------------------------------+----------+
//! | 0x55 | type | v0 lo v0 hi v1 lo v1 hi v2 .. v3 | checksum |
//! +------+------+----------------------------------+----------+
//!   1B     1B     8B (four little-endian i16)         1B
//! ```
//!
//! The checksum is the sum of the first ten bytes modulo 256. Only the first
//! three values carry axis data; the fourth is temperature or firmware
//! version depending on the frame type and is not interpreted.

/// Every frame starts with this byte
pub const FRAME_HEADER: u8 = 0x55;

/// Total frame length including header and checksum
pub const FRAME_LEN: usize = 11;

/// Roll/pitch/yaw angle frame
pub const FRAME_TYPE_ANGLE: u8 = 0x53;

/// Raw magnetometer frame
pub const FRAME_TYPE_MAGNETIC: u8 = 0x54;

/// Full-scale raw value for angle frames (maps to 180°)
pub const ANGLE_FULL_SCALE: f64 = 32768.0;

/// Vehicle attitude in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attitude {
    /// Rotation about the forward axis
    pub roll: f64,
    /// Rotation about the lateral axis
    pub pitch: f64,
    /// Rotation about the vertical axis
    pub yaw: f64,
}

impl Attitude {
    /// Decode raw angle-frame values: `raw / 32768 * 180`
    #[must_use]
    pub fn from_raw(raw: [i16; 3]) -> Self {
        let scale = |v: i16| f64::from(v) / ANGLE_FULL_SCALE * 180.0;
        Self {
            roll: scale(raw[0]),
            pitch: scale(raw[1]),
            yaw: scale(raw[2]),
        }
    }
}

/// A checksum-valid frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Frame type byte
    pub frame_type: u8,
    /// Four little-endian signed values from the payload
    pub values: [i16; 4],
}

/// Interpretation of a frame's payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Attitude update
    Angle(Attitude),
    /// Raw magnetometer vector
    Magnetic([i16; 3]),
    /// Valid frame of a type this driver does not use
    Other(u8),
}

impl Frame {
    /// The three axis values
    #[must_use]
    pub fn axes(&self) -> [i16; 3] {
        [self.values[0], self.values[1], self.values[2]]
    }

    /// Interpret the payload according to the frame type
    #[must_use]
    pub fn reading(&self) -> Reading {
        match self.frame_type {
            FRAME_TYPE_ANGLE => Reading::Angle(Attitude::from_raw(self.axes())),
            FRAME_TYPE_MAGNETIC => Reading::Magnetic(self.axes()),
            other => Reading::Other(other),
        }
    }
}

/// Sum of bytes modulo 256
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Decode a complete frame
///
/// Returns `None` for anything that is not exactly one valid frame: wrong
/// length, wrong header, or checksum mismatch. Corruption is routine on a
/// live line and is not reported as an error.
///
/// # Examples
///
/// ```
/// use moonraker::imu::protocol::{decode_frame, encode_frame, FRAME_TYPE_MAGNETIC};
///
/// let bytes = encode_frame(FRAME_TYPE_MAGNETIC, [100, -200, 300, 0]);
/// let frame = decode_frame(&bytes).unwrap();
/// assert_eq!(frame.axes(), [100, -200, 300]);
/// ```
#[must_use]
pub fn decode_frame(bytes: &[u8]) -> Option<Frame> {
    if bytes.len() != FRAME_LEN || bytes[0] != FRAME_HEADER {
        return None;
    }

    if checksum(&bytes[..FRAME_LEN - 1]) != bytes[FRAME_LEN - 1] {
        return None;
    }

    let value = |i: usize| i16::from_le_bytes([bytes[2 + 2 * i], bytes[3 + 2 * i]]);

    Some(Frame {
        frame_type: bytes[1],
        values: [value(0), value(1), value(2), value(3)],
    })
}

/// Encode a frame with a correct checksum
#[must_use]
pub fn encode_frame(frame_type: u8, values: [i16; 4]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = FRAME_HEADER;
    frame[1] = frame_type;
    for (i, value) in values.iter().enumerate() {
        frame[2 + 2 * i..4 + 2 * i].copy_from_slice(&value.to_le_bytes());
    }
    frame[FRAME_LEN - 1] = checksum(&frame[..FRAME_LEN - 1]);
    frame
}
