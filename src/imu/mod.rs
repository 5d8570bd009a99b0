//! # Inertial/Magnetic Sensor
//!
//! This module handles:
//! - Decoding the sensor's 11-byte binary frames ([`protocol`])
//! - Rebuilding frames from the raw byte stream ([`framer`])
//! - Calibrated, tilt-compensated true heading ([`heading`])
//! - The background reader and raw capture for calibration ([`driver`])

pub mod driver;
pub mod framer;
pub mod heading;
pub mod protocol;

pub use driver::ImuDriver;
pub use protocol::Attitude;
