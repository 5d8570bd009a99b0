//! # Serial Communication Module
//!
//! Opens the rotor controllers and the inertial/magnetic sensor.
//!
//! This module handles:
//! - Checking the device node exists before opening (fatal if absent)
//! - Opening ports 8N1, no flow control
//! - Async byte-level read/write via [`port_trait::SerialPortIO`]

pub mod port_trait;

use std::path::Path;

use crate::error::{MoonrakerError, Result};
use port_trait::TokioSerialPort;
use tracing::{debug, info};
use tokio_serial::SerialPortBuilderExt;

/// Baud rates accepted by the configuration loader
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400,
];

/// Open a serial device
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB0")
/// * `baud_rate` - Line speed
///
/// # Errors
///
/// * `DeviceNotFound` - the device node does not exist
/// * `Serial` - the OS refused to open or configure the port
///
/// # Examples
///
/// ```no_run
/// use moonraker::serial::open_port;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let port = open_port("/dev/ttyUSB0", 9600)?;
///     Ok(())
/// }
/// ```
pub fn open_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
    if !Path::new(path).exists() {
        return Err(MoonrakerError::DeviceNotFound(path.to_string()));
    }

    debug!("Opening serial port {} at {} baud", path, baud_rate);

    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| MoonrakerError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened serial device {} at {} baud", path, baud_rate);
    Ok(TokioSerialPort::new(port))
}
