//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;

/// Longest terminated response kept before it is treated as line noise
pub const MAX_RESPONSE_LEN: usize = 64;

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read a single byte, waiting until one arrives
    async fn read_byte(&mut self) -> io::Result<u8>;

    /// Read bytes up to and including `terminator`
    ///
    /// Runs longer than [`MAX_RESPONSE_LEN`] are discarded and reading
    /// restarts, so a chattering line cannot grow the buffer without bound.
    async fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(16);
        loop {
            let byte = self.read_byte().await?;
            buffer.push(byte);
            if byte == terminator {
                return Ok(buffer);
            }
            if buffer.len() >= MAX_RESPONSE_LEN {
                buffer.clear();
            }
        }
    }
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn read_byte(&mut self) -> io::Result<u8> {
        use tokio::io::AsyncReadExt;
        self.port.read_u8().await
    }
}
