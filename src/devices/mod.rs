//! Opening the serial port an XBee radio sits behind.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

use crate::errors::DeviceError;

pub mod ports;

/// The read timeout of an opened serial port in milliseconds.
/// The protocol driver polls, so reads must come back quickly.
pub const SERIAL_TIMEOUT_MS: u64 = 10;

/// The longest device path accepted by `SerialConfig`.
pub const MAX_DEVICE_PATH: usize = 64;

/// Interface data rates an XBee can be configured for.
pub const SUPPORTED_BAUD_RATES: [u32; 11] = [
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Where and how fast to talk to a radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    baud_rate: u32,
    device_path: String,
}

impl SerialConfig {
    /// Creates a serial configuration.
    ///
    /// # Errors
    ///
    /// * `EmptyPath` - `device_path` is empty
    /// * `PathTooLong` - `device_path` is longer than `MAX_DEVICE_PATH` bytes
    /// * `UnsupportedBaud` - `baud_rate` is not in `SUPPORTED_BAUD_RATES`
    pub fn new(device_path: impl Into<String>, baud_rate: u32) -> Result<SerialConfig, DeviceError> {
        let device_path = device_path.into();

        if device_path.is_empty() {
            return Err(DeviceError::EmptyPath);
        }
        if device_path.len() > MAX_DEVICE_PATH {
            return Err(DeviceError::PathTooLong {
                len: device_path.len(),
                max: MAX_DEVICE_PATH,
            });
        }
        if !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(DeviceError::UnsupportedBaud(baud_rate));
        }

        Ok(SerialConfig {
            baud_rate,
            device_path,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

/// Byte level access to a named serial device.
pub trait Transport {
    type Port: Read + Write;

    /// Opens the device described by `config`.
    fn open(&mut self, config: &SerialConfig) -> Result<Self::Port, DeviceError>;

    /// Closes a port previously returned by `open`.
    fn close(&mut self, port: Self::Port);
}

/// A `Transport` backed by the operating system's serial ports.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    timeout: Duration,
}

impl SerialTransport {
    pub fn new() -> Self {
        SerialTransport {
            timeout: Duration::from_millis(SERIAL_TIMEOUT_MS),
        }
    }

    /// Overrides the read timeout of the ports this transport opens.
    pub fn with_timeout(timeout: Duration) -> Self {
        SerialTransport { timeout }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        SerialTransport::new()
    }
}

impl Transport for SerialTransport {
    type Port = Box<dyn SerialPort>;

    fn open(&mut self, config: &SerialConfig) -> Result<Self::Port, DeviceError> {
        debug!(
            "Opening {} at {} baud",
            config.device_path(),
            config.baud_rate()
        );

        // XBee radios talk 8N1 without flow control out of the box.
        // On unix the port is opened for exclusive access.
        let port = serialport::new(config.device_path(), config.baud_rate())
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.timeout)
            .open()?;

        Ok(port)
    }

    fn close(&mut self, port: Self::Port) {
        debug!("Closing {}", port.name().unwrap_or_default());
        drop(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_validates() {
        let config = SerialConfig::new("/dev/ttyS0", 115200).unwrap();
        assert_eq!(config.device_path(), "/dev/ttyS0");
        assert_eq!(config.baud_rate(), 115200);

        assert!(matches!(
            SerialConfig::new("", 115200),
            Err(DeviceError::EmptyPath)
        ));
        assert!(matches!(
            SerialConfig::new("/dev/ttyS0", 12345),
            Err(DeviceError::UnsupportedBaud(12345))
        ));
        assert!(matches!(
            SerialConfig::new("x".repeat(MAX_DEVICE_PATH + 1), 9600),
            Err(DeviceError::PathTooLong { .. })
        ));
    }
}
