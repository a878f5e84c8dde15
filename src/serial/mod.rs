//! # Serial Communication Module
//!
//! Opens the modem's USB serial interfaces.
//!
//! The modem exposes several ttys. Two are used here:
//! - the AT command interface, driven by the network scanner
//! - the NMEA interface, read by the GNSS listener

pub mod port_trait;

use std::time::Duration;

use crate::error::{CellscanError, Result};
use port_trait::TokioSerialPort;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// Open a modem serial interface with 8N1 settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB2")
/// * `baud_rate` - Line rate; ignored by most USB CDC modems but required by termios
///
/// # Errors
///
/// Returns `Serial` error if the device cannot be opened
pub fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    debug!("Opening serial port: {}", path);

    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| CellscanError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened serial port {} at {} baud", path, baud_rate);
    Ok(port)
}

/// Open the AT command interface as a line port
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use cellscan::serial::open_at_port;
///
/// let port = open_at_port("/dev/ttyUSB2", 115200, Duration::from_secs(120))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open_at_port(path: &str, baud_rate: u32, response_timeout: Duration) -> Result<TokioSerialPort> {
    let stream = open_port(path, baud_rate)?;
    Ok(TokioSerialPort::new(stream, response_timeout))
}
