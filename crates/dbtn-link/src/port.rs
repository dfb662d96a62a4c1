//! Serial port enumeration and opening

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortBuilderExt, StopBits};

use dbtn_core::prelude::*;

/// Byte stream to a device: a serial port in production, a duplex pipe in tests
pub trait LinkIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> LinkIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased device stream
pub type LinkStream = Box<dyn LinkIo>;

/// Where candidate endpoints come from and how they are opened
pub trait PortProvider: Send + Sync {
    /// Names of all currently visible endpoints, in enumeration order
    fn available_ports(&self) -> Vec<String>;

    /// Open an endpoint exclusively
    fn open(&self, port_name: &str, baud_rate: u32) -> Result<LinkStream>;
}

/// [`PortProvider`] backed by the operating system's serial ports
#[derive(Debug, Clone, Default)]
pub struct SerialPortProvider;

impl SerialPortProvider {
    pub fn new() -> Self {
        Self
    }
}

impl PortProvider for SerialPortProvider {
    fn available_ports(&self) -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }

    fn open(&self, port_name: &str, baud_rate: u32) -> Result<LinkStream> {
        debug!("Opening serial port {} at {} baud", port_name, baud_rate);

        let mut stream = tokio_serial::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| Error::port_open(port_name, e.to_string()))?;

        // The firmware only starts talking once DTR/RTS are asserted
        if let Err(e) = stream.write_data_terminal_ready(true) {
            debug!("Could not assert DTR on {}: {}", port_name, e);
        }
        if let Err(e) = stream.write_request_to_send(true) {
            debug!("Could not assert RTS on {}: {}", port_name, e);
        }

        Ok(Box::new(stream))
    }
}
