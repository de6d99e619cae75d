//! Byte transport used by the exchange and the error type shared by the
//! library.
//!
//! The [`Transport`] trait is the only thing [`crate::client::PlcBus`]
//! needs. With the `serial` feature, [`SerialTransport`] implements it on
//! top of `tokio-serial`.
use crate::protocol as proto;
use std::time::Duration;

/// Represents all possible errors that can occur while talking to the bus.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `std::io::Error` raised by the transport.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Wraps `tokio_serial::Error` raised while opening or configuring a port.
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

/// The result type for bus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A duplex byte channel to the PLCBus interface.
pub trait Transport {
    /// Writes a complete frame. Writes are not acknowledged by the transport.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Collects whatever arrives within `timeout`.
    ///
    /// An expired timeout is not an error: it yields an empty buffer.
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read(timeout)
    }
}

/// The baud rate of PLCBus serial interfaces.
pub const BAUD_RATE: u32 = 9600;

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub use serial::*;

#[cfg(feature = "serial")]
mod serial {
    use super::{Result, Transport};
    use log::*;
    use std::io::{ErrorKind, Read, Write};
    use std::time::{Duration, Instant};
    use tokio_serial::SerialPort;

    /// The parity used for serial communication.
    pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
    /// The number of stop bits used for serial communication.
    pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
    /// The number of data bits used for serial communication.
    pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

    /// Creates a `tokio_serial::SerialPortBuilder` with the specified settings.
    ///
    /// # Arguments
    ///
    /// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
    /// * `baud_rate` - The baud rate for the serial communication.
    pub fn serial_port_builder(device: &str, baud_rate: u32) -> tokio_serial::SerialPortBuilder {
        tokio_serial::new(device, baud_rate)
            .parity(*PARITY)
            .stop_bits(*STOP_BITS)
            .data_bits(*DATA_BITS)
            .flow_control(tokio_serial::FlowControl::None)
    }

    /// A serial transport holding two handles on the same device.
    ///
    /// The interface drops bytes when one handle interleaves writes and
    /// reads, so one handle only writes and the other only reads.
    pub struct SerialTransport {
        writer: Box<dyn SerialPort>,
        reader: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Opens the read and write handles on `device`.
        pub fn open(device: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
            let builder = serial_port_builder(device, baud_rate).timeout(timeout);
            debug!("Opening {device} at {baud_rate} baud for reading");
            let reader = builder.clone().open()?;
            debug!("Opening {device} at {baud_rate} baud for writing");
            let writer = builder.open()?;
            Ok(Self { writer, reader })
        }
    }

    /// The instant a read started at `now` must give up.
    fn read_deadline(now: Instant, timeout: Duration) -> std::io::Result<Instant> {
        now.checked_add(timeout).ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("read timeout {timeout:?} is out of range"),
            )
        })
    }

    impl std::fmt::Debug for SerialTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SerialTransport")
                .field("port", &self.writer.name())
                .finish()
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.writer.write_all(bytes)?;
            self.writer.flush()?;
            Ok(())
        }

        fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
            let deadline = read_deadline(Instant::now(), timeout)?;
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                self.reader.set_timeout(remaining)?;
                match self.reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(err) if err.kind() == ErrorKind::TimedOut => break,
                    Err(err) => return Err(err.into()),
                }
            }
            trace!("Read {} bytes: {:02X?}", received.len(), received);
            Ok(received)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn read_deadline_bounds() {
            let now = Instant::now();
            assert_eq!(
                read_deadline(now, Duration::from_millis(900)).unwrap(),
                now + Duration::from_millis(900)
            );
            let err = read_deadline(now, Duration::MAX).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }
}
