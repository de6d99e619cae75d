//! A library for sending commands to PLCBus home-automation devices over a
//! serial interface.
//!
//! The crate is split in three layers:
//!
//! 1.  [`protocol`]: the pure wire protocol. It covers the command table,
//!     device addresses (`A1` .. `P16`), the 8-byte outbound frame and the
//!     validation of the 18-byte acknowledgement frame.
//! 2.  [`transport`]: the [`transport::Transport`] trait and, with the
//!     `serial` feature, a serial implementation that uses separate read
//!     and write handles.
//! 3.  [`client`]: [`client::PlcBus`], which runs the bounded
//!     write/read/retry exchange and returns a terminal
//!     [`client::Outcome`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use plcbus_lib::{
//!     client::{ExchangeConfig, Outcome, PlcBus},
//!     protocol::{Command, DeviceAddress, Request},
//!     transport::SerialTransport,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExchangeConfig::default();
//!     let transport = SerialTransport::open("/dev/ttyUSB0", 9600, config.timeout)?;
//!     let mut bus = PlcBus::new(transport, config);
//!
//!     let device: DeviceAddress = "B4".parse()?;
//!     let request = Request::new(device, Command::PRESET_DIM, Some(60), Some(2))?;
//!     if let Outcome::Success(status) = bus.send(&request)? {
//!         println!("Device {device} reported {status}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod protocol;
pub mod transport;
