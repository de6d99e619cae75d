//! Blocking PLCBus client.
//!
//! [`PlcBus`] sends one request and drives the write/read/retry exchange
//! until the device acknowledges it or the attempts run out.
//!
//! ## Example
//!
//! ```no_run
//! use plcbus_lib::{client::{ExchangeConfig, Outcome, PlcBus}, protocol::Request};
//! use plcbus_lib::transport::SerialTransport;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExchangeConfig::default();
//!     let transport = SerialTransport::open("/dev/ttyUSB0", 9600, config.timeout)?;
//!     let mut bus = PlcBus::new(transport, config);
//!
//!     let request = Request::new("A1".parse()?, "ON".parse()?, None, None)?;
//!     match bus.send(&request)? {
//!         Outcome::Success(status) => println!("Device reported {status}"),
//!         Outcome::Exhausted { attempts } => println!("No valid answer after {attempts} attempts"),
//!     }
//!     Ok(())
//! }
//! ```
use crate::protocol::{self as proto, DecodedStatus, OutboundPacket, Request, Response};
use crate::transport::{Result, Transport};
use log::*;
use std::time::Duration;

/// Parameters of one command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub user_code: proto::UserCode,
    /// Number of write/read cycles before giving up.
    pub attempts: u8,
    /// How long each read waits for an acknowledgement.
    pub timeout: Duration,
    /// Pause between a failed attempt and the next write.
    pub delay: Duration,
}

impl ExchangeConfig {
    pub const DEFAULT_ATTEMPTS: u8 = 3;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(900);
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(125);
    /// Upper bound accepted for the read timeout and the delay.
    pub const MAX_DURATION: Duration = Duration::from_secs(60);
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            user_code: proto::UserCode::DEFAULT,
            attempts: Self::DEFAULT_ATTEMPTS,
            timeout: Self::DEFAULT_TIMEOUT,
            delay: Self::DEFAULT_DELAY,
        }
    }
}

/// Terminal result of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The device acknowledged the command and reported this status.
    Success(DecodedStatus),
    /// No valid acknowledgement arrived within the configured attempts.
    Exhausted { attempts: u8 },
}

enum State {
    Attempting(u8),
    Done(Outcome),
}

/// Synchronous PLCBus client over any [`Transport`].
#[derive(Debug)]
pub struct PlcBus<T> {
    transport: T,
    config: ExchangeConfig,
}

impl<T: Transport> PlcBus<T> {
    pub fn new(transport: T, config: ExchangeConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Sends `request` and logs every failed attempt.
    pub fn send(&mut self, request: &Request) -> Result<Outcome> {
        self.send_with(request, |attempt, response| match response {
            Response::Invalid(err) => {
                warn!("Attempt {attempt}: a packet was received, but it was not a valid response ({err})")
            }
            Response::Empty => warn!("Attempt {attempt}: no response received"),
            Response::Status(_) => {}
        })
    }

    /// Sends `request`, calling `observer` with the classification of
    /// every read.
    ///
    /// Each attempt writes the frame, then reads once. A valid
    /// acknowledgement ends the exchange immediately. Otherwise the client
    /// waits [`ExchangeConfig::delay`] and tries again, up to
    /// [`ExchangeConfig::attempts`] times.
    ///
    /// # Errors
    ///
    /// Only transport failures are errors. A read timeout is
    /// [`Response::Empty`], not an error.
    pub fn send_with<F>(&mut self, request: &Request, mut observer: F) -> Result<Outcome>
    where
        F: FnMut(u8, &Response),
    {
        let packet = OutboundPacket::from_request(request, self.config.user_code);
        let expected = request.expected(self.config.user_code);
        let attempts = self.config.attempts.max(1);
        info!(
            "Sending {} to {} (data1 {}, data2 {})",
            request.command, request.device, request.data1, request.data2
        );

        let mut state = State::Attempting(1);
        loop {
            state = match state {
                State::Done(outcome) => return Ok(outcome),
                State::Attempting(attempt) => {
                    debug!("Attempt {attempt}/{attempts}: writing {packet}");
                    self.transport.write(packet.as_bytes())?;
                    let raw = self.transport.read(self.config.timeout)?;
                    trace!("Attempt {attempt}/{attempts}: received {raw:02X?}");
                    let response = proto::validate_response(&raw, &expected);
                    observer(attempt, &response);
                    match response {
                        Response::Status(status) => State::Done(Outcome::Success(status)),
                        Response::Invalid(_) | Response::Empty if attempt < attempts => {
                            std::thread::sleep(self.config.delay);
                            State::Attempting(attempt + 1)
                        }
                        Response::Invalid(_) | Response::Empty => {
                            State::Done(Outcome::Exhausted { attempts })
                        }
                    }
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Expected, FrameError, UserCode};
    use crate::transport::Error;
    use assert_matches::assert_matches;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Scripted transport: every read pops the next reply, an exhausted
    /// script reads as a timeout.
    #[derive(Default)]
    struct MockTransport {
        replies: VecDeque<Vec<u8>>,
        writes: Vec<(Instant, Vec<u8>)>,
        fail_writes: bool,
    }

    impl MockTransport {
        fn with_replies<I: IntoIterator<Item = Vec<u8>>>(replies: I) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
            }
            self.writes.push((Instant::now(), bytes.to_vec()));
            Ok(())
        }

        fn read(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
            Ok(self.replies.pop_front().unwrap_or_default())
        }
    }

    fn request(device: &str, command: Command) -> Request {
        Request::new(device.parse().unwrap(), command, Some(0), Some(0)).unwrap()
    }

    fn ack(expected: &Expected, data1: u8, data2: u8) -> Vec<u8> {
        let mut frame = vec![0u8; proto::INBOUND_FRAME_LEN];
        frame[9] = proto::STX;
        frame[10] = proto::ACK;
        frame[11] = *expected.user_code;
        frame[12] = expected.device_byte;
        frame[13] = expected.effective_opcode;
        frame[14] = data1;
        frame[15] = data2;
        frame[17] = proto::ETX;
        frame
    }

    #[test]
    fn success_on_first_attempt_stops() {
        let on = request("A1", Command::ON);
        let reply = ack(&on.expected(UserCode::DEFAULT), 100, 0);
        let mut mock = MockTransport::with_replies([reply, Vec::new()]);
        let mut bus = PlcBus::new(&mut mock, ExchangeConfig::default());

        let outcome = bus.send(&on).unwrap();
        assert_eq!(
            outcome,
            Outcome::Success(DecodedStatus {
                command: Command::ON,
                data1: 100,
                data2: 0
            })
        );
        assert_eq!(mock.writes.len(), 1);
        assert_eq!(
            mock.writes[0].1,
            [0x02, 0x05, 0xA9, 0x00, 0x22, 0x00, 0x00, 0x03]
        );
        assert_eq!(mock.replies.len(), 1);
    }

    #[test]
    fn success_after_invalid_and_empty() {
        let dim = request("B3", Command::DIM);
        let expected = dim.expected(UserCode::DEFAULT);
        let replies = [vec![0xFF; 4], Vec::new(), ack(&expected, 42, 1)];
        let mut mock = MockTransport::with_replies(replies);
        let mut seen = Vec::new();

        let outcome = PlcBus::new(&mut mock, ExchangeConfig::default())
            .send_with(&dim, |attempt, response| seen.push((attempt, response.clone())))
            .unwrap();

        assert_matches!(outcome, Outcome::Success(DecodedStatus { command: Command::DIM, data1: 42, data2: 1 }));
        assert_eq!(mock.writes.len(), 3);
        assert_eq!(seen[0], (1, Response::Invalid(FrameError::Length(4))));
        assert_eq!(seen[1], (2, Response::Empty));
        assert_matches!(seen[2], (3, Response::Status(_)));
    }

    #[test]
    fn exhausts_after_three_empty_reads() {
        let off = request("P16", Command::OFF);
        let mut mock = MockTransport::default();
        let started = Instant::now();

        let outcome = PlcBus::new(&mut mock, ExchangeConfig::default())
            .send(&off)
            .unwrap();

        assert_eq!(outcome, Outcome::Exhausted { attempts: 3 });
        assert_eq!(mock.writes.len(), 3);
        for pair in mock.writes.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap >= ExchangeConfig::DEFAULT_DELAY, "gap {gap:?}");
            assert!(gap < Duration::from_millis(500), "gap {gap:?}");
        }
        // No pause after the final attempt.
        assert!(started.elapsed() < Duration::from_millis(2 * 125 + 400));
    }

    #[test]
    fn mismatched_echo_is_retried() {
        let on = request("A1", Command::ON);
        let other = request("A2", Command::ON).expected(UserCode::DEFAULT);
        let mut mock = MockTransport::with_replies(vec![ack(&other, 0, 0); 3]);
        let config = ExchangeConfig {
            delay: Duration::ZERO,
            ..Default::default()
        };
        let mut failures = 0;

        let outcome = PlcBus::new(&mut mock, config)
            .send_with(&on, |_, response| {
                assert_matches!(response, Response::Invalid(FrameError::DeviceByte(1)));
                failures += 1;
            })
            .unwrap();

        assert_eq!(outcome, Outcome::Exhausted { attempts: 3 });
        assert_eq!(failures, 3);
    }

    #[test]
    fn configured_attempts_and_user_code() {
        let on = request("A1", Command::ON);
        let config = ExchangeConfig {
            user_code: UserCode::new(0x42),
            attempts: 5,
            delay: Duration::ZERO,
            ..Default::default()
        };
        let mut mock = MockTransport::default();

        let outcome = PlcBus::new(&mut mock, config).send(&on).unwrap();

        assert_eq!(outcome, Outcome::Exhausted { attempts: 5 });
        assert_eq!(mock.writes.len(), 5);
        assert!(mock.writes.iter().all(|(_, frame)| frame[2] == 0x42));
    }

    #[test]
    fn transport_failure_aborts() {
        let mut mock = MockTransport {
            fail_writes: true,
            ..Default::default()
        };
        let result = PlcBus::new(&mut mock, ExchangeConfig::default()).send(&request("A1", Command::ON));
        assert_matches!(result, Err(Error::Transport(_)));
        assert!(mock.writes.is_empty());
    }
}
