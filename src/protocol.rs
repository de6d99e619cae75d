//! PLCBus wire protocol: command table, device addresses, outbound frames
//! and acknowledgement validation.
//!
//! Everything in this module is pure. Nothing here touches a serial port,
//! see [`crate::client`] for the exchange that drives the transport.
use std::fmt;
use std::str::FromStr;

/// Errors raised while resolving a request into protocol values.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    #[error("Unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    #[error("Invalid device address '{0}', expected house code A-P followed by unit 1-16")]
    InvalidAddress(String),
    #[error("Command {0} requires data1")]
    MissingData1(Command),
    #[error("Command {0} requires data2")]
    MissingData2(Command),
}

/// Start marker of every frame.
pub const STX: u8 = 0x02;
/// End marker of every frame.
pub const ETX: u8 = 0x03;
/// Length byte of an outbound frame (payload between length and `ETX`).
pub const OUTBOUND_LENGTH: u8 = 0x05;
/// Acknowledgement marker at offset 10 of an inbound frame.
pub const ACK: u8 = 0x06;
/// Bit set on the opcode when the sender requests an acknowledgement.
pub const ACK_BIT: u8 = 0x20;

/// Size of a frame sent to the bus.
pub const OUTBOUND_FRAME_LEN: usize = 8;
/// Size of an acknowledgement frame received from the bus.
pub const INBOUND_FRAME_LEN: usize = 18;

/// A PLCBus command. The discriminant is the wire opcode, which makes the
/// name/opcode mapping a bijection checked by the compiler.
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    ALL_UNITS_OFF = 0x00,
    ALL_LIGHTS_ON = 0x01,
    ON = 0x02,
    OFF = 0x03,
    DIM = 0x04,
    BRIGHT = 0x05,
    ALL_LIGHTS_OFF = 0x06,
    ALL_USER_LIGHTS_ON = 0x07,
    ALL_USER_UNITS_OFF = 0x08,
    ALL_USER_LIGHTS_OFF = 0x09,
    BLINK = 0x0a,
    FADE_STOP = 0x0b,
    PRESET_DIM = 0x0c,
    STATUS_ON = 0x0d,
    STATUS_OFF = 0x0e,
    STATUS_REQUEST = 0x0f,
    R_MASTER_ADDR_SETUP = 0x10,
    T_MASTER_ADDR_SETUP = 0x11,
    SCENE_ADDR_SETUP = 0x12,
    SCENE_ADDR_ERASE = 0x13,
    ALL_SCENES_ADDR_ERASE = 0x14,
    GET_SIGNAL_STRENGTH = 0x18,
    GET_NOISE_STRENGTH = 0x19,
    REPORT_SIGNAL_STRENGTH = 0x1a,
    REPORT_NOISE_STRENGTH = 0x1b,
    GET_ALL_ID_PULSE = 0x1c,
    GET_ON_ID_PULSE = 0x1d,
    REPORT_ALL_ID_PULSE = 0x1e,
    REPORT_ON_ID_PULSE = 0x1f,
}

impl Command {
    /// Every command, in opcode order.
    pub const ALL: [Command; 29] = [
        Command::ALL_UNITS_OFF,
        Command::ALL_LIGHTS_ON,
        Command::ON,
        Command::OFF,
        Command::DIM,
        Command::BRIGHT,
        Command::ALL_LIGHTS_OFF,
        Command::ALL_USER_LIGHTS_ON,
        Command::ALL_USER_UNITS_OFF,
        Command::ALL_USER_LIGHTS_OFF,
        Command::BLINK,
        Command::FADE_STOP,
        Command::PRESET_DIM,
        Command::STATUS_ON,
        Command::STATUS_OFF,
        Command::STATUS_REQUEST,
        Command::R_MASTER_ADDR_SETUP,
        Command::T_MASTER_ADDR_SETUP,
        Command::SCENE_ADDR_SETUP,
        Command::SCENE_ADDR_ERASE,
        Command::ALL_SCENES_ADDR_ERASE,
        Command::GET_SIGNAL_STRENGTH,
        Command::GET_NOISE_STRENGTH,
        Command::REPORT_SIGNAL_STRENGTH,
        Command::REPORT_NOISE_STRENGTH,
        Command::GET_ALL_ID_PULSE,
        Command::GET_ON_ID_PULSE,
        Command::REPORT_ALL_ID_PULSE,
        Command::REPORT_ON_ID_PULSE,
    ];

    /// The base opcode, without the acknowledgement bit.
    pub fn opcode(&self) -> u8 {
        *self as u8
    }

    /// The opcode as sent on the wire, with [`ACK_BIT`] set when
    /// [`Command::needs_ack`] is true.
    pub fn effective_opcode(&self) -> u8 {
        if self.needs_ack() {
            self.opcode() | ACK_BIT
        } else {
            self.opcode()
        }
    }

    /// The symbolic name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            Command::ALL_UNITS_OFF => "ALL_UNITS_OFF",
            Command::ALL_LIGHTS_ON => "ALL_LIGHTS_ON",
            Command::ON => "ON",
            Command::OFF => "OFF",
            Command::DIM => "DIM",
            Command::BRIGHT => "BRIGHT",
            Command::ALL_LIGHTS_OFF => "ALL_LIGHTS_OFF",
            Command::ALL_USER_LIGHTS_ON => "ALL_USER_LIGHTS_ON",
            Command::ALL_USER_UNITS_OFF => "ALL_USER_UNITS_OFF",
            Command::ALL_USER_LIGHTS_OFF => "ALL_USER_LIGHTS_OFF",
            Command::BLINK => "BLINK",
            Command::FADE_STOP => "FADE_STOP",
            Command::PRESET_DIM => "PRESET_DIM",
            Command::STATUS_ON => "STATUS_ON",
            Command::STATUS_OFF => "STATUS_OFF",
            Command::STATUS_REQUEST => "STATUS_REQUEST",
            Command::R_MASTER_ADDR_SETUP => "R_MASTER_ADDR_SETUP",
            Command::T_MASTER_ADDR_SETUP => "T_MASTER_ADDR_SETUP",
            Command::SCENE_ADDR_SETUP => "SCENE_ADDR_SETUP",
            Command::SCENE_ADDR_ERASE => "SCENE_ADDR_ERASE",
            Command::ALL_SCENES_ADDR_ERASE => "ALL_SCENES_ADDR_ERASE",
            Command::GET_SIGNAL_STRENGTH => "GET_SIGNAL_STRENGTH",
            Command::GET_NOISE_STRENGTH => "GET_NOISE_STRENGTH",
            Command::REPORT_SIGNAL_STRENGTH => "REPORT_SIGNAL_STRENGTH",
            Command::REPORT_NOISE_STRENGTH => "REPORT_NOISE_STRENGTH",
            Command::GET_ALL_ID_PULSE => "GET_ALL_ID_PULSE",
            Command::GET_ON_ID_PULSE => "GET_ON_ID_PULSE",
            Command::REPORT_ALL_ID_PULSE => "REPORT_ALL_ID_PULSE",
            Command::REPORT_ON_ID_PULSE => "REPORT_ON_ID_PULSE",
        }
    }

    /// Whether the command takes a data1 byte.
    pub fn needs_data1(&self) -> bool {
        matches!(self, Command::DIM | Command::BRIGHT | Command::BLINK) || self.needs_data2()
    }

    /// Whether the command takes a data2 byte as well.
    pub fn needs_data2(&self) -> bool {
        matches!(
            self,
            Command::PRESET_DIM
                | Command::STATUS_ON
                | Command::R_MASTER_ADDR_SETUP
                | Command::T_MASTER_ADDR_SETUP
                | Command::SCENE_ADDR_SETUP
                | Command::GET_SIGNAL_STRENGTH
                | Command::GET_NOISE_STRENGTH
        )
    }

    /// Whether the command is sent with [`ACK_BIT`] set.
    pub fn needs_ack(&self) -> bool {
        matches!(
            self,
            Command::ON
                | Command::OFF
                | Command::DIM
                | Command::BRIGHT
                | Command::BLINK
                | Command::FADE_STOP
                | Command::PRESET_DIM
                | Command::R_MASTER_ADDR_SETUP
                | Command::T_MASTER_ADDR_SETUP
                | Command::ALL_SCENES_ADDR_ERASE
                | Command::GET_SIGNAL_STRENGTH
                | Command::GET_NOISE_STRENGTH
        )
    }

    /// Commands that wipe scene programming on the receiving device.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Command::SCENE_ADDR_ERASE | Command::ALL_SCENES_ADDR_ERASE)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .find(|command| command.name() == s)
            .copied()
            .ok_or_else(|| Error::UnknownCommand(s.to_string()))
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        Command::ALL
            .iter()
            .find(|command| command.opcode() == opcode)
            .copied()
            .ok_or(Error::UnknownOpcode(opcode))
    }
}

/// Identity byte of the sending controller, echoed back by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCode(u8);

impl UserCode {
    pub const DEFAULT: UserCode = UserCode(0xA9);

    pub const fn new(code: u8) -> Self {
        Self(code)
    }
}

impl Default for UserCode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::ops::Deref for UserCode {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u8> for UserCode {
    fn from(code: u8) -> Self {
        Self(code)
    }
}

impl fmt::Display for UserCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// A device address such as `A1` or `P16`.
///
/// The house letter `A..P` maps to `0..15` and the 1-indexed unit number
/// maps to `0..15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    house_code: u8,
    unit_code: u8,
}

impl DeviceAddress {
    pub const HOUSE_CODES: std::ops::RangeInclusive<char> = 'A'..='P';
    pub const UNIT_MIN: u8 = 1;
    pub const UNIT_MAX: u8 = 16;

    pub fn house_code(&self) -> u8 {
        self.house_code
    }

    pub fn unit_code(&self) -> u8 {
        self.unit_code
    }

    /// The address byte placed on the wire.
    ///
    /// This is the sum of house and unit code, not a packed nibble pair.
    /// Devices answer to this value, so it is kept as is.
    pub fn device_byte(&self) -> u8 {
        self.house_code + self.unit_code
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAddress(label.to_string());
        let mut chars = label.chars();
        let house = chars.next().ok_or_else(invalid)?;
        if !Self::HOUSE_CODES.contains(&house) {
            return Err(invalid());
        }
        let unit = chars.as_str();
        if unit.is_empty() || !unit.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let unit = unit.parse::<u8>().map_err(|_| invalid())?;
        if !(Self::UNIT_MIN..=Self::UNIT_MAX).contains(&unit) {
            return Err(invalid());
        }
        Ok(Self {
            house_code: house as u8 - b'A',
            unit_code: unit - 1,
        })
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            (b'A' + self.house_code) as char,
            self.unit_code + 1
        )
    }
}

/// A validated request: everything needed to build the outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub device: DeviceAddress,
    pub command: Command,
    pub data1: u8,
    pub data2: u8,
}

impl Request {
    /// Checks that the data bytes the command requires are present.
    /// Data bytes the command ignores default to zero.
    pub fn new(
        device: DeviceAddress,
        command: Command,
        data1: Option<u8>,
        data2: Option<u8>,
    ) -> Result<Self, Error> {
        if command.needs_data1() && data1.is_none() {
            return Err(Error::MissingData1(command));
        }
        if command.needs_data2() && data2.is_none() {
            return Err(Error::MissingData2(command));
        }
        Ok(Self {
            device,
            command,
            data1: data1.unwrap_or_default(),
            data2: data2.unwrap_or_default(),
        })
    }

    /// Values the acknowledgement must echo back.
    pub fn expected(&self, user_code: UserCode) -> Expected {
        Expected {
            user_code,
            device_byte: self.device.device_byte(),
            effective_opcode: self.command.effective_opcode(),
        }
    }
}

/// The fixed 8-byte frame sent to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundPacket([u8; OUTBOUND_FRAME_LEN]);

impl OutboundPacket {
    pub fn build(
        command: Command,
        address: DeviceAddress,
        user_code: UserCode,
        data1: u8,
        data2: u8,
    ) -> Self {
        Self([
            STX,
            OUTBOUND_LENGTH,
            *user_code,
            address.device_byte(),
            command.effective_opcode(),
            data1,
            data2,
            ETX,
        ])
    }

    pub fn from_request(request: &Request, user_code: UserCode) -> Self {
        Self::build(
            request.command,
            request.device,
            user_code,
            request.data1,
            request.data2,
        )
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for OutboundPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.0)
    }
}

/// Echo values an acknowledgement frame is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub user_code: UserCode,
    pub device_byte: u8,
    pub effective_opcode: u8,
}

/// The status a device reported in its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedStatus {
    pub command: Command,
    pub data1: u8,
    pub data2: u8,
}

impl fmt::Display for DecodedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status {}, with Data1 {} and Data2 {}",
            self.command, self.data1, self.data2
        )
    }
}

/// The first rule an inbound frame broke.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("expected 18 bytes, got {0}")]
    Length(usize),
    #[error("missing start marker at offset 9")]
    StartMarker,
    #[error("neither checksum nor end marker is valid")]
    Trailer,
    #[error("missing acknowledgement marker at offset 10")]
    NotAcknowledged,
    #[error("user code 0x{0:02X} does not match")]
    UserCode(u8),
    #[error("device byte 0x{0:02X} does not match")]
    DeviceByte(u8),
    #[error("opcode 0x{0:02X} does not match")]
    Opcode(u8),
    #[error(transparent)]
    UnknownOpcode(#[from] Error),
}

/// Classification of one read from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Status(DecodedStatus),
    Invalid(FrameError),
    Empty,
}

/// Validates a raw inbound buffer against the values the device must echo.
pub fn validate_response(raw: &[u8], expected: &Expected) -> Response {
    if raw.is_empty() {
        return Response::Empty;
    }
    match decode_frame(raw, expected) {
        Ok(status) => Response::Status(status),
        Err(err) => Response::Invalid(err),
    }
}

fn decode_frame(raw: &[u8], expected: &Expected) -> Result<DecodedStatus, FrameError> {
    let frame: &[u8; INBOUND_FRAME_LEN] = raw
        .try_into()
        .map_err(|_| FrameError::Length(raw.len()))?;

    if frame[9] != STX {
        return Err(FrameError::StartMarker);
    }
    // Either condition is accepted on its own.
    let checksum = frame.iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
    if checksum != 0 && frame[17] != ETX {
        return Err(FrameError::Trailer);
    }
    if frame[10] != ACK {
        return Err(FrameError::NotAcknowledged);
    }
    if frame[11] != *expected.user_code {
        return Err(FrameError::UserCode(frame[11]));
    }
    if frame[12] != expected.device_byte {
        return Err(FrameError::DeviceByte(frame[12]));
    }
    if frame[13] != expected.effective_opcode {
        return Err(FrameError::Opcode(frame[13]));
    }

    Ok(DecodedStatus {
        command: Command::try_from(frame[13] & !ACK_BIT)?,
        data1: frame[14],
        data2: frame[15],
    })
}
