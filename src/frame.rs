//! Binary frame codec.
//!
//! Version 0 (7 bytes):
//! `sender, receiver, ack, key, value int, value frac, parity`
//!
//! Version 1 (9 bytes):
//! `sender, receiver, ack | version << 1, size, key, value int, value frac, crc low, crc high`
//!
//! The version shares a byte with the acknowledge flag, so the receiver knows
//! the layout after the third byte.

use arrayvec::ArrayVec;
use core::convert::TryFrom;
use core::fmt;

use crate::checksum::{crc16, parity};
use crate::types::{Address, Key, Value, ValueKind, Version};

/// Size of a version 0 frame.
pub const FRAME_SIZE_V0: usize = 7;
/// Size of a version 1 frame, and the receive buffer size.
pub const FRAME_SIZE_V1: usize = 9;
pub const MAX_FRAME_SIZE: usize = FRAME_SIZE_V1;

const VERSION_SHIFT: u8 = 1;
const ACK_MASK: u8 = 0x01;

/// Encoded frame, ready for the wire.
pub type FrameBytes = ArrayVec<u8, MAX_FRAME_SIZE>;

/// Version specific part of a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Format {
    /// Legacy frame with a parity byte.
    V0,
    /// Frame with a declared size and CRC16.
    V1 { size: u8 },
}

impl Format {
    pub const fn for_version(version: Version) -> Self {
        match version {
            Version::V0 => Format::V0,
            Version::V1 => Format::V1 {
                size: FRAME_SIZE_V1 as u8,
            },
        }
    }

    pub const fn version(self) -> Version {
        match self {
            Format::V0 => Version::V0,
            Format::V1 { .. } => Version::V1,
        }
    }

    /// Number of bytes on the wire.
    pub const fn frame_size(self) -> usize {
        match self {
            Format::V0 => FRAME_SIZE_V0,
            Format::V1 { .. } => FRAME_SIZE_V1,
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::for_version(Version::LATEST)
    }
}

/// Reasons why a receive buffer didn't hold a valid frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// Nothing was received. Not a bus fault.
    NoData,
    /// The byte count doesn't match the frame version.
    InvalidLength { received: u8 },
    /// Parity or CRC mismatch. `key` is the raw key byte, for diagnostics.
    CheckFailed { key: u8 },
    /// Version bits outside of the supported range.
    UnsupportedVersion { version: u8 },
    /// An address byte with the high bit set.
    InvalidAddress { address: u8 },
    /// Text input that isn't a complete object with a key.
    Malformed,
}

impl ReceiveError {
    /// Diagnostic code reported to the server with [`Key::RECEIVE_ERROR`].
    pub fn code(self) -> u16 {
        match self {
            ReceiveError::NoData => 0,
            ReceiveError::InvalidLength { received } => 0x0100 + u16::from(received),
            ReceiveError::CheckFailed { key } => 0x0200 + u16::from(key),
            ReceiveError::UnsupportedVersion { version } => 0x0300 + u16::from(version),
            ReceiveError::InvalidAddress { address } => 0x0400 + u16::from(address),
            ReceiveError::Malformed => 0x0500,
        }
    }
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveError::NoData => write!(f, "no data"),
            ReceiveError::InvalidLength { received } => {
                write!(f, "invalid frame length {}", received)
            }
            ReceiveError::CheckFailed { key } => write!(f, "check failed (key 0x{:02x})", key),
            ReceiveError::UnsupportedVersion { version } => {
                write!(f, "unsupported version {}", version)
            }
            ReceiveError::InvalidAddress { address } => {
                write!(f, "invalid address 0x{:02x}", address)
            }
            ReceiveError::Malformed => write!(f, "malformed text frame"),
        }
    }
}

/// One message on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    sender: Address,
    receiver: Address,
    acknowledge: bool,
    key: Key,
    value: Value,
    format: Format,
}

impl Frame {
    /// Create a frame in the latest format.
    pub fn new(key: impl Into<Key>, value: impl Into<Value>, sender: Address, receiver: Address) -> Self {
        Self {
            sender,
            receiver,
            acknowledge: false,
            key: key.into(),
            value: value.into(),
            format: Format::default(),
        }
    }

    /// Request an echo from the receiver.
    pub fn with_acknowledge(mut self, acknowledge: bool) -> Self {
        self.acknowledge = acknowledge;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.format = Format::for_version(version);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// The frame to send back when the sender requested an acknowledge.
    ///
    /// Addresses are swapped, the acknowledge flag is cleared.
    pub fn reply(&self) -> Self {
        Self {
            sender: self.receiver,
            receiver: self.sender,
            acknowledge: false,
            ..*self
        }
    }

    pub const fn sender(&self) -> Address {
        self.sender
    }

    pub const fn receiver(&self) -> Address {
        self.receiver
    }

    pub const fn acknowledge(&self) -> bool {
        self.acknowledge
    }

    pub const fn key(&self) -> Key {
        self.key
    }

    pub const fn value(&self) -> Value {
        self.value
    }

    pub const fn format(&self) -> Format {
        self.format
    }

    pub const fn version(&self) -> Version {
        self.format.version()
    }

    pub const fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// True for token ring arbitration frames.
    pub fn is_token(&self) -> bool {
        self.key == Key::TOKEN
    }

    fn ack_byte(&self) -> u8 {
        u8::from(self.acknowledge) | (u8::from(self.version()) << VERSION_SHIFT)
    }

    /// CRC16 over the first seven bytes of the version 1 layout.
    pub fn crc(&self) -> u16 {
        let size = match self.format {
            Format::V1 { size } => size,
            Format::V0 => FRAME_SIZE_V1 as u8,
        };
        crc16(&[
            *self.sender,
            *self.receiver,
            u8::from(self.acknowledge) | (1 << VERSION_SHIFT),
            size,
            self.key.0,
            self.value.int_part(),
            self.value.frac_part(),
        ])
    }

    /// Serialize the frame in its own format.
    pub fn encode(&self) -> FrameBytes {
        let mut data = FrameBytes::new();
        data.push(*self.sender);
        data.push(*self.receiver);
        data.push(self.ack_byte());
        match self.format {
            Format::V0 => {
                data.push(self.key.0);
                data.push(self.value.int_part());
                data.push(self.value.frac_part());
                data.push(parity(&data));
            }
            Format::V1 { size } => {
                data.push(size);
                data.push(self.key.0);
                data.push(self.value.int_part());
                data.push(self.value.frac_part());
                let crc = crc16(&data);
                data.push(crc as u8);
                data.push((crc >> 8) as u8);
            }
        }
        data
    }

    /// Reconstruct a frame from a receive buffer.
    ///
    /// `data` holds the bytes actually received; a slice of the wrong length
    /// for the detected version is an [`ReceiveError::InvalidLength`].
    pub fn decode(data: &[u8]) -> Result<Self, ReceiveError> {
        let received = data.len().min(u8::MAX.into()) as u8;
        if data.is_empty() {
            return Err(ReceiveError::NoData);
        }
        if data.len() < 3 {
            return Err(ReceiveError::InvalidLength { received });
        }
        let raw_version = data[2] >> VERSION_SHIFT;
        let version = Version::try_from(raw_version).map_err(|_| {
            ReceiveError::UnsupportedVersion {
                version: raw_version,
            }
        })?;
        let format = match version {
            Version::V0 => Format::V0,
            Version::V1 => Format::V1 {
                size: *data.get(3).unwrap_or(&0),
            },
        };
        if data.len() != format.frame_size() {
            return Err(ReceiveError::InvalidLength { received });
        }

        let sender = Address::new(data[0]).map_err(|_| ReceiveError::InvalidAddress { address: data[0] })?;
        let receiver = Address::new(data[1]).map_err(|_| ReceiveError::InvalidAddress { address: data[1] })?;
        let acknowledge = data[2] & ACK_MASK != 0;

        let (body, check_ok) = match format {
            Format::V0 => (&data[3..6], parity(&data[..6]) == data[6]),
            Format::V1 { .. } => {
                let crc = u16::from(data[7]) | (u16::from(data[8]) << 8);
                (&data[4..7], crc16(&data[..7]) == crc)
            }
        };
        if !check_ok {
            return Err(ReceiveError::CheckFailed { key: body[0] });
        }

        Ok(Self {
            sender,
            receiver,
            acknowledge,
            key: Key(body[0]),
            value: Value::from_parts(body[1], body[2]),
            format,
        })
    }

    /// How many bytes the frame starting with `head` spans.
    ///
    /// Until the version byte is in, that is [`MAX_FRAME_SIZE`]. An
    /// unsupported version ends the frame right after its version byte.
    pub fn expected_size(head: &[u8]) -> usize {
        match head.get(2) {
            None => MAX_FRAME_SIZE,
            Some(&ack) => Version::try_from(ack >> VERSION_SHIFT)
                .map_or(3, |version| Format::for_version(version).frame_size()),
        }
    }

    /// Wrapper that formats the value the way it is shown to people.
    pub fn display_value(&self) -> DisplayValue {
        DisplayValue {
            key: self.key,
            value: self.value,
        }
    }
}

/// See [`Frame::display_value`].
#[derive(Debug, Copy, Clone)]
pub struct DisplayValue {
    key: Key,
    value: Value,
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key.value_kind() {
            ValueKind::Fraction => write!(f, "{}.{:02}", self.value.int_part(), self.value.frac_part()),
            ValueKind::Halved => write!(f, "{}", u32::from(self.value.to_u16()) * 2),
            ValueKind::Integer => write!(f, "{}", self.value.to_u16()),
        }
    }
}

/// Human readable single line form, `5->1(0) t = 21.50`.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}({}) {} = {}",
            self.sender,
            self.receiver,
            u8::from(self.acknowledge),
            self.key,
            self.display_value()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr;

    fn temperature() -> Frame {
        Frame::new(Key::TEMPERATURE, Value::from_parts(21, 50), addr(5), Address::SERVER)
    }

    #[test]
    fn test_v0_layout() {
        let frame = Frame::new('X', 0x0102u16, addr(5), addr(9))
            .with_acknowledge(true)
            .with_version(Version::V0);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_SIZE_V0);
        assert_eq!(&bytes[..6], &[5, 9, 1, b'X', 1, 2]);
        assert_eq!(bytes[6], 5 ^ 9 ^ 1 ^ b'X' ^ 1 ^ 2);
        assert_eq!(Frame::decode(&bytes), Ok(frame));
    }

    #[test]
    fn test_v1_layout() {
        let frame = temperature();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_SIZE_V1);
        assert_eq!(&bytes[..7], &[5, 1, 2, 9, b't', 21, 50]);
        let crc = crc16(&bytes[..7]);
        assert_eq!(bytes[7], crc as u8);
        assert_eq!(bytes[8], (crc >> 8) as u8);
        assert_eq!(frame.crc(), crc);
        assert_eq!(Frame::decode(&bytes), Ok(frame));
    }

    #[test]
    fn test_roundtrip_both_versions() {
        for &version in &[Version::V0, Version::V1] {
            for &ack in &[false, true] {
                let frame = Frame::new(Key::TOKEN, 3u16, addr(127), Address::BROADCAST)
                    .with_acknowledge(ack)
                    .with_version(version);
                assert_eq!(Frame::decode(&frame.encode()), Ok(frame));
            }
        }
    }

    #[test]
    fn test_no_data() {
        assert_eq!(Frame::decode(&[]), Err(ReceiveError::NoData));
        assert_eq!(ReceiveError::NoData.code(), 0);
    }

    #[test]
    fn test_invalid_length() {
        let bytes = temperature().with_version(Version::V0).encode();
        assert_eq!(
            Frame::decode(&bytes[..6]),
            Err(ReceiveError::InvalidLength { received: 6 })
        );
        assert_eq!(
            Frame::decode(&bytes[..2]),
            Err(ReceiveError::InvalidLength { received: 2 })
        );
        let bytes = temperature().encode();
        let err = Frame::decode(&bytes[..8]).unwrap_err();
        assert_eq!(err, ReceiveError::InvalidLength { received: 8 });
        assert_eq!(err.code(), 0x0108);
    }

    #[test]
    fn test_expected_size() {
        let legacy = temperature().with_version(Version::V0).encode();
        let current = temperature().encode();
        assert_eq!(Frame::expected_size(&[]), MAX_FRAME_SIZE);
        assert_eq!(Frame::expected_size(&legacy[..2]), MAX_FRAME_SIZE);
        assert_eq!(Frame::expected_size(&legacy[..3]), FRAME_SIZE_V0);
        assert_eq!(Frame::expected_size(&current[..3]), FRAME_SIZE_V1);
        assert_eq!(Frame::expected_size(&[20, 10, 2 << VERSION_SHIFT]), 3);
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = temperature().encode();
        bytes[2] = 2 << VERSION_SHIFT;
        assert_eq!(
            Frame::decode(&bytes),
            Err(ReceiveError::UnsupportedVersion { version: 2 })
        );
    }

    #[test]
    fn test_invalid_address() {
        let mut bytes = temperature().with_version(Version::V0).encode();
        bytes[1] = 0x85;
        bytes[6] = parity(&bytes[..6]);
        assert_eq!(
            Frame::decode(&bytes),
            Err(ReceiveError::InvalidAddress { address: 0x85 })
        );
    }

    #[test]
    fn test_single_bit_errors_are_detected() {
        for &version in &[Version::V0, Version::V1] {
            let bytes = temperature().with_acknowledge(true).with_version(version).encode();
            for byte in 0..bytes.len() {
                for bit in 0..8 {
                    let mut corrupt = bytes.clone();
                    corrupt[byte] ^= 1 << bit;
                    let result = Frame::decode(&corrupt);
                    assert!(result.is_err(), "undetected flip {}:{} {:?}", byte, bit, version);
                    let header_bits = (byte < 2 && bit == 7) || (byte == 2 && bit > 0);
                    if !header_bits {
                        assert!(
                            matches!(result, Err(ReceiveError::CheckFailed { .. })),
                            "flip {}:{} gave {:?}",
                            byte,
                            bit,
                            result
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_check_failed_code_keeps_key() {
        let mut bytes = temperature().encode();
        bytes[6] ^= 0x01;
        let err = Frame::decode(&bytes).unwrap_err();
        assert_eq!(err, ReceiveError::CheckFailed { key: b't' });
        assert_eq!(err.code(), 0x0200 + u16::from(b't'));
    }

    #[test]
    fn test_reply() {
        let frame = temperature().with_acknowledge(true);
        let reply = frame.reply();
        assert_eq!(reply.sender(), frame.receiver());
        assert_eq!(reply.receiver(), frame.sender());
        assert!(!reply.acknowledge());
        assert_eq!(reply.key(), frame.key());
        assert_eq!(reply.value(), frame.value());
    }

    #[test]
    fn test_display() {
        assert_eq!(temperature().to_string(), "5->1(0) t = 21.50");
        let pressure = Frame::new(Key::AIR_PRESSURE, 506u16, addr(5), Address::SERVER);
        assert_eq!(pressure.to_string(), "5->1(0) p = 1012");
        let token = Frame::new(Key::TOKEN, 1u16, addr(5), addr(9)).with_acknowledge(true);
        assert_eq!(token.to_string(), "5->9(1) ! = 1");
    }
}
