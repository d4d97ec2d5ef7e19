//! JSON text form of a [`Frame`].
//!
//! ```text
//! {"S": 5, "R": 1, "A": 0, "K": "t", "V": 21.50, "C": "0x1D0F"}
//! ```
//!
//! Values of temperature like keys are written with two decimals, air
//! pressure doubled, everything else as a plain integer. Reading applies the
//! inverse conversion. The `C` field is informational and ignored on input.

use core::convert::TryFrom;
use core::fmt;

use log::trace;

use crate::buffer::Buffer;
use crate::frame::{Format, Frame, ReceiveError};
use crate::hal::{transfer_time_ms, Clock, Transport};
use crate::nom_parser::{parse_object, FieldToken, Number};
use crate::types::{Address, Key, Value, ValueKind};

const BITS_PER_CHAR: u64 = 8;
const TIMEOUT_MARGIN_MS: u64 = 3;

/// Display wrapper producing the JSON line of a frame, without newline.
#[derive(Debug, Copy, Clone)]
pub struct Json<'a>(pub &'a Frame);

impl fmt::Display for Json<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.0;
        write!(
            f,
            "{{\"S\": {}, \"R\": {}, \"A\": {}, \"K\": \"{}\", \"V\": {}, \"C\": \"0x{:04X}\"}}",
            frame.sender(),
            frame.receiver(),
            u8::from(frame.acknowledge()),
            frame.key(),
            frame.display_value(),
            frame.crc()
        )
    }
}

/// Decode the first JSON object in `data`.
///
/// Fails with [`ReceiveError::NoData`] for empty input and with
/// [`ReceiveError::Malformed`] if the object is incomplete, has no key or
/// can't be parsed.
pub fn decode_json(data: &[u8]) -> Result<Frame, ReceiveError> {
    if data.iter().all(|c| c.is_ascii_whitespace() || *c == 0) {
        return Err(ReceiveError::NoData);
    }
    let (_rest, fields) = parse_object(data).map_err(|_| ReceiveError::Malformed)?;

    let mut sender = Address::BROADCAST;
    let mut receiver = Address::BROADCAST;
    let mut acknowledge = false;
    let mut key = Key::EMPTY;
    let mut value = None;
    for field in fields {
        match field {
            FieldToken::Sender(n) => sender = text_address(n)?,
            FieldToken::Receiver(n) => receiver = text_address(n)?,
            FieldToken::Acknowledge(n) => acknowledge = n.to_i64() != 0,
            FieldToken::Key(k) => key = Key(k),
            FieldToken::Value(n) => value = Some(n),
            FieldToken::Checksum => {}
        }
    }
    if key.is_empty() {
        return Err(ReceiveError::Malformed);
    }
    let value = value.map_or(Ok(Value::default()), |n| text_value(key, n))?;
    Ok(Frame::new(key, value, sender, receiver)
        .with_acknowledge(acknowledge)
        .with_format(Format::default()))
}

fn text_address(n: Number) -> Result<Address, ReceiveError> {
    let raw = n.to_i64();
    Address::new(raw).map_err(|_| ReceiveError::InvalidAddress {
        address: u8::try_from(raw).unwrap_or(u8::MAX),
    })
}

/// Values are unsigned on the wire; anything that doesn't fit is malformed.
fn text_value(key: Key, n: Number) -> Result<Value, ReceiveError> {
    if n.negative {
        return Err(ReceiveError::Malformed);
    }
    let value = match key.value_kind() {
        ValueKind::Fraction => {
            u8::try_from(n.int_part).map(|int| Value::from_parts(int, n.hundredths))
        }
        ValueKind::Halved => u16::try_from(n.int_part / 2).map(Value::from),
        ValueKind::Integer => u16::try_from(n.int_part).map(Value::from),
    };
    value.map_err(|_| ReceiveError::Malformed)
}

/// Collects one JSON object from a [`Transport`], character by character.
///
/// A character that doesn't arrive within the time of one character at the
/// line speed, plus a small margin, ends the object.
#[derive(Debug)]
pub struct TextReader {
    buffer: Buffer,
    timeout_ms: u64,
}

impl TextReader {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            buffer: Buffer::new(),
            timeout_ms: TIMEOUT_MARGIN_MS + transfer_time_ms(BITS_PER_CHAR, 1, baud_rate),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Read and decode one frame. Returns immediately with
    /// [`ReceiveError::NoData`] if nothing is waiting on the line.
    pub fn read_frame<T, C>(&mut self, transport: &mut T, clock: &C) -> Result<Frame, ReceiveError>
    where
        T: Transport,
        C: Clock,
    {
        self.buffer.clear();
        if transport.bytes_available() == 0 {
            return Err(ReceiveError::NoData);
        }
        let mut last_char = clock.millis();
        let mut object_started = false;
        // an object that outgrows the buffer is cut off there
        while !self.buffer.is_full() {
            if let Some(byte) = transport.read_byte() {
                last_char = clock.millis();
                if !object_started && byte != b'{' {
                    continue;
                }
                object_started = true;
                self.buffer.push(byte);
                if byte == b'}' {
                    break;
                }
            } else if last_char + self.timeout_ms <= clock.millis() {
                break;
            }
        }
        trace!("text frame {:?}", String::from_utf8_lossy(self.buffer.as_ref()));
        if !object_started {
            return Err(ReceiveError::NoData);
        }
        decode_json(self.buffer.as_ref())
    }
}
