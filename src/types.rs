//! This module defines range-checked types for bus addresses, event keys,
//! fixed-point values and protocol versions, meant to simplify correct usage
//! of the API.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::ops::Deref;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid bus address.
    #[snafu(display("Invalid address"))]
    InvalidAddress,
    /// The value isn't a supported protocol version.
    #[snafu(display("Unsupported protocol version"))]
    InvalidVersion,
    /// The value can't be represented as a fixed-point value.
    #[snafu(display("Invalid value"))]
    InvalidValue,
}

const fn invalid_address() -> InvalidAddressSnafu {
    InvalidAddressSnafu
}

const fn invalid_version() -> InvalidVersionSnafu {
    InvalidVersionSnafu
}

const fn invalid_value() -> InvalidValueSnafu {
    InvalidValueSnafu
}

/// Address is a range-checked [0, 127] integer, representing a node address.
///
/// `0` is the broadcast address and `1` is reserved for the server, the
/// remaining addresses belong to nodes. The high bit is never set, which lets
/// a receiver skip noise before the start of a frame.
///
/// ## Example
/// ```
/// use rs485_ring::Address;
/// use std::convert::TryInto;
/// let addr = Address::new(10).unwrap();
/// let addr: Address = 10.try_into().unwrap();
/// assert!(Address::new(128).is_err());
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Address(u8);

/// Create a new [`Address`], panics if it is out of range.
pub const fn addr(a: u8) -> Address {
    if a <= Address::MAX_VALUE {
        return Address(a);
    }
    panic!("Invalid address.")
}

impl Address {
    /// Receivers of a broadcast are all nodes on the bus.
    pub const BROADCAST: Address = Address(0);
    /// Default address of the upstream server.
    pub const SERVER: Address = Address(1);
    /// Address of a node that has not been configured yet.
    pub const UNCONFIGURED: Address = Address(127);

    const MAX_VALUE: u8 = 0x7f;

    /// Create a new address, checking that the address is in \[0, 127\].
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if `address` is out of range.
    pub fn new(address: impl TryInto<u8>) -> Result<Self, Error> {
        let address = address.try_into().ok().with_context(invalid_address)?;
        ensure!(address <= Self::MAX_VALUE, invalid_address());
        Ok(Self(address))
    }

    /// True for the broadcast address.
    pub const fn is_broadcast(self) -> bool {
        self.0 == 0
    }
}

impl Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<u8> for Address {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Address> for u16 {
    fn from(address: Address) -> Self {
        address.0.into()
    }
}

/// Trait to convert `T: TryInto<u8>` into an [`Address`].
pub trait IntoAddress {
    /// Convert self to an Address.
    /// # Errors
    /// Returns `Error:InvalidAddress` if self isn't a valid address.
    fn into_address(self) -> Result<Address, Error>;
}

impl IntoAddress for Address {
    fn into_address(self) -> Result<Address, Error> {
        Ok(self)
    }
}

impl<T> IntoAddress for T
where
    T: TryInto<u8>,
{
    fn into_address(self) -> Result<Address, Error> {
        Address::new(self)
    }
}

impl TryFrom<usize> for Address {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod address_tests {
    use super::{Address, IntoAddress};

    #[test]
    fn test_valid_addresses() {
        for n in 0..=127u8 {
            let a = Address::new(n).unwrap();
            assert_eq!(*a, n);
        }
        for n in 128..=255u8 {
            assert!(Address::new(n).is_err());
        }
    }

    #[test]
    fn test_address() {
        assert!(Address::new(0).unwrap().is_broadcast());
        assert!(!Address::SERVER.is_broadcast());
        assert!(Address::new(-1).is_err());
        assert!(300.into_address().is_err());
        assert_eq!(Address::new(5).unwrap().to_string(), "5");
    }
}

/// Event identifier carried by a frame, usually a printable ASCII letter.
///
/// Key `0` marks an empty frame.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Key(pub u8);

impl Key {
    /// Empty frame marker.
    pub const EMPTY: Key = Key(0);
    /// Token ring arbitration frames.
    pub const TOKEN: Key = Key(b'!');
    /// Ring state report, `state * 100 + receiver address`.
    pub const STATE: Key = Key(b'a');
    /// Pending receive error report, see `ReceiveError::code`.
    pub const RECEIVE_ERROR: Key = Key(b'e');
    pub const HUMIDITY: Key = Key(b'h');
    /// Air pressure in hPa, transmitted halved.
    pub const AIR_PRESSURE: Key = Key(b'p');
    pub const SYS_TEMPERATURE: Key = Key(b's');
    pub const TEMPERATURE: Key = Key(b't');
    /// Sets the address of the addressed sub-device.
    pub const ADDRESS: Key = Key(b'A');
    /// Sets the address of the upstream server.
    pub const SERVER_ADDRESS: Key = Key(b'S');

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// How a value with this key is rendered in text form.
    pub const fn value_kind(self) -> ValueKind {
        match self.0 {
            b't' | b'h' | b's' => ValueKind::Fraction,
            b'p' => ValueKind::Halved,
            _ => ValueKind::Integer,
        }
    }
}

impl From<u8> for Key {
    fn from(key: u8) -> Self {
        Key(key)
    }
}

impl From<char> for Key {
    fn from(key: char) -> Self {
        Key(key as u8)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as char)
    }
}

/// Text representation of a [`Value`], selected by the frame key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueKind {
    /// Integer part and hundredths, `21.50`
    Fraction,
    /// Plain integer transmitted at half its magnitude
    Halved,
    /// Plain 16-bit integer
    Integer,
}

/// 16-bit frame payload.
///
/// The high byte holds the integer part and the low byte the hundredths of a
/// fixed-point number. Plain integers use all 16 bits.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, Default)]
#[repr(transparent)]
pub struct Value(u16);

impl Value {
    /// Create a value from integer part and hundredths.
    pub const fn from_parts(int_part: u8, frac_part: u8) -> Self {
        Self(((int_part as u16) << 8) | frac_part as u16)
    }

    /// Create a fixed-point value from a non-negative number below 256.
    /// # Errors
    /// Returns [`Error::InvalidValue`] if `value` can't be represented.
    pub fn from_f32(value: f32) -> Result<Self, Error> {
        ensure!(value.is_finite() && value >= 0.0, invalid_value());
        let int_part = value.floor();
        ensure!(int_part < 256.0, invalid_value());
        let mut hundredths = ((value - int_part) * 100.0).round() as u8;
        if hundredths >= 100 {
            hundredths = 99;
        }
        Ok(Self::from_parts(int_part as u8, hundredths))
    }

    pub const fn int_part(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn frac_part(self) -> u8 {
        self.0 as u8
    }

    pub const fn to_u16(self) -> u16 {
        self.0
    }

    pub fn to_f32(self) -> f32 {
        f32::from(self.int_part()) + f32::from(self.frac_part()) / 100.0
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Self(value.into())
    }
}

impl From<Value> for u16 {
    fn from(value: Value) -> Self {
        value.0
    }
}

impl PartialEq<u16> for Value {
    fn eq(&self, other: &u16) -> bool {
        self.0 == *other
    }
}


/// Wire format version of a frame.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub enum Version {
    /// 7 byte legacy frame protected by a parity byte.
    V0 = 0,
    /// 9 byte frame with size field and CRC16.
    V1 = 1,
}

impl Version {
    pub const LATEST: Version = Version::V1;
}

impl Default for Version {
    fn default() -> Self {
        Self::LATEST
    }
}

impl TryFrom<u8> for Version {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Version::V0),
            1 => Ok(Version::V1),
            _ => invalid_version().fail(),
        }
    }
}

impl From<Version> for u8 {
    fn from(version: Version) -> Self {
        version as u8
    }
}
