//! Hardware seams used by the drivers.
//!
//! The protocol code never touches a serial port directly. A node supplies a
//! [`Transport`] for the bytes, a [`DirectionPin`] for the RS485 driver
//! enable line and a [`Clock`] for the turnaround and receive timeouts.

use snafu::Snafu;

/// Error type for this module
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// Writing to the transport failed.
    #[snafu(display("Transport write failed: {}", source))]
    Write { source: std::io::Error },
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Write { source }
    }
}

/// Byte level access to a serial line.
pub trait Transport {
    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&mut self) -> usize;

    /// Read one byte, `None` if nothing is available.
    fn read_byte(&mut self) -> Option<u8>;

    /// Write one byte.
    fn write_byte(&mut self, byte: u8) -> Result<(), Error>;

    /// Write all bytes, stopping at the first failure.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        for &byte in data {
            self.write_byte(byte)?;
        }
        Ok(())
    }
}

/// Monotonic millisecond time source.
pub trait Clock {
    fn millis(&self) -> u64;

    /// Busy wait or sleep for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u64);
}

/// Driver enable / receiver enable line of an RS485 transceiver.
pub trait DirectionPin {
    fn set_transmit(&mut self);
    fn set_receive(&mut self);
}

/// [`Clock`] backed by `std::time`.
#[derive(Debug)]
pub struct StdClock {
    start: std::time::Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// A [`DirectionPin`] for transceivers with automatic direction control.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoDirectionPin;

impl DirectionPin for NoDirectionPin {
    fn set_transmit(&mut self) {}
    fn set_receive(&mut self) {}
}

/// Milliseconds needed to shift out `chars` characters of `bits_per_char`
/// bits each at `baud_rate`.
pub(crate) fn transfer_time_ms(bits_per_char: u64, chars: u64, baud_rate: u32) -> u64 {
    bits_per_char * chars * 1000 / u64::from(baud_rate.max(1))
}
