//! Token ring bus protocol for small nodes sharing a half-duplex RS485 line.
//!
//! Every node owns one or more bus addresses. Nodes exchange short frames
//! carrying a key and a 16-bit value, and take turns on the line by passing
//! a token around the ring of addresses, without a central bus master.
//!
//! The crate is split the same way as the protocol:
//!
//! * [`frame`] and [`text`] encode and decode frames, binary for the bus and
//!   JSON for a host connection,
//! * [`arbiter`] is the token ring state machine, fed one event per tick,
//! * [`rs485`] and [`text_link`] are the drivers gluing the codec and the
//!   arbiter to a byte [`Transport`](hal::Transport),
//! * [`router`] maps frames to the sub-devices of a node.
//!
//! The drivers never touch hardware directly; they take the serial line, the
//! transceiver direction pin and the clock through the traits in [`hal`].

mod buffer;
mod nom_parser;

pub mod arbiter;
pub mod checksum;
pub mod config;
pub mod frame;
pub mod hal;
pub mod router;
pub mod rs485;
pub mod text;
pub mod text_link;
pub mod types;

pub use arbiter::{Action, Arbiter, RingState, TokenValue};
pub use config::{BusConfig, Timing};
pub use frame::{Format, Frame, ReceiveError};
pub use router::{ConfigStore, DispatchSink, MemoryStore, Router, SerialIo};
pub use rs485::Rs485;
pub use text_link::TextLink;
pub use types::{addr, Address, Error, IntoAddress, Key, Value, Version};
