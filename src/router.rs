//! Addressing shared by the bus drivers.
//!
//! A node hosts up to [`MAX_DEVICES`] logical sub-devices, each with its own
//! bus address. The [`Router`] builds outgoing frames for a sub-device,
//! resolves the sub-device an incoming frame is meant for, applies the
//! address configuration keys and forwards everything else to the
//! application's [`DispatchSink`].

use std::collections::BTreeMap;

use arrayvec::ArrayVec;
use log::{debug, info, trace};
use snafu::{ensure, Snafu};

use crate::config::BusConfig;
use crate::frame::{Format, Frame};
use crate::hal;
use crate::types::{Address, Key, Value};

/// Maximal number of sub-devices of one node.
pub const MAX_DEVICES: usize = 4;

/// Error type for this module
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The node doesn't host the given sub-device.
    #[snafu(display("Unknown sub-device {}", device))]
    UnknownDevice { device: usize },
    /// The frame couldn't be written.
    #[snafu(display("Sending failed: {}", source))]
    Transport { source: hal::Error },
}

/// Persistent per sub-device settings, e.g. an EEPROM.
pub trait ConfigStore {
    fn get(&self, device: usize, key: Key) -> Option<u16>;
    fn set(&mut self, device: usize, key: Key, value: u16);
}

/// Receiver of application frames.
pub trait DispatchSink {
    /// A frame addressed to sub-device `device`.
    fn notify(&mut self, device: usize, key: Key, value: Value, sender: Address);
    /// A frame sent to the broadcast address.
    fn broadcast(&mut self, key: Key, value: Value, sender: Address);
}

/// In-memory [`ConfigStore`], for nodes without persistent storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<(usize, u8), u16>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, device: usize, key: Key) -> Option<u16> {
        self.values.get(&(device, key.0)).copied()
    }

    fn set(&mut self, device: usize, key: Key, value: u16) {
        self.values.insert((device, key.0), value);
    }
}

/// The common interface of the bus drivers.
pub trait SerialIo {
    /// Address book of the driver.
    fn router(&self) -> &Router;

    /// Put one frame on the line.
    fn send_frame(&mut self, frame: &Frame) -> Result<(), Error>;

    /// True if application frames may be sent now.
    fn may_send(&self) -> bool;

    /// Handle at most one incoming frame, without blocking if the line is
    /// idle.
    fn poll_non_blocking<D: DispatchSink>(&mut self, sink: &mut D) -> Result<(), Error>;

    /// Send an event of sub-device `device` to the server.
    fn send_to_server(
        &mut self,
        device: usize,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Result<(), Error> {
        let server = self.router().server_address();
        self.send_to_address(device, key, value, server)
    }

    /// Send an event of sub-device `device` to all nodes.
    fn broadcast(
        &mut self,
        device: usize,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Result<(), Error> {
        self.send_to_address(device, key, value, Address::BROADCAST)
    }

    /// Send an event of sub-device `device` to `receiver`.
    fn send_to_address(
        &mut self,
        device: usize,
        key: impl Into<Key>,
        value: impl Into<Value>,
        receiver: Address,
    ) -> Result<(), Error> {
        let frame = self
            .router()
            .frame(device, key.into(), value.into(), receiver)?;
        self.send_frame(&frame)
    }
}

/// Sub-device addresses and the server address of a node.
#[derive(Debug, Clone)]
pub struct Router {
    addresses: ArrayVec<Address, MAX_DEVICES>,
    server: Address,
    format: Format,
}

impl Router {
    /// Load the addresses from `store`. Missing or invalid entries fall back
    /// to [`Address::UNCONFIGURED`] for the sub-devices and
    /// [`Address::SERVER`] for the server.
    pub fn new<S: ConfigStore>(config: &BusConfig, store: &S) -> Self {
        let stored = |device, key| {
            store
                .get(device, key)
                .and_then(|value| Address::new(value).ok())
        };
        let devices = config.devices.clamp(1, MAX_DEVICES);
        let addresses = (0..devices)
            .map(|device| stored(device, Key::ADDRESS).unwrap_or(Address::UNCONFIGURED))
            .collect();
        let server = stored(0, Key::SERVER_ADDRESS).unwrap_or(Address::SERVER);
        Self {
            addresses,
            server,
            format: Format::for_version(config.version),
        }
    }

    /// Address of sub-device 0, which takes part in the token ring.
    pub fn own_address(&self) -> Address {
        self.addresses[0]
    }

    pub fn address(&self, device: usize) -> Option<Address> {
        self.addresses.get(device).copied()
    }

    pub fn server_address(&self) -> Address {
        self.server
    }

    pub fn devices(&self) -> usize {
        self.addresses.len()
    }

    /// Sub-device that receives frames for `address`. Broadcasts go to
    /// sub-device 0.
    pub fn device_for(&self, address: Address) -> Option<usize> {
        if address.is_broadcast() {
            return Some(0);
        }
        self.addresses.iter().position(|&a| a == address)
    }

    /// True if `address` is one of our own, broadcast excluded.
    pub fn is_own_address(&self, address: Address) -> bool {
        !address.is_broadcast() && self.addresses.contains(&address)
    }

    /// Application frame from sub-device `device`.
    pub fn frame(
        &self,
        device: usize,
        key: Key,
        value: Value,
        receiver: Address,
    ) -> Result<Frame, Error> {
        ensure!(device < self.addresses.len(), UnknownDeviceSnafu { device });
        Ok(Frame::new(key, value, self.addresses[device], receiver).with_format(self.format))
    }

    /// Hand a received application frame to `sink`, or apply it if it
    /// carries one of the address keys.
    pub fn notify<S, D>(&mut self, frame: &Frame, store: &mut S, sink: &mut D)
    where
        S: ConfigStore,
        D: DispatchSink,
    {
        let receiver = frame.receiver();
        let device = match self.device_for(receiver) {
            Some(device) => device,
            None => {
                trace!("not for us: {}", frame);
                return;
            }
        };
        let value = frame.value().to_u16();
        match frame.key() {
            Key::SERVER_ADDRESS => {
                if self.accept_config(frame, 1..127) {
                    info!("server address {} -> {}", self.server, value);
                    store.set(0, Key::SERVER_ADDRESS, value);
                    self.server = Address::new(value).unwrap_or(self.server);
                }
            }
            Key::ADDRESS => {
                if self.accept_config(frame, 2..127) {
                    info!("device {} address {} -> {}", device, self.addresses[device], value);
                    store.set(device, Key::ADDRESS, value);
                    self.addresses[device] = Address::new(value).unwrap_or(self.addresses[device]);
                }
            }
            key if receiver.is_broadcast() => sink.broadcast(key, frame.value(), frame.sender()),
            key => sink.notify(device, key, frame.value(), frame.sender()),
        }
    }

    fn accept_config(&self, frame: &Frame, range: std::ops::Range<u16>) -> bool {
        if frame.sender() != self.server {
            debug!("ignoring {} not sent by the server", frame);
            return false;
        }
        if !range.contains(&frame.value().to_u16()) {
            debug!("ignoring {}, value out of range", frame);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{addr, Version};

    #[derive(Default)]
    struct Recorder {
        notified: Vec<(usize, Key, Value, Address)>,
        broadcasts: Vec<(Key, Value, Address)>,
    }

    impl DispatchSink for Recorder {
        fn notify(&mut self, device: usize, key: Key, value: Value, sender: Address) {
            self.notified.push((device, key, value, sender));
        }

        fn broadcast(&mut self, key: Key, value: Value, sender: Address) {
            self.broadcasts.push((key, value, sender));
        }
    }

    fn store(addresses: &[u16]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for (device, &a) in addresses.iter().enumerate() {
            store.set(device, Key::ADDRESS, a);
        }
        store
    }

    fn config(devices: usize) -> BusConfig {
        BusConfig {
            devices,
            ..BusConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let router = Router::new(&config(2), &MemoryStore::new());
        assert_eq!(router.own_address(), Address::UNCONFIGURED);
        assert_eq!(router.address(1), Some(Address::UNCONFIGURED));
        assert_eq!(router.server_address(), Address::SERVER);

        let router = Router::new(&config(100), &MemoryStore::new());
        assert_eq!(router.devices(), MAX_DEVICES);
    }

    #[test]
    fn test_device_lookup() {
        let router = Router::new(&config(3), &store(&[10, 11, 12]));
        assert_eq!(router.device_for(addr(11)), Some(1));
        assert_eq!(router.device_for(Address::BROADCAST), Some(0));
        assert_eq!(router.device_for(addr(13)), None);
        assert!(router.is_own_address(addr(12)));
        assert!(!router.is_own_address(Address::BROADCAST));
    }

    #[test]
    fn test_outgoing_frame() {
        let cfg = BusConfig {
            devices: 2,
            version: Version::V0,
            ..BusConfig::default()
        };
        let router = Router::new(&cfg, &store(&[10, 11]));
        let frame = router
            .frame(1, Key::TEMPERATURE, Value::from_parts(20, 0), Address::SERVER)
            .unwrap();
        assert_eq!(frame.sender(), addr(11));
        assert_eq!(frame.receiver(), Address::SERVER);
        assert_eq!(frame.version(), Version::V0);
        assert!(matches!(
            router.frame(2, Key::TEMPERATURE, Value::default(), Address::SERVER),
            Err(Error::UnknownDevice { device: 2 })
        ));
    }

    #[test]
    fn test_dispatch() {
        let mut store = store(&[10, 11]);
        let mut router = Router::new(&config(2), &store);
        let mut sink = Recorder::default();

        router.notify(&Frame::new('L', 1u16, addr(30), addr(11)), &mut store, &mut sink);
        router.notify(&Frame::new('L', 2u16, addr(30), Address::BROADCAST), &mut store, &mut sink);
        router.notify(&Frame::new('L', 3u16, addr(30), addr(40)), &mut store, &mut sink);

        assert_eq!(sink.notified, vec![(1, Key(b'L'), Value::from(1u16), addr(30))]);
        assert_eq!(sink.broadcasts, vec![(Key(b'L'), Value::from(2u16), addr(30))]);
    }

    #[test]
    fn test_address_keys() {
        let mut store = store(&[10, 11]);
        let mut router = Router::new(&config(2), &store);
        let mut sink = Recorder::default();

        // only the server may reconfigure
        router.notify(&Frame::new(Key::ADDRESS, 20u16, addr(30), addr(11)), &mut store, &mut sink);
        assert_eq!(router.address(1), Some(addr(11)));

        router.notify(&Frame::new(Key::ADDRESS, 20u16, Address::SERVER, addr(11)), &mut store, &mut sink);
        assert_eq!(router.address(1), Some(addr(20)));
        assert_eq!(store.get(1, Key::ADDRESS), Some(20));

        // 1 is reserved for the server
        router.notify(&Frame::new(Key::ADDRESS, 1u16, Address::SERVER, addr(10)), &mut store, &mut sink);
        assert_eq!(router.own_address(), addr(10));

        router.notify(&Frame::new(Key::SERVER_ADDRESS, 5u16, Address::SERVER, addr(10)), &mut store, &mut sink);
        assert_eq!(router.server_address(), addr(5));
        assert_eq!(store.get(0, Key::SERVER_ADDRESS), Some(5));

        router.notify(&Frame::new(Key::SERVER_ADDRESS, 127u16, addr(5), addr(10)), &mut store, &mut sink);
        assert_eq!(router.server_address(), addr(5));

        assert!(sink.notified.is_empty());
        assert!(sink.broadcasts.is_empty());

        let reloaded = Router::new(&config(2), &store);
        assert_eq!(reloaded.address(1), Some(addr(20)));
        assert_eq!(reloaded.server_address(), addr(5));
    }
}
