#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::rc::Rc;

use rs485_ring::hal::{self, Clock, DirectionPin, Transport};
use rs485_ring::{
    Address, BusConfig, ConfigStore, DispatchSink, Frame, Key, MemoryStore, Rs485, Value,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Simulated RS485 line. Every byte written by one port is received by all
/// other ports.
#[derive(Default)]
pub struct SimBus {
    rx: Vec<VecDeque<u8>>,
    sent: Vec<Vec<u8>>,
}

impl SimBus {
    pub fn new() -> Rc<RefCell<SimBus>> {
        Default::default()
    }
}

pub fn new_port(bus: &Rc<RefCell<SimBus>>) -> BusPort {
    let mut inner = bus.borrow_mut();
    inner.rx.push(VecDeque::new());
    inner.sent.push(Vec::new());
    BusPort {
        bus: Rc::clone(bus),
        index: inner.rx.len() - 1,
        do_write_error: false,
    }
}

/// Inject bytes as if a foreign node had sent them.
pub fn inject(bus: &Rc<RefCell<SimBus>>, data: &[u8]) {
    for rx in bus.borrow_mut().rx.iter_mut() {
        rx.extend(data);
    }
}

pub struct BusPort {
    bus: Rc<RefCell<SimBus>>,
    index: usize,
    pub do_write_error: bool,
}

impl BusPort {
    /// Everything this port has written so far.
    pub fn sent(&self) -> Vec<u8> {
        self.bus.borrow().sent[self.index].clone()
    }

    /// Frames written by this port, decoded.
    pub fn sent_frames(&self) -> Vec<Frame> {
        split_frames(&self.sent())
    }

    pub fn clear_sent(&self) {
        self.bus.borrow_mut().sent[self.index].clear();
    }
}

/// Decode a byte stream of back to back frames.
pub fn split_frames(mut data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    while data.len() >= 3 {
        let size = Frame::expected_size(data).min(data.len());
        frames.push(Frame::decode(&data[..size]).expect("valid frame on the bus"));
        data = &data[size..];
    }
    frames
}

impl Transport for BusPort {
    fn bytes_available(&mut self) -> usize {
        self.bus.borrow().rx[self.index].len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.bus.borrow_mut().rx[self.index].pop_front()
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), hal::Error> {
        if self.do_write_error {
            return Err(Error::new(ErrorKind::BrokenPipe, "bus unplugged").into());
        }
        let mut bus = self.bus.borrow_mut();
        bus.sent[self.index].push(byte);
        let me = self.index;
        for (i, rx) in bus.rx.iter_mut().enumerate() {
            if i != me {
                rx.push_back(byte);
            }
        }
        Ok(())
    }
}

/// Clock that moves one millisecond each time it is read, so receive
/// timeouts expire without real waiting.
#[derive(Default, Clone)]
pub struct SimClock(Rc<Cell<u64>>);

impl Clock for SimClock {
    fn millis(&self) -> u64 {
        self.0.set(self.0.get() + 1);
        self.0.get()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

/// Direction pin recording its switches.
#[derive(Default, Debug)]
pub struct RecordingPin {
    pub transmitting: bool,
    pub history: Vec<bool>,
}

impl DirectionPin for RecordingPin {
    fn set_transmit(&mut self) {
        self.transmitting = true;
        self.history.push(true);
    }

    fn set_receive(&mut self) {
        self.transmitting = false;
        self.history.push(false);
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Delivery {
    Notify(usize, Key, Value, Address),
    Broadcast(Key, Value, Address),
}

/// Sink recording every delivered frame.
#[derive(Default, Debug)]
pub struct Recorder(pub Vec<Delivery>);

impl DispatchSink for Recorder {
    fn notify(&mut self, device: usize, key: Key, value: Value, sender: Address) {
        self.0.push(Delivery::Notify(device, key, value, sender));
    }

    fn broadcast(&mut self, key: Key, value: Value, sender: Address) {
        self.0.push(Delivery::Broadcast(key, value, sender));
    }
}

pub type Node = Rs485<BusPort, RecordingPin, SimClock, MemoryStore>;

/// A node on `bus` with sub-device addresses `addresses`.
pub fn new_node(bus: &Rc<RefCell<SimBus>>, addresses: &[u16]) -> Node {
    let mut store = MemoryStore::new();
    for (device, &a) in addresses.iter().enumerate() {
        store.set(device, Key::ADDRESS, a);
    }
    let config = BusConfig {
        devices: addresses.len(),
        ..BusConfig::default()
    };
    Rs485::new(
        &config,
        new_port(bus),
        RecordingPin::default(),
        SimClock::default(),
        store,
    )
}
