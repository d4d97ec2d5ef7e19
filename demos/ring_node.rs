//! Join a token ring on a serial port, using RTS as the transceiver
//! direction line.
//!
//! `cargo run --example ring_node -- /dev/ttyUSB0 12`

use anyhow::{Context, Result};
use log::{info, warn};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

use rs485_ring::hal::{self, DirectionPin, StdClock, Transport};
use rs485_ring::{Address, BusConfig, DispatchSink, Key, MemoryStore, Rs485, SerialIo, Value};

const TICK: Duration = Duration::from_millis(10);

struct Port(Box<dyn SerialPort>);

impl Transport for Port {
    fn bytes_available(&mut self) -> usize {
        self.0.bytes_to_read().map_or(0, |n| n as usize)
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0];
        match self.0.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), hal::Error> {
        self.0.write_all(&[byte])?;
        Ok(())
    }
}

struct RtsPin(Box<dyn SerialPort>);

impl DirectionPin for RtsPin {
    fn set_transmit(&mut self) {
        if let Err(e) = self.0.write_request_to_send(true) {
            warn!("RTS: {}", e);
        }
    }

    fn set_receive(&mut self) {
        if let Err(e) = self.0.write_request_to_send(false) {
            warn!("RTS: {}", e);
        }
    }
}

struct Printer;

impl DispatchSink for Printer {
    fn notify(&mut self, device: usize, key: Key, value: Value, sender: Address) {
        println!("device {}: {} = {} from {}", device, key, value.to_u16(), sender);
    }

    fn broadcast(&mut self, key: Key, value: Value, sender: Address) {
        println!("broadcast: {} = {} from {}", key, value.to_u16(), sender);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let port_name = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let address: u16 = args
        .next()
        .unwrap_or_else(|| "127".to_string())
        .parse()
        .context("node address")?;

    let config = BusConfig::default();
    let serial = serialport::new(&port_name, config.baud_rate)
        .timeout(Duration::from_millis(1))
        .open()
        .with_context(|| format!("opening {}", port_name))?;
    let pin = RtsPin(serial.try_clone().context("cloning port")?);

    let mut store = MemoryStore::new();
    rs485_ring::ConfigStore::set(&mut store, 0, Key::ADDRESS, address);
    let mut node = Rs485::new(&config, Port(serial), pin, StdClock::new(), store);
    info!("node {} on {}", node.router().own_address(), port_name);

    let mut ticks = 0u64;
    loop {
        if let Err(e) = node.poll_non_blocking(&mut Printer) {
            warn!("{}", e);
        }
        ticks += 1;
        // an uptime counter every ten seconds
        if ticks % 1000 == 0 && node.may_send() {
            let minutes = (ticks / 6000) as u16;
            node.send_to_server(0, 'u', minutes)
                .context("sending uptime")?;
        }
        std::thread::sleep(TICK);
    }
}
