//! Print every frame seen on the bus as a JSON line.
//!
//! `cargo run --example bus_monitor -- /dev/ttyUSB0 9600`

use anyhow::{Context, Result};
use std::io::{ErrorKind, Read};
use std::time::Duration;

use rs485_ring::text::Json;
use rs485_ring::Frame;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let port_name = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud_rate: u32 = args
        .next()
        .unwrap_or_else(|| "9600".to_string())
        .parse()
        .context("baud rate")?;

    // a gap longer than one character ends a frame
    let gap = Duration::from_millis(3 + 9 * 1000 / u64::from(baud_rate));
    let mut serial = serialport::new(&port_name, baud_rate)
        .timeout(gap)
        .open()
        .with_context(|| format!("opening {}", port_name))?;

    let mut frame = Vec::new();
    let mut buf = [0; 64];
    loop {
        match serial.read(&mut buf) {
            Ok(n) => frame.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                if !frame.is_empty() {
                    match Frame::decode(&frame) {
                        Ok(f) => println!("{}", Json(&f)),
                        Err(e) => eprintln!("{} ({:02x?})", e, frame),
                    }
                    frame.clear();
                }
            }
            Err(e) => return Err(e).context("reading serial port"),
        }
    }
}
