//! JSON line driver for a host connection, e.g. a USB serial port.
//!
//! Same interface as the [`Rs485`](crate::rs485::Rs485) driver, but the line
//! is point to point: there is no direction pin, no token ring and sending is
//! always allowed.

use log::{trace, warn};
use snafu::ResultExt;

use crate::config::BusConfig;
use crate::frame::{Frame, ReceiveError};
use crate::hal::{Clock, Transport};
use crate::router::{ConfigStore, DispatchSink, Error, Router, SerialIo, TransportSnafu};
use crate::text::{Json, TextReader};

#[derive(Debug)]
pub struct TextLink<T, C, S> {
    transport: T,
    clock: C,
    store: S,
    router: Router,
    reader: TextReader,
}

impl<T, C, S> TextLink<T, C, S>
where
    T: Transport,
    C: Clock,
    S: ConfigStore,
{
    pub fn new(config: &BusConfig, transport: T, clock: C, store: S) -> Self {
        Self {
            transport,
            clock,
            router: Router::new(config, &store),
            store,
            reader: TextReader::new(config.baud_rate),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T, C, S> SerialIo for TextLink<T, C, S>
where
    T: Transport,
    C: Clock,
    S: ConfigStore,
{
    fn router(&self) -> &Router {
        &self.router
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        trace!("send {}", frame);
        let line = format!("{}\n", Json(frame));
        self.transport
            .write_all(line.as_bytes())
            .context(TransportSnafu)
    }

    fn may_send(&self) -> bool {
        true
    }

    fn poll_non_blocking<D: DispatchSink>(&mut self, sink: &mut D) -> Result<(), Error> {
        let frame = match self.reader.read_frame(&mut self.transport, &self.clock) {
            Ok(frame) => frame,
            Err(ReceiveError::NoData) => return Ok(()),
            Err(error) => {
                warn!("receive error: {}", error);
                return Ok(());
            }
        };
        trace!("received {}", frame);
        let echoed = if frame.acknowledge() {
            self.send_frame(&frame.reply())
        } else {
            Ok(())
        };
        self.router.notify(&frame, &mut self.store, sink);
        echoed
    }
}
