//! Half-duplex RS485 driver. See [`Rs485`] for more details.

use arrayvec::ArrayVec;
use log::{trace, warn};
use snafu::ResultExt;

use crate::arbiter::{Action, Arbiter, RingState, TokenValue};
use crate::config::BusConfig;
use crate::frame::{Frame, ReceiveError, MAX_FRAME_SIZE};
use crate::hal::{self, transfer_time_ms, Clock, DirectionPin, Transport};
use crate::router::{ConfigStore, DispatchSink, Error, Router, SerialIo, TransportSnafu};
use crate::types::{Address, Key};

/// Start bit, eight data bits, stop bit.
const BITS_PER_CHAR: u64 = 9;
/// Settle time after switching the transceiver to transmit.
const TRANSMIT_SETUP_MS: u64 = 3;
/// Extra time before releasing the line after the last byte.
const TRANSMIT_HOLD_MS: u64 = 2;
const RECEIVE_MARGIN_MS: u64 = 3;

/// RS485 bus driver for one node.
///
/// The driver owns the byte transport, the direction pin, the clock and the
/// persistent configuration. It runs the token ring [`Arbiter`] and reports
/// application frames to a [`DispatchSink`].
///
/// [`poll_non_blocking`](SerialIo::poll_non_blocking) is meant to be called
/// once per tick, nominally every 10 ms. Each call handles at most one frame;
/// a call without a frame counts as one tick of silence for the arbiter.
///
/// Application frames should only be sent while
/// [`may_send`](SerialIo::may_send) is true.
#[derive(Debug)]
pub struct Rs485<T, P, C, S> {
    transport: T,
    pin: P,
    clock: C,
    store: S,
    router: Router,
    arbiter: Arbiter,
    baud_rate: u32,
    receive_timeout_ms: u64,
    receive_buffer: ArrayVec<u8, MAX_FRAME_SIZE>,
    receive_error: Option<ReceiveError>,
    state_changed: bool,
}

impl<T, P, C, S> Rs485<T, P, C, S>
where
    T: Transport,
    P: DirectionPin,
    C: Clock,
    S: ConfigStore,
{
    /// Create a driver, loading the node addresses from `store`. The
    /// direction pin is switched to receive.
    pub fn new(config: &BusConfig, transport: T, mut pin: P, clock: C, store: S) -> Self {
        pin.set_receive();
        Self {
            transport,
            pin,
            clock,
            router: Router::new(config, &store),
            store,
            arbiter: Arbiter::new(config.timing),
            baud_rate: config.baud_rate,
            receive_timeout_ms: RECEIVE_MARGIN_MS
                + transfer_time_ms(BITS_PER_CHAR, 1, config.baud_rate),
            receive_buffer: ArrayVec::new(),
            receive_error: None,
            state_changed: false,
        }
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
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

    pub fn pin(&self) -> &P {
        &self.pin
    }

    /// Receive error waiting to be reported with the next token frame.
    pub fn pending_receive_error(&self) -> Option<ReceiveError> {
        self.receive_error
    }

    /// Milliseconds without a byte that end a frame.
    pub fn receive_timeout_ms(&self) -> u64 {
        self.receive_timeout_ms
    }

    /// Write a frame, driving the direction pin around it.
    ///
    /// The line is released even if the transport fails.
    pub fn transmit(&mut self, frame: &Frame) -> Result<(), hal::Error> {
        let data = frame.encode();
        trace!("send {}", frame);
        self.pin.set_transmit();
        self.clock.delay_ms(TRANSMIT_SETUP_MS);
        let written = self.transport.write_all(&data);
        self.clock
            .delay_ms(transfer_time_ms(BITS_PER_CHAR, data.len() as u64, self.baud_rate));
        self.clock.delay_ms(TRANSMIT_HOLD_MS);
        self.pin.set_receive();
        if let Err(e) = &written {
            warn!("transmit failed: {}", e);
        }
        written
    }

    fn receive(&mut self) -> Result<Frame, ReceiveError> {
        self.receive_buffer.clear();
        if self.transport.bytes_available() == 0 {
            return Err(ReceiveError::NoData);
        }
        let mut last_byte = self.clock.millis();
        // bytes past the frame stay in the transport for the next poll
        while self.receive_buffer.len() < Frame::expected_size(&self.receive_buffer) {
            if let Some(byte) = self.transport.read_byte() {
                last_byte = self.clock.millis();
                // no frame starts with a zero or a byte with the high bit set
                if self.receive_buffer.is_empty() && (byte == 0 || byte > 0x7f) {
                    continue;
                }
                self.receive_buffer.push(byte);
            } else if last_byte + self.receive_timeout_ms <= self.clock.millis() {
                break;
            }
        }
        Frame::decode(&self.receive_buffer)
    }

    fn handle_token(&mut self, frame: &Frame) -> Result<(), Error> {
        trace!("token {}", frame);
        let action = self.arbiter.on_token_frame(self.router.own_address(), frame);
        let flushed = self.send_receive_error();
        let handled = self.handle_action(action);
        flushed.and(handled)
    }

    fn handle_command<D: DispatchSink>(&mut self, frame: &Frame, sink: &mut D) -> Result<(), Error> {
        trace!("received {}", frame);
        let echoed = if frame.acknowledge() && self.router.is_own_address(frame.receiver()) {
            self.transmit(&frame.reply()).context(TransportSnafu)
        } else {
            Ok(())
        };
        if self.arbiter.ignore_commands() {
            trace!("ignoring {} while {:?}", frame, self.arbiter.state());
        } else {
            self.router.notify(frame, &mut self.store, sink);
        }
        echoed
    }

    fn handle_silence(&mut self) -> Result<(), Error> {
        let action = self.arbiter.on_silence();
        self.handle_action(action)
    }

    fn handle_action(&mut self, action: Action) -> Result<(), Error> {
        if action == Action::None {
            return Ok(());
        }
        if action == Action::StateChanged {
            self.state_changed = true;
        }
        let mut result = Ok(());
        let report = action == Action::Send(TokenValue::RegistrationInfo)
            || (self.state_changed && self.arbiter.may_send());
        if report {
            result = self.report_state();
            self.state_changed = false;
        }
        match action {
            Action::Send(TokenValue::EnableSend) => {
                let receiver = self.arbiter.receiver_address();
                result.and(self.send_token(TokenValue::EnableSend, receiver))
            }
            Action::Send(token) => result.and(self.send_token(token, Address::BROADCAST)),
            _ => result,
        }
    }

    fn send_token(&mut self, token: TokenValue, receiver: Address) -> Result<(), Error> {
        let frame = Frame::new(Key::TOKEN, token, self.router.own_address(), receiver)
            .with_version(self.arbiter.version());
        self.transmit(&frame).context(TransportSnafu)
    }

    /// Tell the server about our place in the ring.
    fn report_state(&mut self) -> Result<(), Error> {
        let state: RingState = self.arbiter.state();
        let value = state.code() * 100 + u16::from(self.arbiter.receiver_address());
        self.send_to_server(0, Key::STATE, value)
    }

    fn send_receive_error(&mut self) -> Result<(), Error> {
        match self.receive_error.take() {
            Some(error) => self.send_to_server(0, Key::RECEIVE_ERROR, error.code()),
            None => Ok(()),
        }
    }
}

impl<T, P, C, S> SerialIo for Rs485<T, P, C, S>
where
    T: Transport,
    P: DirectionPin,
    C: Clock,
    S: ConfigStore,
{
    fn router(&self) -> &Router {
        &self.router
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        self.transmit(frame).context(TransportSnafu)
    }

    fn may_send(&self) -> bool {
        self.arbiter.may_send()
    }

    fn poll_non_blocking<D: DispatchSink>(&mut self, sink: &mut D) -> Result<(), Error> {
        match self.receive() {
            Err(ReceiveError::NoData) => self.handle_silence(),
            Err(error) => {
                warn!("receive error: {}", error);
                self.receive_error = Some(error);
                self.handle_silence()
            }
            Ok(frame) if frame.is_token() => self.handle_token(&frame),
            Ok(frame) => self.handle_command(&frame, sink),
        }
    }
}
