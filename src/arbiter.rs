//! Token ring bus arbitration. See [`Arbiter`] for more details.

use log::{debug, trace};

use crate::config::Timing;
use crate::frame::Frame;
use crate::types::{Address, Value, Version};

/// Position of a node in the token ring.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RingState {
    /// Boot default, listens to learn whether other nodes exist.
    Unknown = 0,
    /// The bus was silent, probing for other nodes.
    Reboot = 1,
    /// No other node answered, the node sends on its own.
    Single = 2,
    /// Other nodes exist, waiting to receive the token.
    Unregistered = 3,
    /// Member of the ring.
    Registered = 4,
}

impl RingState {
    /// Numeric state as reported to the server.
    pub const fn code(self) -> u16 {
        self as u16
    }
}

/// Value of a token frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenValue {
    /// Pass the send token to the addressed node.
    EnableSend = 1,
    /// Reply to a registration request, "I am here".
    RegistrationInfo = 2,
    /// "Does anyone hear me?"
    RegistrationRequest = 3,
}

impl TokenValue {
    pub fn from_value(value: Value) -> Option<Self> {
        match value.to_u16() {
            1 => Some(TokenValue::EnableSend),
            2 => Some(TokenValue::RegistrationInfo),
            3 => Some(TokenValue::RegistrationRequest),
            _ => None,
        }
    }
}

impl From<TokenValue> for Value {
    fn from(token: TokenValue) -> Self {
        Value::from(token as u16)
    }
}

/// What the driver has to do after feeding an event to the [`Arbiter`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to transmit.
    None,
    /// The ring state changed; nothing to transmit.
    StateChanged,
    /// Transmit a token frame with this value.
    Send(TokenValue),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Event {
    Token(TokenValue),
    LoopTimeout,
    LoopStart,
    LoopShortBreak,
    LoopLongBreak,
}

/// Per node state of the token ring.
///
/// Nodes are ordered by ascending address. The token travels from each node
/// to its right neighbour, the node with the next higher address, and the
/// highest node hands it back to the leftmost one. A node may only transmit
/// application frames while it holds the token, see [`may_send`](Self::may_send).
///
/// The arbiter is purely reactive. Once per poll the driver either reports
/// a received token frame with [`on_token_frame`](Self::on_token_frame), or
/// reports silence with [`on_silence`](Self::on_silence). Silence advances
/// the tick timer, which synthesizes the loop events driving registration,
/// token handoff and recovery.
///
/// # Example
///
/// ```
/// use rs485_ring::arbiter::{Action, Arbiter, RingState, TokenValue};
/// use rs485_ring::{addr, Frame, Key};
///
/// let mut arbiter = Arbiter::default();
/// assert_eq!(arbiter.state(), RingState::Unknown);
///
/// // node 5 passes the token to us, node 9
/// let token = Frame::new(Key::TOKEN, TokenValue::EnableSend, addr(5), addr(9));
/// assert_eq!(arbiter.on_token_frame(addr(9), &token), Action::StateChanged);
/// assert_eq!(arbiter.state(), RingState::Registered);
/// assert!(arbiter.may_send());
/// ```
#[derive(Debug, Clone)]
pub struct Arbiter {
    timing: Timing,
    state: RingState,
    timer: u16,
    last_token_tick: u16,
    neighbour: Option<Address>,
    leftmost_sibling: Option<Address>,
    may_send: bool,
    version: Version,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(Timing::default())
    }
}

impl Arbiter {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            state: RingState::Unknown,
            timer: 0,
            last_token_tick: 0,
            neighbour: None,
            leftmost_sibling: None,
            may_send: false,
            version: Version::LATEST,
        }
    }

    pub const fn state(&self) -> RingState {
        self.state
    }

    /// True while this node holds the token.
    pub const fn may_send(&self) -> bool {
        self.may_send
    }

    /// Ticks since the last state transition.
    pub const fn timer(&self) -> u16 {
        self.timer
    }

    /// Tick of the last token handoff seen or made by this node.
    pub const fn last_token_tick(&self) -> u16 {
        self.last_token_tick
    }

    /// Smallest known address above our own.
    pub const fn neighbour(&self) -> Option<Address> {
        self.neighbour
    }

    /// Smallest address seen on the bus.
    pub const fn leftmost_sibling(&self) -> Option<Address> {
        self.leftmost_sibling
    }

    /// Version to use for the next token frame.
    pub const fn version(&self) -> Version {
        self.version
    }

    pub const fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Application commands are ignored while the ring isn't settled.
    pub fn ignore_commands(&self) -> bool {
        self.state != RingState::Registered
    }

    /// Where to send the token: the right neighbour, else the leftmost
    /// sibling, else broadcast.
    pub fn receiver_address(&self) -> Address {
        self.neighbour
            .or(self.leftmost_sibling)
            .unwrap_or(Address::BROADCAST)
    }

    /// Learn about the sender of a token frame.
    pub fn store_sender(&mut self, own: Address, sender: Address) {
        let right_of_us = own < sender && self.neighbour.map_or(true, |n| n > sender);
        if right_of_us {
            self.neighbour = Some(sender);
        }
        self.leftmost_sibling = Some(self.leftmost_sibling.map_or(sender, |l| l.min(sender)));
    }

    /// Feed a received token frame. `own` is the first address of this node.
    pub fn on_token_frame(&mut self, own: Address, frame: &Frame) -> Action {
        self.store_sender(own, frame.sender());
        let token = match TokenValue::from_value(frame.value()) {
            Some(token) => token,
            None => {
                trace!("ignoring token value {}", frame.value().to_u16());
                return Action::None;
            }
        };
        if token == TokenValue::EnableSend && self.version != frame.version() {
            debug!("token version {:?} -> {:?}", self.version, frame.version());
            self.version = frame.version();
        }
        let not_for_me = frame.receiver() != own;
        self.change_state(Event::Token(token), not_for_me)
    }

    /// Feed a poll cycle without a token frame.
    pub fn on_silence(&mut self) -> Action {
        let action = match self.loop_event() {
            Some(event) => self.change_state(event, true),
            None => Action::None,
        };
        if action != Action::StateChanged {
            self.timer = self.timer.saturating_add(1);
        }
        action
    }

    fn loop_event(&self) -> Option<Event> {
        if self.timer >= self.timing.max_wait {
            return Some(Event::LoopTimeout);
        }
        let phase = self.timer % self.timing.loop_period();
        if phase == 0 {
            Some(Event::LoopStart)
        } else if phase == self.timing.short_period {
            Some(Event::LoopShortBreak)
        } else if phase == self.timing.long_period {
            Some(Event::LoopLongBreak)
        } else {
            None
        }
    }

    fn change_state(&mut self, event: Event, not_for_me: bool) -> Action {
        match self.state {
            RingState::Unknown => self.handle_unknown(event, not_for_me),
            RingState::Reboot => self.handle_reboot(event, not_for_me),
            RingState::Single => self.handle_single(event, not_for_me),
            RingState::Unregistered => self.handle_unregistered(event, not_for_me),
            RingState::Registered => self.handle_registered(event, not_for_me),
        }
    }

    fn change_state_to(&mut self, state: RingState) {
        debug!("ring state {:?} -> {:?}", self.state, state);
        self.timer = 0;
        self.state = state;
    }

    fn forget_neighbours(&mut self) {
        self.neighbour = None;
        self.leftmost_sibling = None;
    }

    fn activate_enable_send(&self) -> Action {
        if self.receiver_address().is_broadcast() {
            Action::Send(TokenValue::RegistrationRequest)
        } else {
            Action::Send(TokenValue::EnableSend)
        }
    }

    fn handle_enable_send(&mut self, not_for_me: bool) -> Action {
        if not_for_me {
            self.change_state_to(RingState::Unregistered);
        } else {
            self.change_state_to(RingState::Registered);
            self.may_send = true;
        }
        Action::StateChanged
    }

    fn handle_unknown(&mut self, event: Event, not_for_me: bool) -> Action {
        self.may_send = false;
        match event {
            Event::Token(TokenValue::EnableSend) => self.handle_enable_send(not_for_me),
            Event::Token(TokenValue::RegistrationRequest) => {
                self.change_state_to(RingState::Unregistered);
                Action::Send(TokenValue::RegistrationInfo)
            }
            Event::LoopStart => {
                if self.timer == 0 {
                    self.forget_neighbours();
                }
                Action::None
            }
            Event::LoopTimeout => {
                self.change_state_to(RingState::Reboot);
                Action::StateChanged
            }
            _ => Action::None,
        }
    }

    fn handle_reboot(&mut self, event: Event, not_for_me: bool) -> Action {
        self.may_send = false;
        match event {
            Event::Token(TokenValue::EnableSend) => self.handle_enable_send(not_for_me),
            Event::Token(TokenValue::RegistrationRequest) => {
                self.change_state_to(RingState::Unregistered);
                Action::Send(TokenValue::RegistrationInfo)
            }
            Event::LoopStart => self.activate_enable_send(),
            Event::LoopTimeout => {
                self.change_state_to(RingState::Single);
                Action::StateChanged
            }
            _ => Action::None,
        }
    }

    fn handle_single(&mut self, event: Event, not_for_me: bool) -> Action {
        match event {
            Event::Token(TokenValue::EnableSend) => self.handle_enable_send(not_for_me),
            Event::Token(TokenValue::RegistrationInfo) => {
                self.may_send = false;
                self.change_state_to(RingState::Unknown);
                Action::StateChanged
            }
            Event::Token(TokenValue::RegistrationRequest) => {
                self.may_send = false;
                self.change_state_to(RingState::Unregistered);
                Action::Send(TokenValue::RegistrationInfo)
            }
            Event::LoopStart => {
                self.may_send = false;
                Action::Send(TokenValue::RegistrationRequest)
            }
            Event::LoopShortBreak => {
                self.may_send = true;
                Action::None
            }
            Event::LoopTimeout => {
                self.timer = 0;
                Action::None
            }
            Event::LoopLongBreak => Action::None,
        }
    }

    fn handle_unregistered(&mut self, event: Event, not_for_me: bool) -> Action {
        self.may_send = false;
        match event {
            Event::Token(TokenValue::EnableSend) => {
                if !not_for_me {
                    self.change_state_to(RingState::Registered);
                    self.may_send = true;
                }
                Action::StateChanged
            }
            Event::Token(TokenValue::RegistrationRequest) => {
                Action::Send(TokenValue::RegistrationInfo)
            }
            Event::LoopTimeout => {
                self.change_state_to(RingState::Unknown);
                Action::StateChanged
            }
            _ => Action::None,
        }
    }

    fn handle_registered(&mut self, event: Event, not_for_me: bool) -> Action {
        match event {
            Event::Token(TokenValue::EnableSend) => {
                if not_for_me {
                    self.may_send = false;
                    self.last_token_tick = self.timer;
                } else {
                    self.may_send = true;
                    self.timer = 0;
                }
                Action::None
            }
            Event::LoopShortBreak => self.registered_short_break(),
            Event::LoopLongBreak => {
                let wrap_around = self.timer == self.timing.long_period
                    && self.neighbour.is_none()
                    && self.leftmost_sibling.is_some();
                if wrap_around {
                    Action::Send(TokenValue::EnableSend)
                } else {
                    Action::None
                }
            }
            Event::LoopTimeout => {
                self.change_state_to(RingState::Unregistered);
                Action::StateChanged
            }
            _ => Action::None,
        }
    }

    fn registered_short_break(&mut self) -> Action {
        let token_lost = u32::from(self.last_token_tick) + u32::from(self.timing.token_lost_after())
            <= u32::from(self.timer);
        if self.timer != self.timing.short_period && !token_lost {
            return Action::None;
        }
        self.last_token_tick = self.timer;
        self.may_send = false;
        if self.neighbour.is_none() && !token_lost {
            Action::Send(TokenValue::RegistrationRequest)
        } else {
            Action::Send(TokenValue::EnableSend)
        }
    }
}
