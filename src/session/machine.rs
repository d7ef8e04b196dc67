//! Pure session-transport state machine
//!
//! Tracks the session state, the pending confirmed-delivery identifiers and
//! the reconnect budget for the current link epoch. The machine only decides;
//! [`super::transport::SessionTransport`] carries the decisions out.

use super::error::SessionError;
use super::message::{MessageId, MessageIdAllocator, OutboundMessage};
use crate::retry::{RetryDecision, RetryPolicy};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Transport failure, resolves to `Disconnected` within the same step
    Error,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
        }
    }

    /// Connecting or connected
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signals delivered by the session provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Connected,
    Disconnected,
    MessageReceived { topic: String, payload: Vec<u8> },
    Acknowledged(MessageId),
    TransportError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Everything one input caused
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStep {
    pub transitions: Vec<SessionTransition>,
    /// The session just reached `Connected`
    pub connected: bool,
    /// The current transport handle must be released
    pub close_handle: bool,
    /// Reopen the session after this delay
    pub reopen_after: Option<Duration>,
    /// Reconnect budget ran out after this many attempts
    pub exhausted: Option<u32>,
    /// Inbound message for the router
    pub inbound: Option<(String, Vec<u8>)>,
    /// Pending identifier cleared by an acknowledgement
    pub acknowledged: Option<MessageId>,
    pub ignored: Option<&'static str>,
}

impl SessionStep {
    fn ignored(reason: &'static str) -> Self {
        Self {
            ignored: Some(reason),
            ..Default::default()
        }
    }
}

/// Session state machine
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    ids: MessageIdAllocator,
    pending: HashSet<MessageId>,
    reconnects: u32,
    policy: RetryPolicy,
}

impl SessionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: SessionState::Disconnected,
            ids: MessageIdAllocator::new(),
            pending: HashSet::new(),
            reconnects: 0,
            policy,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn pending(&self) -> &HashSet<MessageId> {
        &self.pending
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// `Disconnected -> Connecting`, only while the link is up
    pub fn open(&mut self, link_up: bool) -> Result<SessionStep, SessionError> {
        if !link_up {
            return Err(SessionError::LinkDown);
        }
        if self.state.is_active() {
            return Ok(SessionStep::ignored("session already open"));
        }

        let mut step = SessionStep::default();
        self.enter(SessionState::Connecting, &mut step);
        Ok(step)
    }

    /// Apply a provider signal
    pub fn apply(&mut self, signal: SessionSignal, link_up: bool) -> SessionStep {
        match signal {
            SessionSignal::Connected => self.on_connected(),
            SessionSignal::Disconnected => {
                if !self.state.is_active() {
                    return SessionStep::ignored("disconnect while not open");
                }
                let mut step = SessionStep::default();
                self.enter(SessionState::Disconnected, &mut step);
                self.after_drop(&mut step, link_up);
                step
            }
            SessionSignal::TransportError(_) => {
                if !self.state.is_active() {
                    return SessionStep::ignored("transport error while not open");
                }
                let mut step = SessionStep::default();
                self.enter(SessionState::Error, &mut step);
                self.enter(SessionState::Disconnected, &mut step);
                self.after_drop(&mut step, link_up);
                step
            }
            SessionSignal::MessageReceived { topic, payload } => SessionStep {
                inbound: Some((topic, payload)),
                ..Default::default()
            },
            SessionSignal::Acknowledged(id) => {
                if self.pending.remove(&id) {
                    SessionStep {
                        acknowledged: Some(id),
                        ..Default::default()
                    }
                } else {
                    SessionStep::ignored("acknowledgement for unknown message id")
                }
            }
        }
    }

    /// Fresh reconnect budget for a new link epoch
    pub fn reset_reconnects(&mut self) {
        self.reconnects = 0;
    }

    /// Link loss dominates: any state -> `Disconnected`, new link epoch
    pub fn link_lost(&mut self) -> SessionStep {
        self.reset_reconnects();
        if self.state == SessionState::Disconnected {
            return SessionStep::ignored("session already disconnected");
        }

        let mut step = SessionStep::default();
        self.enter(SessionState::Disconnected, &mut step);
        self.pending.clear();
        step.close_handle = true;
        step
    }

    /// Local close for shutdown
    pub fn close(&mut self) -> SessionStep {
        let mut step = self.link_lost();
        step.ignored = None;
        step.close_handle = true;
        step
    }

    /// Reserve an identifier for `message`; rejects unless connected
    pub fn publish(&mut self, message: &OutboundMessage) -> Result<MessageId, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected { state: self.state });
        }

        let id = self.ids.next_id();
        if message.delivery().expects_ack() {
            self.pending.insert(id);
        }
        Ok(id)
    }

    /// Release an identifier whose transmission never left the process
    pub fn abandon(&mut self, id: MessageId) {
        self.pending.remove(&id);
    }

    fn on_connected(&mut self) -> SessionStep {
        if self.state != SessionState::Connecting {
            return SessionStep::ignored("connect acknowledgement while not connecting");
        }

        let mut step = SessionStep::default();
        self.reconnects = 0;
        self.enter(SessionState::Connected, &mut step);
        step.connected = true;
        step
    }

    fn after_drop(&mut self, step: &mut SessionStep, link_up: bool) {
        self.pending.clear();
        step.close_handle = true;

        if !link_up {
            return;
        }

        match self.policy.decide(self.reconnects) {
            RetryDecision::Retry { attempt, delay } => {
                self.reconnects = attempt;
                step.reopen_after = Some(delay);
            }
            RetryDecision::Exhausted { attempts } => {
                step.exhausted = Some(attempts);
            }
        }
    }

    fn enter(&mut self, to: SessionState, step: &mut SessionStep) {
        let from = std::mem::replace(&mut self.state, to);
        step.transitions.push(SessionTransition { from, to });
    }
}
