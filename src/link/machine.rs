//! Pure network-link state machine
//!
//! Inputs are the three provider signals plus the start/restart/stop
//! operations. Every input returns a [`LinkStep`] describing the transitions
//! taken, the provider commands to issue and the notifications for
//! dependents. The machine never performs I/O itself.

use crate::retry::{RetryDecision, RetryPolicy};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Retry cap used when a policy without a cap is handed to the link machine
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Network link state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Not started, or stopped
    Idle,
    /// Association in flight
    Associating,
    /// Association lost, a new attempt is being scheduled
    Retrying,
    /// Associated and addressed
    Up(IpAddr),
    /// Retries exhausted, needs a manual restart
    Failed,
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Associating => "associating",
            LinkState::Retrying => "retrying",
            LinkState::Up(_) => "up",
            LinkState::Failed => "failed",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up(_))
    }

    /// Address of the link, present only while up
    pub fn address(&self) -> Option<IpAddr> {
        match self {
            LinkState::Up(address) => Some(*address),
            _ => None,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up(address) => write!(f, "up({address})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Signals delivered by the network provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// Radio is running and ready to associate
    Started,
    /// Association failed or was dropped
    Lost,
    /// Address assigned, the link is usable
    AddressAcquired(IpAddr),
}

/// Requests the machine makes of the network provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    StartRadio,
    /// Associate after `delay`; attempt 0 is the initial association
    Associate { attempt: u32, delay: Duration },
    StopRadio,
}

/// Notifications for components layered on the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotification {
    Ready(IpAddr),
    /// The link left `Up`; dependents must tear down before anything else runs
    Lost,
    Failed { retries: u32 },
}

/// A single state change, kept for the diagnostic timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTransition {
    pub from: LinkState,
    pub to: LinkState,
    pub retries: u32,
}

/// Everything one input caused
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkStep {
    pub transitions: Vec<LinkTransition>,
    pub commands: Vec<LinkCommand>,
    pub notifications: Vec<LinkNotification>,
    /// Reason the input was ignored, if it was
    pub ignored: Option<&'static str>,
}

impl LinkStep {
    fn ignored(reason: &'static str) -> Self {
        Self {
            ignored: Some(reason),
            ..Default::default()
        }
    }
}

/// Network link state machine with bounded retries
#[derive(Debug, Clone)]
pub struct LinkMachine {
    state: LinkState,
    retries: u32,
    policy: RetryPolicy,
}

impl LinkMachine {
    /// Create an idle machine. The link never retries forever: a policy
    /// without a cap gets [`DEFAULT_MAX_RETRIES`].
    pub fn new(policy: RetryPolicy) -> Self {
        let max_attempts = Some(policy.max_attempts.unwrap_or(DEFAULT_MAX_RETRIES));
        Self {
            state: LinkState::Idle,
            retries: 0,
            policy: RetryPolicy {
                max_attempts,
                ..policy
            },
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.policy.max_attempts.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn is_up(&self) -> bool {
        self.state.is_up()
    }

    /// `Idle -> Associating`
    pub fn start(&mut self) -> LinkStep {
        if self.state != LinkState::Idle {
            return LinkStep::ignored("link already started");
        }

        let mut step = LinkStep::default();
        self.enter(LinkState::Associating, &mut step);
        step.commands.push(LinkCommand::StartRadio);
        step
    }

    /// Manual recovery from `Failed` (or a stopped link)
    pub fn restart(&mut self) -> LinkStep {
        let command = match self.state {
            LinkState::Failed => LinkCommand::Associate {
                attempt: 0,
                delay: Duration::ZERO,
            },
            LinkState::Idle => LinkCommand::StartRadio,
            _ => return LinkStep::ignored("link is not failed or idle"),
        };

        let mut step = LinkStep::default();
        self.retries = 0;
        self.enter(LinkState::Associating, &mut step);
        step.commands.push(command);
        step
    }

    /// Abort path: any state -> `Idle`
    pub fn stop(&mut self) -> LinkStep {
        if self.state == LinkState::Idle {
            return LinkStep::ignored("link already idle");
        }

        let mut step = LinkStep::default();
        if self.state.is_up() {
            step.notifications.push(LinkNotification::Lost);
        }
        self.retries = 0;
        self.enter(LinkState::Idle, &mut step);
        step.commands.push(LinkCommand::StopRadio);
        step
    }

    /// Apply a provider signal
    pub fn apply(&mut self, signal: LinkSignal) -> LinkStep {
        match signal {
            LinkSignal::Started => self.on_started(),
            LinkSignal::Lost => self.on_lost(),
            LinkSignal::AddressAcquired(address) => self.on_address(address),
        }
    }

    fn on_started(&mut self) -> LinkStep {
        if self.state != LinkState::Associating {
            return LinkStep::ignored("radio start outside association");
        }

        LinkStep {
            commands: vec![LinkCommand::Associate {
                attempt: self.retries,
                delay: Duration::ZERO,
            }],
            ..Default::default()
        }
    }

    fn on_lost(&mut self) -> LinkStep {
        match self.state {
            LinkState::Idle => return LinkStep::ignored("link lost while idle"),
            LinkState::Failed => return LinkStep::ignored("link lost after failure"),
            _ => {}
        }

        let mut step = LinkStep::default();
        if self.state.is_up() {
            step.notifications.push(LinkNotification::Lost);
        }

        match self.policy.decide(self.retries) {
            RetryDecision::Retry { attempt, delay } => {
                self.retries = attempt;
                self.enter(LinkState::Retrying, &mut step);
                step.commands.push(LinkCommand::Associate { attempt, delay });
                self.enter(LinkState::Associating, &mut step);
            }
            RetryDecision::Exhausted { attempts } => {
                self.enter(LinkState::Retrying, &mut step);
                self.enter(LinkState::Failed, &mut step);
                step.notifications
                    .push(LinkNotification::Failed { retries: attempts });
            }
        }
        step
    }

    fn on_address(&mut self, address: IpAddr) -> LinkStep {
        if self.state == LinkState::Up(address) {
            return LinkStep::ignored("address unchanged");
        }

        let mut step = LinkStep::default();
        self.retries = 0;
        self.enter(LinkState::Up(address), &mut step);
        step.notifications.push(LinkNotification::Ready(address));
        step
    }

    fn enter(&mut self, to: LinkState, step: &mut LinkStep) {
        let from = std::mem::replace(&mut self.state, to.clone());
        step.transitions.push(LinkTransition {
            from,
            to,
            retries: self.retries,
        });
    }
}
