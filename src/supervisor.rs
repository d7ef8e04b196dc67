//! Connectivity supervisor
//!
//! Owns the link machine, the session transport, the reporting scheduler and
//! the inbound router. Every provider signal, timer tick and stop request is
//! an event on one unbounded queue, and [`Supervisor::handle`] applies them
//! one at a time without awaiting, so no component state is ever shared
//! between tasks.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use uplink::config::ReporterSection;
//! use uplink::observability::TracingSink;
//! use uplink::reporter::Reporter;
//! use uplink::retry::RetryPolicy;
//! use uplink::router::InboundRouter;
//! use uplink::session::SessionTransport;
//! use uplink::supervisor::{event_channel, Supervisor, SupervisorEvent};
//! use uplink::link::{LinkSignal, LinkState};
//! use uplink::testing::{MockNetworkProvider, MockSessionProvider, RecordingActuator};
//!
//! let (signals, _events) = event_channel();
//! let sink = Arc::new(TracingSink);
//! let session = SessionTransport::new(MockSessionProvider::new(), RetryPolicy::default(), sink.clone());
//! let reporter = Reporter::new(
//!     &ReporterSection::default(),
//!     "homeassistant/battery/state",
//!     Box::new(RecordingActuator::new()),
//!     sink.clone(),
//! );
//! let mut supervisor = Supervisor::new(
//!     MockNetworkProvider::new(),
//!     RetryPolicy::bounded(5),
//!     session,
//!     reporter,
//!     InboundRouter::new(),
//!     sink,
//! );
//!
//! supervisor.start();
//! supervisor.handle(SupervisorEvent::Link(LinkSignal::Started));
//! assert_eq!(supervisor.link_state(), &LinkState::Associating);
//! # drop(signals);
//! ```

use crate::error::{SupervisorError, SupervisorResult};
use crate::link::{
    LinkCommand, LinkMachine, LinkNotification, LinkSignal, LinkState, LinkStep, NetworkProvider,
};
use crate::observability::DiagnosticSink;
use crate::reporter::Reporter;
use crate::retry::RetryPolicy;
use crate::router::InboundRouter;
use crate::session::{SessionProvider, SessionSignal, SessionState, SessionTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, Level};

const TAG: &str = "link";
const SUPERVISOR_TAG: &str = "supervisor";

/// Everything the supervisor reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Link(LinkSignal),
    Session {
        generation: u64,
        signal: SessionSignal,
    },
    Tick,
    Stop,
}

/// Non-blocking sender used by providers to deliver signals
///
/// Sending never waits. Once the supervisor is gone signals are dropped.
#[derive(Debug, Clone)]
pub struct SignalSender {
    sender: mpsc::UnboundedSender<SupervisorEvent>,
}

impl SignalSender {
    pub fn new(sender: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        Self { sender }
    }

    pub fn send(&self, event: SupervisorEvent) {
        if self.sender.send(event).is_err() {
            debug!("Supervisor queue closed, dropping event");
        }
    }

    pub fn link(&self, signal: LinkSignal) {
        self.send(SupervisorEvent::Link(signal));
    }

    pub fn session(&self, generation: u64, signal: SessionSignal) {
        self.send(SupervisorEvent::Session { generation, signal });
    }

    pub fn tick(&self) {
        self.send(SupervisorEvent::Tick);
    }

    pub fn stop(&self) {
        self.send(SupervisorEvent::Stop);
    }
}

/// Create the supervisor queue
///
/// ```rust
/// use uplink::supervisor::{event_channel, SupervisorEvent, SupervisorHandle};
///
/// let (signals, mut events) = event_channel();
/// SupervisorHandle::new(signals).stop();
///
/// tokio_test::block_on(async {
///     assert_eq!(events.recv().await, Some(SupervisorEvent::Stop));
/// });
/// ```
pub fn event_channel() -> (SignalSender, mpsc::UnboundedReceiver<SupervisorEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (SignalSender::new(sender), receiver)
}

/// Cloneable handle for requesting a graceful stop
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    signals: SignalSender,
}

impl SupervisorHandle {
    pub fn new(signals: SignalSender) -> Self {
        Self { signals }
    }

    pub fn stop(&self) {
        self.signals.stop();
    }
}

pub struct Supervisor<N: NetworkProvider, S: SessionProvider> {
    link: LinkMachine,
    network: N,
    session: SessionTransport<S>,
    reporter: Reporter,
    router: InboundRouter,
    sink: Arc<dyn DiagnosticSink>,
    stopped: bool,
    link_failure: Option<u32>,
    session_exhausted: Option<u32>,
}

impl<N: NetworkProvider, S: SessionProvider> Supervisor<N, S> {
    pub fn new(
        network: N,
        link_policy: RetryPolicy,
        session: SessionTransport<S>,
        reporter: Reporter,
        router: InboundRouter,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            link: LinkMachine::new(link_policy),
            network,
            session,
            reporter,
            router,
            sink,
            stopped: false,
            link_failure: None,
            session_exhausted: None,
        }
    }

    pub fn link_state(&self) -> &LinkState {
        self.link.state()
    }

    pub fn link_retries(&self) -> u32 {
        self.link.retries()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &SessionTransport<S> {
        &self.session
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn router_mut(&mut self) -> &mut InboundRouter {
        &mut self.router
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Retry count at which the link failed, while it stays failed
    pub fn link_failure(&self) -> Option<u32> {
        self.link_failure
    }

    /// Attempts after which the session gave up during the current link epoch
    pub fn session_exhausted(&self) -> Option<u32> {
        self.session_exhausted
    }

    /// Add a topic filter to the session's subscription set
    pub fn subscribe(&mut self, filter: impl Into<String>) -> SupervisorResult<()> {
        self.session.subscribe(filter)?;
        Ok(())
    }

    /// Bring the link up
    pub fn start(&mut self) {
        if self.stopped {
            return;
        }
        let step = self.link.start();
        self.apply_link_step(step);
    }

    /// Manual recovery after the link failed
    pub fn restart_link(&mut self) {
        if self.stopped {
            return;
        }
        let step = self.link.restart();
        if step.ignored.is_none() {
            self.link_failure = None;
        }
        self.apply_link_step(step);
    }

    /// Manual recovery after the session ran out of reconnect attempts
    ///
    /// Opens a session with a fresh budget; the link must be up.
    pub fn restart_session(&mut self) -> SupervisorResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.session_exhausted = None;
        self.session.open(self.link.is_up())?;
        Ok(())
    }

    /// Apply one event. Never blocks or awaits.
    pub fn handle(&mut self, event: SupervisorEvent) {
        if self.stopped {
            self.sink.record(
                Level::TRACE,
                SUPERVISOR_TAG,
                &format!("ignoring {event:?} after stop"),
            );
            return;
        }

        match event {
            SupervisorEvent::Link(signal) => {
                let step = self.link.apply(signal);
                self.apply_link_step(step);
            }
            SupervisorEvent::Session { generation, signal } => {
                self.on_session_signal(generation, signal);
            }
            SupervisorEvent::Tick => {
                self.reporter.tick(&mut self.session);
            }
            SupervisorEvent::Stop => self.stop(),
        }
    }

    /// Drive the supervisor until it is stopped or a retry budget runs out
    ///
    /// Returns [`SupervisorError::LinkExhausted`] once the link fails and
    /// [`SupervisorError::SessionExhausted`] once the session gives up while
    /// the link is still up. The periodic timer skips missed ticks rather than
    /// bursting to catch up.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
        period: Duration,
    ) -> SupervisorResult<()> {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self.link.state() == &LinkState::Idle {
            self.start();
        }

        loop {
            if self.stopped {
                return Ok(());
            }
            if let Some(retries) = self.link_failure {
                return Err(SupervisorError::LinkExhausted { retries });
            }
            if let Some(attempts) = self.session_exhausted {
                return Err(SupervisorError::SessionExhausted { attempts });
            }

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => return Err(SupervisorError::ChannelClosed),
                },
                _ = ticker.tick() => self.handle(SupervisorEvent::Tick),
            }
        }
    }

    fn stop(&mut self) {
        self.sink.record(Level::INFO, SUPERVISOR_TAG, "stopping");
        self.session.close();
        let step = self.link.stop();
        self.apply_link_step(step);
        self.stopped = true;
    }

    fn on_session_signal(&mut self, generation: u64, signal: SessionSignal) {
        let outcome = self
            .session
            .on_signal(generation, signal, self.link.is_up());

        if outcome.connected {
            self.session_exhausted = None;
            let initial = self.reporter.initial_message();
            if let Err(e) = self.session.announce(initial) {
                self.sink.record(
                    Level::WARN,
                    SUPERVISOR_TAG,
                    &format!("initial state publish failed: {e}"),
                );
            }
        }

        if let Some((topic, payload)) = outcome.inbound {
            self.router.route(&topic, &payload);
        }

        if let Some(attempts) = outcome.exhausted {
            self.session_exhausted = Some(attempts);
        }
    }

    fn apply_link_step(&mut self, step: LinkStep) {
        if let Some(reason) = step.ignored {
            self.sink
                .record(Level::DEBUG, TAG, &format!("ignored: {reason}"));
        }

        let max = self.link.max_retries();
        for transition in &step.transitions {
            let level = match transition.to {
                LinkState::Failed => Level::ERROR,
                LinkState::Retrying => Level::WARN,
                _ => Level::INFO,
            };
            self.sink.record(
                level,
                TAG,
                &format!(
                    "{} -> {} retries={}/{max}",
                    transition.from, transition.to, transition.retries
                ),
            );
        }

        // Dependents are torn down before any new association is requested
        for notification in step.notifications {
            match notification {
                LinkNotification::Ready(address) => {
                    self.link_failure = None;
                    self.session_exhausted = None;
                    self.sink
                        .record(Level::INFO, TAG, &format!("link ready address={address}"));
                    if let Err(e) = self.session.open(true) {
                        self.sink.record(
                            Level::WARN,
                            SUPERVISOR_TAG,
                            &format!("session open failed: {e}"),
                        );
                    }
                }
                LinkNotification::Lost => {
                    self.session_exhausted = None;
                    self.session.on_link_lost();
                }
                LinkNotification::Failed { retries } => {
                    self.session.on_link_lost();
                    self.link_failure = Some(retries);
                    self.sink.record(
                        Level::ERROR,
                        TAG,
                        &format!("link failed after {retries} retries"),
                    );
                }
            }
        }

        for command in step.commands {
            match command {
                LinkCommand::StartRadio => self.network.start(),
                LinkCommand::Associate { attempt, delay } => {
                    self.network.associate(attempt, delay)
                }
                LinkCommand::StopRadio => self.network.stop(),
            }
        }
    }
}
