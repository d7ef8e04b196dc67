//! Session transport component
//!
//! Owns the session machine, the current transport handle and the
//! subscription set. Each `open` asks the provider for a fresh handle tagged
//! with a new generation; signals from older generations are discarded so a
//! handle from a previous link epoch can never drive the current session.

use super::error::SessionError;
use super::machine::{SessionMachine, SessionSignal, SessionState, SessionStep};
use super::message::{MessageId, OutboundMessage};
use crate::observability::DiagnosticSink;
use crate::retry::RetryPolicy;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

const TAG: &str = "session";

/// Factory for transport handles
pub trait SessionProvider: Send {
    type Handle: SessionHandle;

    /// Start a session attempt after `delay`. Signals for this attempt must be
    /// delivered with `generation`.
    fn open(&mut self, generation: u64, delay: Duration) -> Self::Handle;
}

/// A live transport attempt; every call is non-blocking
pub trait SessionHandle: Send {
    fn publish(&mut self, id: MessageId, message: OutboundMessage) -> Result<(), SessionError>;

    fn subscribe(&mut self, filter: &str) -> Result<(), SessionError>;

    /// Release the attempt; later signals from it are stale
    fn close(&mut self);
}

/// What the supervisor has to act on after a session signal
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The session just reached `Connected`; the initial state publish is due
    pub connected: bool,
    pub inbound: Option<(String, Vec<u8>)>,
    /// Reconnect budget exhausted after this many attempts, link still up
    pub exhausted: Option<u32>,
}

pub struct SessionTransport<P: SessionProvider> {
    provider: P,
    machine: SessionMachine,
    handle: Option<P::Handle>,
    generation: u64,
    subscriptions: BTreeSet<String>,
    sink: Arc<dyn DiagnosticSink>,
}

impl<P: SessionProvider> SessionTransport<P> {
    pub fn new(provider: P, policy: RetryPolicy, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            provider,
            machine: SessionMachine::new(policy),
            handle: None,
            generation: 0,
            subscriptions: BTreeSet::new(),
            sink,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending(&self) -> &HashSet<MessageId> {
        self.machine.pending()
    }

    pub fn subscriptions(&self) -> &BTreeSet<String> {
        &self.subscriptions
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Open a new session over a link that is up
    ///
    /// Starts a fresh reconnect budget; reopens driven by the retry policy go
    /// through `open_after` and keep counting.
    pub fn open(&mut self, link_up: bool) -> Result<(), SessionError> {
        if link_up {
            self.machine.reset_reconnects();
        }
        self.open_after(Duration::ZERO, link_up)
    }

    fn open_after(&mut self, delay: Duration, link_up: bool) -> Result<(), SessionError> {
        let step = self.machine.open(link_up)?;
        if let Some(reason) = step.ignored {
            self.sink.record(Level::DEBUG, TAG, &format!("open ignored: {reason}"));
            return Ok(());
        }

        self.release_handle();
        self.generation += 1;
        self.record_transitions(&step);
        self.sink.record(
            Level::INFO,
            TAG,
            &format!(
                "opening session generation={} delay_ms={}",
                self.generation,
                delay.as_millis()
            ),
        );
        self.handle = Some(self.provider.open(self.generation, delay));
        Ok(())
    }

    /// Apply a provider signal; stale generations are dropped
    pub fn on_signal(
        &mut self,
        generation: u64,
        signal: SessionSignal,
        link_up: bool,
    ) -> SessionOutcome {
        if generation != self.generation || self.handle.is_none() {
            self.sink.record(
                Level::DEBUG,
                TAG,
                &format!(
                    "discarding stale signal {signal:?} from generation={generation} (current={})",
                    self.generation
                ),
            );
            return SessionOutcome::default();
        }

        if let SessionSignal::TransportError(reason) = &signal {
            self.sink
                .record(Level::WARN, TAG, &format!("transport error: {reason}"));
        }

        let step = self.machine.apply(signal, link_up);
        self.execute(step, link_up)
    }

    /// Link loss: tear down synchronously, before anything else can run
    pub fn on_link_lost(&mut self) {
        let step = self.machine.link_lost();
        self.execute(step, false);
    }

    /// Shutdown path
    pub fn close(&mut self) {
        let step = self.machine.close();
        self.execute(step, false);
    }

    /// Publish without waiting for I/O
    pub fn publish(&mut self, message: OutboundMessage) -> Result<MessageId, SessionError> {
        let id = self.machine.publish(&message)?;
        let delivery = message.delivery();
        let topic = message.topic().to_string();

        let handle = match self.handle.as_mut() {
            Some(handle) => handle,
            None => {
                self.machine.abandon(id);
                return Err(SessionError::NotConnected {
                    state: self.machine.state(),
                });
            }
        };

        if let Err(e) = handle.publish(id, message) {
            self.machine.abandon(id);
            self.sink
                .record(Level::WARN, TAG, &format!("publish {id} to {topic} failed: {e}"));
            return Err(e);
        }

        self.sink.record(
            Level::DEBUG,
            TAG,
            &format!("published id={id} topic={topic} delivery={delivery:?}"),
        );
        Ok(id)
    }

    /// Add a topic filter; sent now when connected, otherwise on next connect
    pub fn subscribe(&mut self, filter: impl Into<String>) -> Result<(), SessionError> {
        let filter = filter.into();
        let is_new = self.subscriptions.insert(filter.clone());

        if is_new && self.machine.is_connected() {
            if let Some(handle) = self.handle.as_mut() {
                handle.subscribe(&filter)?;
                self.sink
                    .record(Level::INFO, TAG, &format!("subscribed to {filter}"));
            }
        }
        Ok(())
    }

    /// Connected side effect: initial state publish, then the subscriptions
    ///
    /// A refused initial publish is returned only after every subscription
    /// has been sent.
    pub fn announce(&mut self, initial: OutboundMessage) -> Result<MessageId, SessionError> {
        let published = self.publish(initial);

        if let Some(handle) = self.handle.as_mut() {
            for filter in &self.subscriptions {
                match handle.subscribe(filter) {
                    Ok(()) => self
                        .sink
                        .record(Level::INFO, TAG, &format!("subscribed to {filter}")),
                    Err(e) => self.sink.record(
                        Level::WARN,
                        TAG,
                        &format!("subscribe to {filter} failed: {e}"),
                    ),
                }
            }
        }
        published
    }

    fn execute(&mut self, step: SessionStep, link_up: bool) -> SessionOutcome {
        if let Some(reason) = step.ignored {
            self.sink.record(Level::DEBUG, TAG, &format!("ignored: {reason}"));
        }
        self.record_transitions(&step);

        if step.close_handle {
            self.release_handle();
        }

        if let Some(id) = step.acknowledged {
            self.sink
                .record(Level::DEBUG, TAG, &format!("message {id} acknowledged"));
        }

        if let Some(attempts) = step.exhausted {
            self.sink.record(
                Level::ERROR,
                TAG,
                &format!("reconnect budget exhausted after {attempts} attempts"),
            );
        }

        if let Some(delay) = step.reopen_after {
            self.sink.record(
                Level::INFO,
                TAG,
                &format!(
                    "reconnect attempt {}/{} after {}ms",
                    self.machine.reconnects(),
                    self.machine.policy().max_display(),
                    delay.as_millis()
                ),
            );
            if let Err(e) = self.open_after(delay, link_up) {
                self.sink
                    .record(Level::WARN, TAG, &format!("reopen failed: {e}"));
            }
        }

        SessionOutcome {
            connected: step.connected,
            inbound: step.inbound,
            exhausted: step.exhausted,
        }
    }

    fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    fn record_transitions(&self, step: &SessionStep) {
        for transition in &step.transitions {
            let level = match transition.to {
                SessionState::Error => Level::WARN,
                _ => Level::INFO,
            };
            self.sink.record(
                level,
                TAG,
                &format!(
                    "{} -> {} generation={} reconnects={}",
                    transition.from,
                    transition.to,
                    self.generation,
                    self.machine.reconnects()
                ),
            );
        }
    }
}

impl<P: SessionProvider> Drop for SessionTransport<P> {
    fn drop(&mut self) {
        self.release_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::message::Delivery;
    use crate::testing::{MemorySink, MockSessionProvider};

    fn transport(policy: RetryPolicy) -> (SessionTransport<MockSessionProvider>, MemorySink) {
        let sink = MemorySink::new();
        let transport =
            SessionTransport::new(MockSessionProvider::new(), policy, Arc::new(sink.clone()));
        (transport, sink)
    }

    fn connected() -> SessionTransport<MockSessionProvider> {
        let (mut transport, _) = transport(RetryPolicy::default());
        transport.open(true).unwrap();
        let generation = transport.generation();
        let outcome = transport.on_signal(generation, SessionSignal::Connected, true);
        assert!(outcome.connected);
        transport
    }

    fn state_message(delivery: Delivery) -> OutboundMessage {
        OutboundMessage::new("state", "LED is ON!", delivery, false)
    }

    #[test]
    fn test_open_requires_link() {
        let (mut transport, _) = transport(RetryPolicy::default());
        assert!(matches!(transport.open(false), Err(SessionError::LinkDown)));
        assert_eq!(transport.state(), SessionState::Disconnected);
        assert!(transport.provider().opens().is_empty());
    }

    #[test]
    fn test_each_open_uses_new_generation() {
        let (mut transport, _) = transport(RetryPolicy::default());
        transport.open(true).unwrap();
        transport.on_signal(1, SessionSignal::Disconnected, true);

        let opens = transport.provider().opens();
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[0].0, 1);
        assert_eq!(opens[1], (2, Duration::ZERO));
        assert_eq!(transport.provider().closed(), vec![1]);
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let (mut transport, sink) = transport(RetryPolicy::default());
        transport.open(true).unwrap();
        transport.on_link_lost();
        transport.open(true).unwrap();

        let outcome = transport.on_signal(1, SessionSignal::Connected, true);

        assert_eq!(outcome, SessionOutcome::default());
        assert_eq!(transport.state(), SessionState::Connecting);
        assert!(sink.contains("session", "stale"));
    }

    #[test]
    fn test_publish_rejected_unless_connected() {
        let (mut transport, _) = transport(RetryPolicy::default());
        let err = transport
            .publish(state_message(Delivery::FireAndForget))
            .unwrap_err();
        assert!(err.is_not_connected());

        transport.open(true).unwrap();
        let err = transport
            .publish(state_message(Delivery::FireAndForget))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotConnected {
                state: SessionState::Connecting
            }
        ));
        assert!(transport.provider().published().is_empty());
    }

    #[test]
    fn test_confirmed_publish_cleared_once_by_ack() {
        let mut transport = connected();
        let generation = transport.generation();
        let id = transport.publish(state_message(Delivery::Confirmed)).unwrap();
        assert!(transport.pending().contains(&id));

        transport.on_signal(generation, SessionSignal::Acknowledged(id), true);
        assert!(transport.pending().is_empty());

        let again = transport.on_signal(generation, SessionSignal::Acknowledged(id), true);
        assert_eq!(again, SessionOutcome::default());
        assert!(transport.pending().is_empty());
    }

    #[test]
    fn test_fire_and_forget_is_not_pending() {
        let mut transport = connected();
        transport
            .publish(state_message(Delivery::FireAndForget))
            .unwrap();
        assert!(transport.pending().is_empty());
    }

    #[test]
    fn test_announce_publishes_before_subscribing() {
        let (mut transport, _) = transport(RetryPolicy::default());
        transport.subscribe("devices/lamp/set").unwrap();
        transport.open(true).unwrap();
        assert!(transport.provider().subscribed().is_empty());

        transport.on_signal(1, SessionSignal::Connected, true);
        let id = transport.announce(state_message(Delivery::Confirmed)).unwrap();

        let published = transport.provider().published_with_ids();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, id);
        assert_eq!(
            transport.provider().subscribed(),
            vec![(1, "devices/lamp/set".to_string())]
        );
    }

    #[test]
    fn test_announce_subscribes_even_when_initial_publish_refused() {
        let sink = MemorySink::new();
        let mut transport = SessionTransport::new(
            MockSessionProvider::with_publish_failure(),
            RetryPolicy::default(),
            Arc::new(sink.clone()),
        );
        transport.subscribe("devices/lamp/set").unwrap();
        transport.subscribe("devices/lamp/brightness").unwrap();
        transport.open(true).unwrap();
        transport.on_signal(1, SessionSignal::Connected, true);

        let result = transport.announce(state_message(Delivery::Confirmed));

        assert!(matches!(result, Err(SessionError::PublishFailed(_))));
        assert!(transport.pending().is_empty());
        assert_eq!(
            transport.provider().subscribed(),
            vec![
                (1, "devices/lamp/brightness".to_string()),
                (1, "devices/lamp/set".to_string())
            ]
        );
        assert!(sink.contains("session", "subscribed to devices/lamp/set"));
    }

    #[test]
    fn test_explicit_open_starts_fresh_reconnect_budget() {
        let (mut transport, _) = transport(RetryPolicy::bounded(1));
        transport.open(true).unwrap();
        transport.on_signal(1, SessionSignal::TransportError("refused".into()), true);
        let outcome = transport.on_signal(2, SessionSignal::TransportError("refused".into()), true);
        assert_eq!(outcome.exhausted, Some(1));
        assert_eq!(transport.state(), SessionState::Disconnected);

        transport.open(true).unwrap();
        let outcome = transport.on_signal(3, SessionSignal::TransportError("refused".into()), true);

        assert_eq!(outcome.exhausted, None);
        assert_eq!(transport.state(), SessionState::Connecting);
        assert_eq!(transport.provider().opens().len(), 4);
    }

    #[test]
    fn test_subscribe_while_connected_is_sent_immediately() {
        let mut transport = connected();
        transport.subscribe("devices/lamp/set").unwrap();
        transport.subscribe("devices/lamp/set").unwrap();
        assert_eq!(transport.provider().subscribed().len(), 1);
    }

    #[test]
    fn test_link_loss_drops_pending_and_closes_handle() {
        let mut transport = connected();
        transport.publish(state_message(Delivery::Confirmed)).unwrap();

        transport.on_link_lost();

        assert_eq!(transport.state(), SessionState::Disconnected);
        assert!(transport.pending().is_empty());
        assert_eq!(transport.provider().closed(), vec![1]);
    }

    #[test]
    fn test_reconnect_budget_exhausts() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            backoff_pattern: vec![250, 500],
            sustained_delay: 1000,
        };
        let (mut transport, sink) = transport(policy);
        transport.open(true).unwrap();

        let first = transport.on_signal(1, SessionSignal::TransportError("refused".into()), true);
        assert_eq!(first.exhausted, None);
        let second = transport.on_signal(2, SessionSignal::TransportError("refused".into()), true);
        assert_eq!(second.exhausted, None);
        let third = transport.on_signal(3, SessionSignal::TransportError("refused".into()), true);
        assert_eq!(third.exhausted, Some(2));

        assert_eq!(transport.state(), SessionState::Disconnected);
        let delays: Vec<Duration> = transport
            .provider()
            .opens()
            .iter()
            .map(|(_, delay)| *delay)
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(500)
            ]
        );
        assert!(sink.contains("session", "exhausted"));
    }

    #[test]
    fn test_no_reopen_when_link_down() {
        let (mut transport, _) = transport(RetryPolicy::default());
        transport.open(true).unwrap();
        transport.on_signal(1, SessionSignal::Disconnected, false);

        assert_eq!(transport.state(), SessionState::Disconnected);
        assert_eq!(transport.provider().opens().len(), 1);
    }

    #[test]
    fn test_inbound_message_forwarded_verbatim() {
        let mut transport = connected();
        let outcome = transport.on_signal(
            1,
            SessionSignal::MessageReceived {
                topic: "devices/lamp/set".into(),
                payload: b"ON".to_vec(),
            },
            true,
        );
        assert_eq!(
            outcome.inbound,
            Some(("devices/lamp/set".to_string(), b"ON".to_vec()))
        );
    }
}
