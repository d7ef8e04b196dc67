//! Reporting scheduler
//!
//! Every tick toggles the actuator and publishes the new state, but only while
//! the session is connected. A tick that arrives at any other time leaves the
//! bit, the actuator and the session untouched.

use crate::actuator::Actuator;
use crate::config::ReporterSection;
use crate::observability::DiagnosticSink;
use crate::session::{Delivery, MessageId, OutboundMessage, SessionProvider, SessionTransport};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::Level;

const TAG: &str = "reporter";

/// Scheduler bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportCycle {
    /// Current actuator bit
    pub level: bool,
    /// Ticks seen, active or not
    pub ticks: u64,
    /// Ticks that toggled and published
    pub fired: u64,
    pub last_fired: Option<DateTime<Utc>>,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session not connected; nothing happened
    Skipped,
    Published { id: MessageId, level: bool },
    /// Toggled, but the handle refused the message
    PublishFailed { level: bool },
}

pub struct Reporter {
    topic: String,
    payload_on: String,
    payload_off: String,
    retain: bool,
    actuator: Box<dyn Actuator>,
    cycle: ReportCycle,
    sink: Arc<dyn DiagnosticSink>,
}

impl Reporter {
    pub fn new(
        config: &ReporterSection,
        topic: impl Into<String>,
        actuator: Box<dyn Actuator>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload_on: config.payload_on.clone(),
            payload_off: config.payload_off.clone(),
            retain: config.retain,
            actuator,
            cycle: ReportCycle::default(),
            sink,
        }
    }

    pub fn cycle(&self) -> &ReportCycle {
        &self.cycle
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn payload(&self, level: bool) -> &str {
        if level {
            &self.payload_on
        } else {
            &self.payload_off
        }
    }

    /// Current state, confirmed delivery; published on every connect
    pub fn initial_message(&self) -> OutboundMessage {
        OutboundMessage::new(
            self.topic.clone(),
            self.payload(self.cycle.level).to_string(),
            Delivery::Confirmed,
            self.retain,
        )
    }

    /// One scheduler tick
    pub fn tick<P: SessionProvider>(&mut self, session: &mut SessionTransport<P>) -> TickOutcome {
        self.cycle.ticks += 1;

        if !session.is_connected() {
            self.sink.record(
                Level::TRACE,
                TAG,
                &format!("tick {} skipped, session {}", self.cycle.ticks, session.state()),
            );
            return TickOutcome::Skipped;
        }

        let level = !self.cycle.level;
        let message = OutboundMessage::new(
            self.topic.clone(),
            self.payload(level).to_string(),
            Delivery::FireAndForget,
            self.retain,
        );

        match session.publish(message) {
            Ok(id) => {
                self.commit(level);
                self.sink.record(
                    Level::DEBUG,
                    TAG,
                    &format!("tick {} published level={level} id={id}", self.cycle.ticks),
                );
                TickOutcome::Published { id, level }
            }
            Err(e) if e.is_not_connected() => {
                self.sink.record(
                    Level::DEBUG,
                    TAG,
                    &format!("tick {} skipped: {e}", self.cycle.ticks),
                );
                TickOutcome::Skipped
            }
            Err(e) => {
                self.commit(level);
                self.sink.record(
                    Level::WARN,
                    TAG,
                    &format!("tick {} publish failed: {e}", self.cycle.ticks),
                );
                TickOutcome::PublishFailed { level }
            }
        }
    }

    fn commit(&mut self, level: bool) {
        self.cycle.level = level;
        self.cycle.fired += 1;
        self.cycle.last_fired = Some(Utc::now());
        self.actuator.set_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::session::SessionSignal;
    use crate::testing::{MemorySink, MockSessionProvider, RecordingActuator};

    fn reporter(actuator: RecordingActuator) -> Reporter {
        Reporter::new(
            &ReporterSection::default(),
            "homeassistant/battery/state",
            Box::new(actuator),
            Arc::new(MemorySink::new()),
        )
    }

    fn session() -> SessionTransport<MockSessionProvider> {
        SessionTransport::new(
            MockSessionProvider::new(),
            RetryPolicy::default(),
            Arc::new(MemorySink::new()),
        )
    }

    fn connect(session: &mut SessionTransport<MockSessionProvider>) {
        session.open(true).unwrap();
        let generation = session.generation();
        session.on_signal(generation, SessionSignal::Connected, true);
    }

    #[test]
    fn test_tick_while_disconnected_is_noop() {
        let actuator = RecordingActuator::new();
        let mut reporter = reporter(actuator.clone());
        let mut session = session();

        assert_eq!(reporter.tick(&mut session), TickOutcome::Skipped);
        assert_eq!(reporter.tick(&mut session), TickOutcome::Skipped);

        assert_eq!(reporter.cycle().ticks, 2);
        assert_eq!(reporter.cycle().fired, 0);
        assert!(!reporter.cycle().level);
        assert!(actuator.levels().is_empty());
        assert!(session.provider().published().is_empty());
    }

    #[test]
    fn test_active_ticks_toggle_and_publish() {
        let actuator = RecordingActuator::new();
        let mut reporter = reporter(actuator.clone());
        let mut session = session();
        connect(&mut session);

        assert!(matches!(
            reporter.tick(&mut session),
            TickOutcome::Published { level: true, .. }
        ));
        assert!(matches!(
            reporter.tick(&mut session),
            TickOutcome::Published { level: false, .. }
        ));

        assert_eq!(actuator.levels(), vec![true, false]);
        let payloads: Vec<String> = session
            .provider()
            .published()
            .iter()
            .map(|m| m.payload_text())
            .collect();
        assert_eq!(payloads, vec!["LED is ON!", "LED is OFF!"]);
        assert!(session
            .provider()
            .published()
            .iter()
            .all(|m| m.delivery() == Delivery::FireAndForget));
        assert!(reporter.cycle().last_fired.is_some());
    }

    #[test]
    fn test_initial_message_reports_current_level_confirmed() {
        let reporter = reporter(RecordingActuator::new());
        let message = reporter.initial_message();
        assert_eq!(message.topic(), "homeassistant/battery/state");
        assert_eq!(message.payload_text(), "LED is OFF!");
        assert_eq!(message.delivery(), Delivery::Confirmed);
    }
}
