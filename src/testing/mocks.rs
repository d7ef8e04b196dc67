//! Mock implementations for testing
//!
//! Provides mock network and session providers, a recording actuator and an
//! in-memory diagnostic sink so the supervisor can be driven without a radio
//! or a broker. Every mock is `Clone` and shares its log, so a test can keep a
//! copy after handing one to the supervisor.

use crate::actuator::Actuator;
use crate::link::NetworkProvider;
use crate::observability::DiagnosticSink;
use crate::session::{MessageId, OutboundMessage, SessionError, SessionHandle, SessionProvider};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::Level;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Call made on a [`MockNetworkProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCall {
    Start,
    Associate { attempt: u32, delay: Duration },
    Stop,
}

/// Network provider that records calls and never answers by itself
#[derive(Debug, Clone, Default)]
pub struct MockNetworkProvider {
    calls: Arc<Mutex<Vec<NetworkCall>>>,
}

impl MockNetworkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<NetworkCall> {
        lock(&self.calls).clone()
    }

    /// Number of association requests, initial one included
    pub fn associations(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, NetworkCall::Associate { .. }))
            .count()
    }
}

impl NetworkProvider for MockNetworkProvider {
    fn start(&mut self) {
        lock(&self.calls).push(NetworkCall::Start);
    }

    fn associate(&mut self, attempt: u32, delay: Duration) {
        lock(&self.calls).push(NetworkCall::Associate { attempt, delay });
    }

    fn stop(&mut self) {
        lock(&self.calls).push(NetworkCall::Stop);
    }
}

#[derive(Debug, Default)]
struct SessionLog {
    opens: Vec<(u64, Duration)>,
    published: Vec<(u64, MessageId, OutboundMessage)>,
    subscribed: Vec<(u64, String)>,
    closed: Vec<u64>,
    fail_publish: bool,
}

/// Session provider whose handles record everything they are asked to do
#[derive(Debug, Clone, Default)]
pub struct MockSessionProvider {
    log: Arc<Mutex<SessionLog>>,
}

impl MockSessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose handles reject every publish
    pub fn with_publish_failure() -> Self {
        let provider = Self::default();
        lock(&provider.log).fail_publish = true;
        provider
    }

    /// `(generation, delay)` for every open
    pub fn opens(&self) -> Vec<(u64, Duration)> {
        lock(&self.log).opens.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.log)
            .published
            .iter()
            .map(|(_, _, message)| message.clone())
            .collect()
    }

    /// `(generation, id, message)` for every publish handed to a handle
    pub fn published_with_ids(&self) -> Vec<(u64, MessageId, OutboundMessage)> {
        lock(&self.log).published.clone()
    }

    pub fn subscribed(&self) -> Vec<(u64, String)> {
        lock(&self.log).subscribed.clone()
    }

    /// Generations whose handle was closed, in order
    pub fn closed(&self) -> Vec<u64> {
        lock(&self.log).closed.clone()
    }

    pub fn clear(&self) {
        let mut log = lock(&self.log);
        log.opens.clear();
        log.published.clear();
        log.subscribed.clear();
        log.closed.clear();
    }
}

impl SessionProvider for MockSessionProvider {
    type Handle = MockSessionHandle;

    fn open(&mut self, generation: u64, delay: Duration) -> MockSessionHandle {
        lock(&self.log).opens.push((generation, delay));
        MockSessionHandle {
            generation,
            log: self.log.clone(),
        }
    }
}

/// Handle returned by [`MockSessionProvider`]
#[derive(Debug)]
pub struct MockSessionHandle {
    generation: u64,
    log: Arc<Mutex<SessionLog>>,
}

impl MockSessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl SessionHandle for MockSessionHandle {
    fn publish(&mut self, id: MessageId, message: OutboundMessage) -> Result<(), SessionError> {
        let mut log = lock(&self.log);
        if log.fail_publish {
            return Err(SessionError::PublishFailed("mock publish failure".into()));
        }
        log.published.push((self.generation, id, message));
        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), SessionError> {
        lock(&self.log)
            .subscribed
            .push((self.generation, filter.to_string()));
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.log).closed.push(self.generation);
    }
}

/// Actuator remembering every level written
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<bool> {
        lock(&self.levels).clone()
    }
}

impl Actuator for RecordingActuator {
    fn set_level(&mut self, on: bool) {
        lock(&self.levels).push(on);
    }
}

/// One captured diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub level: Level,
    pub tag: String,
    pub message: String,
}

/// Diagnostic sink capturing records in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<DiagnosticRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        lock(&self.records).clone()
    }

    /// Messages recorded under `tag`
    pub fn messages(&self, tag: &str) -> Vec<String> {
        lock(&self.records)
            .iter()
            .filter(|record| record.tag == tag)
            .map(|record| record.message.clone())
            .collect()
    }

    pub fn contains(&self, tag: &str, needle: &str) -> bool {
        lock(&self.records)
            .iter()
            .any(|record| record.tag == tag && record.message.contains(needle))
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, level: Level, tag: &str, message: &str) {
        lock(&self.records).push(DiagnosticRecord {
            level,
            tag: tag.to_string(),
            message: message.to_string(),
        });
    }
}
