//! Inbound message router
//!
//! Messages received by the session are dispatched by exact topic to a
//! registered [`MessageHandler`]. Anything without a handler is logged at
//! debug level and dropped.
//!
//! # Example
//!
//! ```rust
//! use uplink::router::{InboundRouter, LogHandler};
//!
//! let mut router = InboundRouter::new();
//! router.register("devices/lamp-01/set", LogHandler);
//!
//! assert!(router.route("devices/lamp-01/set", b"ON"));
//! assert!(!router.route("devices/other/set", b"ON"));
//! assert_eq!(router.discarded(), 1);
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handler for messages on one topic
///
/// Called from the supervisor's event handler, so it must not block.
pub trait MessageHandler: Send {
    fn handle(&mut self, topic: &str, payload: &[u8]);
}

/// Exact-topic dispatcher for inbound session messages
#[derive(Default)]
pub struct InboundRouter {
    handlers: HashMap<String, Box<dyn MessageHandler>>,
    routed: u64,
    discarded: u64,
}

impl InboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `topic`, replacing any previous one
    pub fn register(&mut self, topic: impl Into<String>, handler: impl MessageHandler + 'static) {
        let topic = topic.into();
        if self.handlers.insert(topic.clone(), Box::new(handler)).is_some() {
            debug!(%topic, "Replaced inbound handler");
        }
    }

    pub fn unregister(&mut self, topic: &str) -> bool {
        self.handlers.remove(topic).is_some()
    }

    /// Topics with a registered handler
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Dispatch a message; returns whether a handler took it
    pub fn route(&mut self, topic: &str, payload: &[u8]) -> bool {
        match self.handlers.get_mut(topic) {
            Some(handler) => {
                handler.handle(topic, payload);
                self.routed += 1;
                true
            }
            None => {
                debug!(
                    %topic,
                    payload_len = payload.len(),
                    "No handler for inbound message, discarding"
                );
                self.discarded += 1;
                false
            }
        }
    }

    pub fn routed(&self) -> u64 {
        self.routed
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

/// Handler that records the message as text
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn handle(&mut self, topic: &str, payload: &[u8]) {
        info!(
            %topic,
            payload = %String::from_utf8_lossy(payload),
            "Inbound message"
        );
    }
}

/// Inbound message handed to library users
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

/// Handler forwarding messages to a tokio channel
///
/// Uses `try_send`: when the receiver lags the message is dropped with a
/// warning rather than stalling the supervisor.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::Sender<InboundMessage>,
}

impl ChannelHandler {
    pub fn new(sender: mpsc::Sender<InboundMessage>) -> Self {
        Self { sender }
    }

    /// Handler plus the receiving end of a channel with `capacity` slots
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

impl MessageHandler for ChannelHandler {
    fn handle(&mut self, topic: &str, payload: &[u8]) {
        let message = InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            received_at: Utc::now(),
        };

        if let Err(e) = self.sender.try_send(message) {
            warn!(%topic, error = %e, "Dropping inbound message, channel unavailable");
        }
    }
}
