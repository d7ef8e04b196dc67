//! Outbound message values and local message identifiers

use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::fmt;

/// Delivery confidence for an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// QoS 0, no acknowledgement expected
    FireAndForget,
    /// QoS 1, acknowledged by the broker
    Confirmed,
}

impl Delivery {
    pub fn qos(self) -> QoS {
        match self {
            Delivery::FireAndForget => QoS::AtMostOnce,
            Delivery::Confirmed => QoS::AtLeastOnce,
        }
    }

    pub fn expects_ack(self) -> bool {
        matches!(self, Delivery::Confirmed)
    }
}

/// Immutable message handed to the session for a single publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    topic: String,
    payload: Bytes,
    delivery: Delivery,
    retain: bool,
}

impl OutboundMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        delivery: Delivery,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            delivery,
            retain,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Payload as text, lossy, for diagnostics
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Locally generated message identifier
///
/// Lives in the MQTT packet identifier range: 1..=65535, never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u16);

impl MessageId {
    pub fn new(raw: u16) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identifier counter that wraps from 65535 back to 1
#[derive(Debug, Clone)]
pub struct MessageIdAllocator {
    last: u16,
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Continue counting after `last`
    pub fn starting_after(last: u16) -> Self {
        Self { last }
    }

    pub fn next_id(&mut self) -> MessageId {
        self.last = match self.last.checked_add(1) {
            Some(next) => next,
            None => 1,
        };
        MessageId(self.last)
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
