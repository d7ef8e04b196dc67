//! Session transport layered on the network link
//!
//! # Architecture
//!
//! - [`machine`] - pure session state machine and reconnect budget
//! - [`message`] - outbound message values and message identifiers
//! - [`transport`] - the component owning the machine and transport handle
//! - [`mqtt`] - rumqttc-backed provider
//!
//! # Usage
//!
//! ```rust
//! use uplink::observability::TracingSink;
//! use uplink::retry::RetryPolicy;
//! use uplink::session::{Delivery, OutboundMessage, SessionTransport};
//! use uplink::testing::MockSessionProvider;
//! use std::sync::Arc;
//!
//! let mut session = SessionTransport::new(
//!     MockSessionProvider::new(),
//!     RetryPolicy::default(),
//!     Arc::new(TracingSink),
//! );
//!
//! // Nothing can be published before the session is connected
//! let message = OutboundMessage::new("state", "LED is ON!", Delivery::FireAndForget, false);
//! assert!(session.publish(message).is_err());
//! ```

pub mod error;
pub mod machine;
pub mod message;
pub mod mqtt;
pub mod transport;

pub use error::SessionError;
pub use machine::{SessionMachine, SessionSignal, SessionState, SessionStep, SessionTransition};
pub use message::{Delivery, MessageId, MessageIdAllocator, OutboundMessage};
pub use mqtt::{MqttSessionHandle, MqttSessionProvider};
pub use transport::{SessionHandle, SessionOutcome, SessionProvider, SessionTransport};
