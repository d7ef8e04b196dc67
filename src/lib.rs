//! uplink - connectivity supervisor for constrained devices
//!
//! Keeps one network link and one MQTT session alive on top of it, publishes
//! a periodic state report while both are ready and routes inbound messages.
//!
//! # Overview
//!
//! - [`link`] - network link state machine with bounded retry and backoff
//! - [`session`] - session transport state machine layered on the link
//! - [`reporter`] - periodic state report gated on the session
//! - [`router`] - exact-topic dispatch of inbound messages
//! - [`supervisor`] - the single event queue tying them together
//!
//! Boundary collaborators ([`store`], [`actuator`], [`observability`]) are
//! narrow traits with host implementations; [`testing`] holds mocks for all of
//! them.
//!
//! # Quick Start
//!
//! ```rust
//! use uplink::config::SupervisorConfig;
//!
//! let config = SupervisorConfig::from_toml(r#"
//! [device]
//! id = "lamp-01"
//!
//! [network]
//! network_id = "workshop"
//!
//! [session]
//! broker_url = "mqtt://10.10.78.77:1883"
//! "#).unwrap();
//!
//! assert_eq!(config.network.max_retries, 5);
//! assert_eq!(config.reporter.period_ms, 1000);
//! ```

pub mod actuator;
pub mod config;
pub mod error;
pub mod link;
pub mod observability;
pub mod reporter;
pub mod retry;
pub mod router;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod testing;

pub use config::SupervisorConfig;
pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::{Supervisor, SupervisorEvent, SupervisorHandle};
