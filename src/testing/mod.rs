//! Testing utilities and mock implementations
//!
//! Mocks for the provider, actuator and diagnostic seams, so the supervisor
//! can be exercised without a network interface or an MQTT broker.

pub mod mocks;

pub use mocks::*;
