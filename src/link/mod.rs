//! Network link: association state machine and providers
//!
//! - [`machine`] - pure state machine with bounded retries
//! - [`provider`] - provider trait and the host implementation

pub mod machine;
pub mod provider;

pub use machine::{
    DEFAULT_MAX_RETRIES, LinkCommand, LinkMachine, LinkNotification, LinkSignal, LinkState,
    LinkStep, LinkTransition,
};
pub use provider::{HostNetworkProvider, NetworkCredentials, NetworkProvider};
