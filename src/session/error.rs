use super::machine::SessionState;
use thiserror::Error;

/// Session transport errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: SessionState },
    #[error("Session cannot open while the network link is down")]
    LinkDown,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SessionError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, SessionError::NotConnected { .. })
    }
}
