//! Supervisor-level error types
//!
//! Each boundary has its own `thiserror` enum; this one collects the faults
//! that end bootstrap or the supervisor loop.

use crate::config::ConfigError;
use crate::session::SessionError;
use crate::store::StoreError;
use thiserror::Error;

/// Faults surfaced by bootstrap and [`crate::supervisor::Supervisor::run`]
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistent store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Network link failed after {retries} retries")]
    LinkExhausted { retries: u32 },

    #[error("Session gave up reconnecting after {attempts} attempts")]
    SessionExhausted { attempts: u32 },

    #[error("Supervisor event channel closed")]
    ChannelClosed,
}

impl SupervisorError {
    /// Faults that a manual link restart can recover from
    pub fn is_link_exhausted(&self) -> bool {
        matches!(self, SupervisorError::LinkExhausted { .. })
    }

    /// Faults that end `run` because a retry budget ran out
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            SupervisorError::LinkExhausted { .. } | SupervisorError::SessionExhausted { .. }
        )
    }
}

/// Result type for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;
