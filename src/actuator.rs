//! Actuator output
//!
//! The device drives exactly one boolean output. Writes are infallible from
//! the caller's point of view; hardware failures are logged and swallowed.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Boolean output driven by the reporting scheduler
pub trait Actuator: Send {
    fn set_level(&mut self, on: bool);
}

/// Actuator that only logs the requested level
#[derive(Debug, Default)]
pub struct LogActuator {
    level: Option<bool>,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written, if any
    pub fn level(&self) -> Option<bool> {
        self.level
    }
}

impl Actuator for LogActuator {
    fn set_level(&mut self, on: bool) {
        self.level = Some(on);
        info!(level = on, "Actuator level set");
    }
}

/// Actuator writing `1`/`0` to a sysfs-style value file
#[derive(Debug, Clone)]
pub struct FileActuator {
    path: PathBuf,
}

impl FileActuator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Actuator for FileActuator {
    fn set_level(&mut self, on: bool) {
        let value = if on { "1" } else { "0" };
        match std::fs::write(&self.path, value) {
            Ok(()) => debug!(path = %self.path.display(), value, "Actuator value written"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write actuator value"
            ),
        }
    }
}
