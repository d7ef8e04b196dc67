//! Persistent configuration store
//!
//! The store must be usable before anything else starts. A store written by a
//! different layout version, or one whose marker cannot be read, is erased and
//! initialized again; only a failure of that second attempt is fatal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Layout version written into the marker file
pub const STORE_VERSION: u32 = 1;

const MARKER_FILE: &str = "VERSION";

/// Persistent store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Store at {path} is not a directory")]
    NotADirectory { path: PathBuf },
}

/// Store initialization seam
pub trait ConfigStore {
    fn initialize(&mut self) -> Result<(), StoreError>;
}

/// Result of reading the version marker
#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    Missing,
    Current,
    Mismatch(String),
}

/// Versioned store directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    initialized: bool,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            initialized: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.root.clone(),
            source,
        }
    }

    fn read_marker(&self) -> Marker {
        match fs::read_to_string(self.marker_path()) {
            Ok(content) if content.trim() == STORE_VERSION.to_string() => Marker::Current,
            Ok(content) => Marker::Mismatch(content.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Marker::Missing,
            Err(e) => Marker::Mismatch(format!("unreadable marker: {e}")),
        }
    }

    fn create(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| self.io_error(e))?;
        fs::write(self.marker_path(), STORE_VERSION.to_string()).map_err(|e| self.io_error(e))
    }

    fn erase(&self) -> Result<(), StoreError> {
        fs::remove_dir_all(&self.root).map_err(|e| self.io_error(e))
    }
}

impl ConfigStore for FileStore {
    fn initialize(&mut self) -> Result<(), StoreError> {
        if self.root.exists() && !self.root.is_dir() {
            return Err(StoreError::NotADirectory {
                path: self.root.clone(),
            });
        }

        match self.read_marker() {
            Marker::Current => {}
            Marker::Missing => {
                info!(path = %self.root.display(), version = STORE_VERSION, "Creating store");
                self.create()?;
            }
            Marker::Mismatch(found) => {
                warn!(
                    path = %self.root.display(),
                    found = %found,
                    expected = STORE_VERSION,
                    "Store version mismatch, erasing"
                );
                self.erase()?;
                self.create()?;
            }
        }

        self.initialized = true;
        Ok(())
    }
}
