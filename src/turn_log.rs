//! Per-turn log destination
//!
//! One JSON object per line, appended to a file whose name is fixed when the
//! process starts. Writing is best-effort: failures are logged and dropped.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::session::TurnLogEntry;

/// Sink for completed turns
pub trait TurnLog: Send {
    /// Append one entry. Never fails the session.
    fn append(&mut self, entry: &TurnLogEntry);
}

/// JSON-lines file log
#[derive(Debug, Clone)]
pub struct JsonlTurnLog {
    path: PathBuf,
}

impl JsonlTurnLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create log directory {}: {}", parent.display(), e);
            }
        }

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_append(&self, entry: &TurnLogEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl TurnLog for JsonlTurnLog {
    fn append(&mut self, entry: &TurnLogEntry) {
        match self.try_append(entry) {
            Ok(()) => debug!("Turn logged to {}", self.path.display()),
            Err(e) => warn!("Failed to write turn log {}: {}", self.path.display(), e),
        }
    }
}
