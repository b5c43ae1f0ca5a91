use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::fsops;

/// Stop the supervisor with the normal exit code.
pub const GLOBAL_STOP: &str = "wdtstop";
/// Stop the supervisor with the restart-me exit code.
pub const GLOBAL_RESTART: &str = "wdtrestart";
/// Stop the supervisor with the reboot-host exit code.
pub const GLOBAL_REBOOT: &str = "wdtreboot";

/// Per-program sentinel actions. A sentinel file named
/// `<action><lowercase name>` in the inbox directory commands the
/// supervisor on its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    fn prefix(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }
}

/// Filesystem-mediated operator inbox rooted at one directory (the
/// working directory in production).
#[derive(Debug, Clone)]
pub struct SentinelBox {
    dir: PathBuf,
}

impl SentinelBox {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn program_path(&self, action: Action, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", action.prefix(), name.to_lowercase()))
    }

    /// Whether the sentinel for `action` on `name` is present.
    pub fn present(&self, action: Action, name: &str) -> bool {
        fsops::exists(&self.program_path(action, name))
    }

    /// Remove the sentinel for `action` on `name`, if present.
    pub fn remove(&self, action: Action, name: &str) {
        let path = self.program_path(action, name);
        if fsops::exists(&path) {
            if let Err(e) = fsops::remove(&path) {
                error!(path = %path.display(), error = %e, "failed to remove sentinel");
            } else {
                debug!(path = %path.display(), "sentinel removed");
            }
        }
    }

    /// Create the sentinel for `action` on `name` (used by self-tests and
    /// external tooling).
    pub fn create(&self, action: Action, name: &str) {
        let path = self.program_path(action, name);
        if !fsops::exists(&path) {
            if let Err(e) = fsops::create_empty(&path) {
                error!(path = %path.display(), error = %e, "failed to create sentinel");
            }
        }
    }

    /// Detect and consume a global sentinel. Detection deletes the file so
    /// the command fires once.
    pub fn consume_global(&self, name: &str) -> bool {
        let path = self.dir.join(name);
        if !fsops::exists(&path) {
            return false;
        }
        if let Err(e) = fsops::remove(&path) {
            // Still report the command; re-detection next tick is harmless.
            error!(path = %path.display(), error = %e, "failed to consume sentinel");
        }
        true
    }
}
