//! Emergency stop
//!
//! A durable switch checked before any network call and again right before
//! broadcasting. Nothing in the monitor ever clears it; only an operator
//! command does.

use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Durable emergency-stop flag
pub trait EmergencyGate {
    fn is_engaged(&self) -> bool;
    fn engage(&self, reason: &str) -> io::Result<()>;
    fn clear(&self) -> io::Result<()>;
}

/// Gate backed by a sentinel file: present means stopped
#[derive(Debug, Clone)]
pub struct FileEmergencyGate {
    path: PathBuf,
}

impl FileEmergencyGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reason written when the gate was engaged
    pub fn reason(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
    }
}

impl EmergencyGate for FileEmergencyGate {
    fn is_engaged(&self) -> bool {
        self.path.exists()
    }

    fn engage(&self, reason: &str) -> io::Result<()> {
        fs::write(&self.path, format!("{}\n", reason))?;
        warn!("🛑 Emergency stop engaged: {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Emergency stop cleared: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryEmergencyGate;

#[cfg(test)]
mod memory {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// In-memory gate; clones share the flag
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MemoryEmergencyGate {
        engaged: Rc<Cell<bool>>,
    }

    impl EmergencyGate for MemoryEmergencyGate {
        fn is_engaged(&self) -> bool {
            self.engaged.get()
        }

        fn engage(&self, _reason: &str) -> io::Result<()> {
            self.engaged.set(true);
            Ok(())
        }

        fn clear(&self) -> io::Result<()> {
            self.engaged.set(false);
            Ok(())
        }
    }
}
