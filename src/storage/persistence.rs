//! Monitor state persistence
//!
//! Provides save/load for the monitor state. Files are replaced atomically
//! (write to a temporary file, then rename) so a crash mid-write leaves the
//! previous copy intact. A missing or unreadable file loads as fresh state.

use crate::monitor::MonitorState;
use log::warn;
use std::cell::RefCell;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Durable home of the monitor state
pub trait StateStore {
    fn load(&self) -> Result<MonitorState, StoreError>;
    fn save(&self, state: &MonitorState) -> Result<(), StoreError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<MonitorState, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MonitorState::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&data) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    "State file {} unreadable ({}), starting from zero",
                    self.path.display(),
                    e
                );
                Ok(MonitorState::default())
            }
        }
    }

    fn save(&self, state: &MonitorState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write to temporary file first
        let temp_path = self.temp_path();
        let file = fs::File::create(&temp_path)?;
        restrict_permissions(&file)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        // Atomic rename
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: RefCell<Option<MonitorState>>,
    saves: RefCell<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: MonitorState) -> Self {
        Self {
            state: RefCell::new(Some(state)),
            saves: RefCell::new(0),
        }
    }

    /// Number of saves performed
    pub fn save_count(&self) -> usize {
        *self.saves.borrow()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<MonitorState, StoreError> {
        Ok(self.state.borrow().clone().unwrap_or_default())
    }

    fn save(&self, state: &MonitorState) -> Result<(), StoreError> {
        *self.state.borrow_mut() = Some(state.clone());
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), MonitorState::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        let mut state = MonitorState::default();
        state.distributions_total = 7;
        state.error_count = 2;
        state.last_txid = Some("ab".repeat(32));
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), state);
        assert!(!store.temp_path().exists());

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"distributions_total\": 7"));
    }

    #[test]
    fn test_corrupt_file_loads_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileStateStore::new(&path);
        assert_eq!(store.load().unwrap(), MonitorState::default());
    }

    #[cfg(unix)]
    #[test]
    fn test_state_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        store.save(&MonitorState::default()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        assert_eq!(store.load().unwrap(), MonitorState::default());

        let mut state = MonitorState::default();
        state.consolidations_total = 3;
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap().consolidations_total, 3);
        assert_eq!(store.save_count(), 1);
    }
}
