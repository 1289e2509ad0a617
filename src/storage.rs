use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use crate::settings::SettingsRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Reading settings failed: {0}")]
    Io(#[from] io::Error),
    #[error("Stored settings are not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Repository seam for the persisted settings record. The record is written
/// whole on every form submission and read back on the next form load; a
/// store that has never been written to is a normal state, not an error.
pub trait SettingsStore {
    fn load(&self) -> Result<Option<SettingsRecord>, StoreError>;
    fn save(&self, record: &SettingsRecord) -> Result<(), StoreError>;
}

/// Settings persisted as a single JSON file, standing in for the webview's
/// local storage context.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }
}

impl SettingsStore for FileStore {
    fn load(&self) -> Result<Option<SettingsRecord>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No stored settings at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, record: &SettingsRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_vec_pretty(record)?)?;
        debug!("Stored settings at {:?}", self.path);
        Ok(())
    }
}

/// In-process store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<SettingsRecord>>,
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Option<SettingsRecord>, StoreError> {
        Ok(self.record.lock().unwrap().clone())
    }

    fn save(&self, record: &SettingsRecord) -> Result<(), StoreError> {
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }
}
