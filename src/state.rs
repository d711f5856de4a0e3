// ===============================
// src/state.rs (persisted order records)
// ===============================
//
// Layout: {"LONG": [{"id","type","price","size"}, ...], "SHORT": [...]}
// Ditulis utuh setiap rebuild (last-write-wins).
//
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::domain::OrderRecord;

pub type GridState = BTreeMap<String, Vec<OrderRecord>>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io: {0}")]
    Io(#[from] io::Error),
    #[error("state json: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<GridState, StateError>;
    fn save(&self, state: &GridState) -> Result<(), StateError>;
}

/// JSON file written atomically: temp file, fsync, rename.
/// A crash leaves either the old or the new file, never a partial one.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    pub fn path(&self) -> &Path { &self.path }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    /// Missing file = fresh start.
    fn load(&self) -> Result<GridState, StateError> {
        match fs::read_to_string(&self.path) {
            Ok(data) if data.trim().is_empty() => Ok(GridState::new()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(GridState::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &GridState) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<GridState>,
    fail_saves: bool,
}

impl MemoryStateStore {
    pub fn new(initial: GridState) -> Self { Self { inner: Mutex::new(initial), fail_saves: false } }

    /// Every save returns an io error.
    pub fn failing() -> Self { Self { inner: Mutex::new(GridState::new()), fail_saves: true } }

    pub fn snapshot(&self) -> GridState {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<GridState, StateError> { Ok(self.snapshot()) }

    fn save(&self, state: &GridState) -> Result<(), StateError> {
        if self.fail_saves {
            return Err(io::Error::new(io::ErrorKind::Other, "memory store: save disabled").into());
        }
        let mut g = self.inner.lock().map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store poisoned"))?;
        *g = state.clone();
        Ok(())
    }
}
