//! Persistence of the active run id.
//!
//! The persisted form is a single JSON document `{"runId": "..."}`, written
//! whenever the run id becomes non-empty and removed when it is cleared.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::StorageError;
use crate::listeners::lock;

/// Backend for the persisted run id.
pub trait RunIdStorage: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, run_id: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRun {
    #[serde(rename = "runId", default)]
    run_id: String,
}

fn encode(run_id: &str) -> Result<String, StorageError> {
    Ok(serde_json::to_string(&PersistedRun {
        run_id: run_id.to_string(),
    })?)
}

fn decode(content: &str) -> Result<Option<String>, StorageError> {
    let persisted: PersistedRun = serde_json::from_str(content)?;
    Ok(Some(persisted.run_id).filter(|id| !id.is_empty()))
}

/// JSON file holding the run id.
#[derive(Debug, Clone)]
pub struct FileRunIdStorage {
    path: PathBuf,
}

impl FileRunIdStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunIdStorage for FileRunIdStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| StorageError::Read {
            path: self.path.clone(),
            source,
        })?;
        decode(&content)
    }

    fn save(&self, run_id: &str) -> Result<(), StorageError> {
        let content = encode(run_id)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, content).map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// In-process storage, keeps the serialized document like the file backend.
#[derive(Debug, Default)]
pub struct MemoryRunIdStorage {
    slot: Mutex<Option<String>>,
}

impl MemoryRunIdStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with a run id.
    pub fn with_run_id(run_id: &str) -> Self {
        Self {
            slot: Mutex::new(encode(run_id).ok()),
        }
    }

    /// Raw persisted document, if any.
    pub fn raw(&self) -> Option<String> {
        lock(&self.slot).clone()
    }
}

impl RunIdStorage for MemoryRunIdStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match lock(&self.slot).as_deref() {
            Some(content) => decode(content),
            None => Ok(None),
        }
    }

    fn save(&self, run_id: &str) -> Result<(), StorageError> {
        *lock(&self.slot) = Some(encode(run_id)?);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *lock(&self.slot) = None;
        Ok(())
    }
}
