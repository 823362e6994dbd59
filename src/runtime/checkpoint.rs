//! Checkpoint persistence for continue-as-new handoffs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::domain::{ProcessParams, StateRecord};
use crate::error::{Result, WorkflowError};
use crate::id::now_ms;

/// State carried from one execution of a process into the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identity key of the process instance
    pub key: String,
    pub params: ProcessParams,
    /// Seed for the successor, with `iterations` already reset
    pub state: StateRecord,
    /// Number of the execution that wrote this checkpoint (1-based)
    pub execution: u64,
    /// Unix ms
    pub saved_at: i64,
}

impl Checkpoint {
    pub fn new(params: ProcessParams, state: StateRecord, execution: u64) -> Self {
        Self {
            key: params.key(),
            params,
            state: state.checkpoint_seed(),
            execution,
            saved_at: now_ms(),
        }
    }
}

/// Durable home for checkpoints, keyed by identity key.
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, replacing any earlier one for the same key.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint for a key.
    fn load(&self, key: &str) -> Result<Option<Checkpoint>>;

    /// Forget the checkpoint for a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All stored checkpoints, ordered by key.
    fn list(&self) -> Result<Vec<Checkpoint>>;
}

/// In-memory store, for tests and runs that need no durability.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().map_err(|e| WorkflowError::Storage(e.to_string()))?;
        checkpoints.insert(checkpoint.key.clone(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().map_err(|e| WorkflowError::Storage(e.to_string()))?;
        Ok(checkpoints.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().map_err(|e| WorkflowError::Storage(e.to_string()))?;
        checkpoints.remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().map_err(|e| WorkflowError::Storage(e.to_string()))?;
        let mut all: Vec<Checkpoint> = checkpoints.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}

/// One pretty-printed JSON file per key under a base directory.
#[derive(Debug)]
pub struct FileCheckpointStore {
    base_path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File for a key. The key itself is kept inside the file, so the name only has to be unique.
    fn checkpoint_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(WorkflowError::Storage("empty checkpoint key".to_string()));
        }
        Ok(self.base_path.join(format!("{}.json", encode_file_stem(key))))
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]`, so subjects with separators
/// or dots map to a single plain file name.
fn encode_file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.checkpoint_path(&checkpoint.key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.checkpoint_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut all = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = fs::read_to_string(&path)?;
                all.push(serde_json::from_str::<Checkpoint>(&content)?);
            }
        }
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}
