//! Durable key/value storage for the last selected peripheral.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode store contents: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Get/set-by-key storage; `set(key, None)` removes the key.
///
/// `get` answers from memory. `set` may touch disk and is awaited on the
/// manager's event loop, so implementations must not block.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError>;
}

fn apply(values: &mut HashMap<String, String>, key: &str, value: Option<&str>) {
    match value {
        Some(value) => values.insert(key.to_string(), value.to_string()),
        None => values.remove(key),
    };
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    async fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        apply(&mut self.lock(), key, value);
        Ok(())
    }
}

/// Store persisted as a flat JSON object; rewritten on every `set`
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
    /// Serializes file writes so the last `set` is the one on disk
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing, unreadable or malformed file
    /// starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!("Ignoring malformed store file {:?}: {}", path, e);
                HashMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Store file {:?} not found, starting empty.", path);
                HashMap::new()
            }
            Err(e) => {
                warn!("Failed to read store file {:?}, starting empty: {}", path, e);
                HashMap::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist(&self, json: String) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::write(&self.path, json).await.map_err(io_error)
    }
}

#[async_trait]
impl IdentityStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    async fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let _writing = self.write_lock.lock().await;
        let json = {
            let mut values = self.lock();
            apply(&mut values, key, value);
            serde_json::to_string_pretty(&*values)?
        };
        self.persist(json).await
    }
}
