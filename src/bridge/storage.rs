//! Plugin key-value storage
//!
//! Two stores per plugin, differing only in lifetime:
//! - local storage is persisted as one JSON file per plugin and survives
//!   host restarts
//! - session storage lives in memory and is cleared when the host session
//!   ends
//!
//! Concurrent writers get last-write-wins semantics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::core::error::{ErrorContext, Result};

/// Browser-like `getItem`/`setItem` store
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store backing session storage
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON-file store backing local storage
///
/// The file is read on first access and rewritten (write to a temporary
/// sibling, then rename) on every `set_item`.
pub struct FileStore {
    path: PathBuf,
    items: RwLock<Option<HashMap<String, String>>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .storage_context(format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content)
            .storage_context(format!("Corrupted storage file {}", self.path.display()))
    }

    fn persist(&self, items: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .storage_context(format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(items)?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, content)
            .storage_context(format!("Failed to write {}", temp.display()))?;
        std::fs::rename(&temp, &self.path)
            .storage_context(format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        {
            let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(items) = items.as_ref() {
                return Ok(items.get(key).cloned());
            }
        }

        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if items.is_none() {
            *items = Some(self.load()?);
        }
        Ok(items.as_ref().and_then(|items| items.get(key).cloned()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let items = guard.get_or_insert_with(HashMap::new);
        items.insert(key.to_string(), value.to_string());
        self.persist(items)
    }
}

/// Hands out the per-plugin stores
pub struct StorageManager {
    local_dir: PathBuf,
    local: Mutex<HashMap<String, Arc<FileStore>>>,
    session: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl StorageManager {
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
            local: Mutex::new(HashMap::new()),
            session: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn local_for(&self, plugin: &str) -> Arc<FileStore> {
        let mut stores = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(plugin.to_string())
            .or_insert_with(|| {
                let path = self.local_dir.join(format!("{}.json", storage_file_stem(plugin)));
                debug!(plugin, path = %path.display(), "Opening plugin local storage");
                Arc::new(FileStore::new(path))
            })
            .clone()
    }

    pub fn session_for(&self, plugin: &str) -> Arc<MemoryStore> {
        let mut stores = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(plugin.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone()
    }

    /// Drop every plugin's session storage
    pub fn end_session(&self) {
        let mut stores = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        for store in stores.values() {
            store.clear();
        }
        stores.clear();
        debug!("Session storage cleared");
    }
}

/// File-name-safe form of a plugin name
fn storage_file_stem(plugin: &str) -> String {
    let stem: String = plugin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}
