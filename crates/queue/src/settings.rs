//! Persistent key-value settings and the credential cache built on them.

use crate::mode::has_credential;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Key the remembered API credential is stored under.
pub const API_KEY: &str = "api_key";

/// Error type for settings persistence
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key-value store that outlives the process.
///
/// Implementations:
/// - `FileSettings`: JSON object on disk
/// - `MemorySettings`: in-process map
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
    fn remove(&self, key: &str) -> Result<(), SettingsError>;
}

fn lock(map: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory settings
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Settings kept as a flat JSON object; every change is written through.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettings {
    /// Open the settings file, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(SettingsError::Io { path, source }),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut values = lock(&self.values);
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

/// How the in-memory credential relates to the remembered one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CredentialStatus {
    pub has_stored: bool,
    /// Current key is a credential and equal to the stored one.
    pub stored_equals_current: bool,
}

/// Remembered API credential
#[derive(Clone)]
pub struct CredentialCache {
    store: std::sync::Arc<dyn SettingsStore>,
}

impl CredentialCache {
    pub fn new(store: std::sync::Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Stored credential; a blank stored value counts as absent.
    pub fn get(&self) -> Option<String> {
        self.store.get(API_KEY).filter(|key| has_credential(key))
    }

    pub fn set(&self, credential: &str) -> Result<(), SettingsError> {
        self.store.set(API_KEY, credential)
    }

    pub fn clear(&self) -> Result<(), SettingsError> {
        self.store.remove(API_KEY)
    }

    pub fn status(&self, current: &str) -> CredentialStatus {
        let stored = self.get();
        CredentialStatus {
            has_stored: stored.is_some(),
            stored_equals_current: has_credential(current) && stored.as_deref() == Some(current),
        }
    }
}
