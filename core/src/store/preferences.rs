// Preference persistence for one-shot flags that must survive restarts

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Set after the first successful share on this device
pub const FIRST_SHARE_KEY: &str = "first_share_done";

#[derive(Debug, Error, Clone)]
pub enum PreferenceError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Corrupt value for key {0}")]
    Corrupt(String),
}

/// Key/value flag persistence
pub trait PreferenceStore: Send + Sync {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, PreferenceError>;
    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError>;
    fn flush(&self) -> Result<(), PreferenceError>;
}

/// In-memory preferences, useful for tests and ephemeral runs
#[derive(Clone, Default)]
pub struct MemoryPreferences {
    data: Arc<RwLock<HashMap<String, bool>>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, PreferenceError> {
        Ok(self.data.read().get(key).copied())
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    fn flush(&self) -> Result<(), PreferenceError> {
        Ok(())
    }
}

/// Preferences persisted in a sled tree
pub struct SledPreferences {
    db: sled::Db,
}

impl SledPreferences {
    pub fn open(path: &str) -> Result<Self, PreferenceError> {
        let db = sled::open(path).map_err(|e| PreferenceError::Storage(e.to_string()))?;
        Ok(Self { db })
    }
}

impl PreferenceStore for SledPreferences {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, PreferenceError> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| PreferenceError::Storage(e.to_string()))?;
        match value {
            None => Ok(None),
            Some(ivec) => match ivec.as_ref() {
                [0] => Ok(Some(false)),
                [1] => Ok(Some(true)),
                _ => Err(PreferenceError::Corrupt(key.to_string())),
            },
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.db
            .insert(key.as_bytes(), vec![value as u8])
            .map_err(|e| PreferenceError::Storage(e.to_string()))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), PreferenceError> {
        self.db
            .flush()
            .map_err(|e| PreferenceError::Storage(e.to_string()))?;
        Ok(())
    }
}
