//! In-memory identity storage.

use std::{collections::HashMap, sync::RwLock};

use anon_chat_core::{IdentityError, IdentityStorage};
use async_trait::async_trait;

/// In-memory storage implementation.
///
/// Useful for tests and hosts without a writable disk.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage pre-populated with one value.
    #[must_use]
    pub fn with_value(key: &str, value: &str) -> Self {
        let storage = Self::new();
        if let Ok(mut values) = storage.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
        storage
    }
}

#[async_trait]
impl IdentityStorage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<String>, IdentityError> {
        Ok(self
            .values
            .read()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?
            .get(key)
            .cloned())
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.values
            .write()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
