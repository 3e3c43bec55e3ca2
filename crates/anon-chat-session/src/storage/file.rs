//! File-backed identity storage.
//!
//! Values live in a small JSON object on disk. Writes go through a
//! temporary file and a rename so a crash never leaves a half-written file.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anon_chat_core::{IdentityError, IdentityStorage};
use async_trait::async_trait;

const APP_DIR: &str = "anon-chat";
const FILE_NAME: &str = "identity.json";

/// JSON file storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Use the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<platform data dir>/anon-chat/identity.json`, if a data dir exists.
    #[must_use]
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::new(dir.join(APP_DIR).join(FILE_NAME)))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, IdentityError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(IdentityError::Unavailable(format!(
                    "{}: {e}",
                    self.path.display()
                )));
            }
        };

        match serde_json::from_str(&content) {
            Ok(values) => Ok(values),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Ignoring corrupt identity file: {e}");
                Ok(BTreeMap::new())
            }
        }
    }
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> IdentityError {
    IdentityError::Unavailable(format!("{}: {e}", path.display()))
}

#[async_trait]
impl IdentityStorage for FileStorage {
    async fn load(&self, key: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let mut values = self.read_all().await?;
        values.insert(key.to_string(), value.to_string());
        let content =
            serde_json::to_string_pretty(&values).map_err(|e| unavailable(&self.path, e))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| unavailable(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| unavailable(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), key, "Stored value");
        Ok(())
    }
}
