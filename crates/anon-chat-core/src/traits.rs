//! Core traits for identity persistence.

use async_trait::async_trait;
use thiserror::Error;

/// Identity error.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity storage unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed identity: {0:?}")]
    Malformed(String),
}

/// Trait for durable local key/value storage backing the identity store.
///
/// Implementations only need to hold a handful of short string values.
#[async_trait]
pub trait IdentityStorage: Send + Sync {
    /// Read a value, `None` if the key was never written.
    async fn load(&self, key: &str) -> Result<Option<String>, IdentityError>;

    /// Write a value, replacing any previous one.
    async fn store(&self, key: &str, value: &str) -> Result<(), IdentityError>;
}
