//! Stable anonymous identity on top of an [`IdentityStorage`] backend.

use anon_chat_core::{
    AnonymousIdentity, IdentityError, IdentityGenerator, IdentityStorage, RandomIdentityGenerator,
};
use tokio::sync::OnceCell;

/// Storage key holding the identity string.
pub const IDENTITY_KEY: &str = "anon_chat_identity";

#[derive(Debug)]
struct Resolved {
    identity: AnonymousIdentity,
    durable: bool,
}

/// Hands out the local user's identity, creating and persisting it once.
///
/// When the backend is unavailable the store falls back to an ephemeral
/// identity that lives as long as the store. The chat keeps working; only
/// continuity across restarts is lost.
pub struct IdentityStore<S: IdentityStorage> {
    storage: S,
    generator: Box<dyn IdentityGenerator>,
    resolved: OnceCell<Resolved>,
}

impl<S: IdentityStorage> IdentityStore<S> {
    /// Create a store using the default random generator.
    #[must_use]
    pub fn new(storage: S) -> Self {
        Self::with_generator(storage, RandomIdentityGenerator)
    }

    /// Create a store with a custom generator.
    #[must_use]
    pub fn with_generator(storage: S, generator: impl IdentityGenerator + 'static) -> Self {
        Self {
            storage,
            generator: Box::new(generator),
            resolved: OnceCell::new(),
        }
    }

    /// Return the persisted identity, generating and storing one if needed.
    ///
    /// Never fails. Repeated calls return the same value.
    pub async fn get_or_create(&self) -> AnonymousIdentity {
        self.resolved
            .get_or_init(|| self.resolve())
            .await
            .identity
            .clone()
    }

    /// Whether the identity is only held in memory.
    ///
    /// `None` until [`get_or_create`](Self::get_or_create) has run.
    #[must_use]
    pub fn is_ephemeral(&self) -> Option<bool> {
        self.resolved.get().map(|r| !r.durable)
    }

    async fn resolve(&self) -> Resolved {
        match self.storage.load(IDENTITY_KEY).await {
            Ok(Some(raw)) => match AnonymousIdentity::parse(&raw) {
                Ok(identity) => {
                    tracing::debug!(%identity, "Loaded stored identity");
                    return Resolved {
                        identity,
                        durable: true,
                    };
                }
                Err(e) => tracing::warn!("Replacing stored identity: {e}"),
            },
            Ok(None) => {}
            Err(e) => {
                let identity = self.generator.generate();
                tracing::warn!(%identity, "Identity storage unavailable, using ephemeral identity: {e}");
                return Resolved {
                    identity,
                    durable: false,
                };
            }
        }

        let identity = self.generator.generate();
        let durable = match self.storage.store(IDENTITY_KEY, identity.as_str()).await {
            Ok(()) => {
                tracing::info!(%identity, "Created anonymous identity");
                true
            }
            Err(e) => {
                log_degraded(&identity, &e);
                false
            }
        };
        Resolved { identity, durable }
    }
}

fn log_degraded(identity: &AnonymousIdentity, e: &IdentityError) {
    tracing::warn!(%identity, "Could not persist identity, it will not survive a restart: {e}");
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use tokio_test::assert_ok;

    use super::*;
    use crate::storage::MemoryStorage;

    /// Backend that is never reachable.
    struct BrokenStorage;

    #[async_trait]
    impl IdentityStorage for BrokenStorage {
        async fn load(&self, _key: &str) -> Result<Option<String>, IdentityError> {
            Err(IdentityError::Unavailable("disk on fire".to_string()))
        }

        async fn store(&self, _key: &str, _value: &str) -> Result<(), IdentityError> {
            Err(IdentityError::Unavailable("disk on fire".to_string()))
        }
    }

    /// Backend that reads fine but rejects writes.
    struct ReadOnlyStorage;

    #[async_trait]
    impl IdentityStorage for ReadOnlyStorage {
        async fn load(&self, _key: &str) -> Result<Option<String>, IdentityError> {
            Ok(None)
        }

        async fn store(&self, _key: &str, _value: &str) -> Result<(), IdentityError> {
            Err(IdentityError::Unavailable("read-only".to_string()))
        }
    }

    struct CountingGenerator(Arc<AtomicUsize>);

    impl IdentityGenerator for CountingGenerator {
        fn generate(&self) -> AnonymousIdentity {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            AnonymousIdentity::from_suffix(&format!("{n:08x}")).unwrap()
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store =
            IdentityStore::with_generator(MemoryStorage::new(), CountingGenerator(Arc::clone(&calls)));

        let first = store.get_or_create().await;
        let second = store.get_or_create().await;

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.is_ephemeral(), Some(false));
    }

    #[tokio::test]
    async fn test_identity_is_persisted() {
        let store = IdentityStore::new(MemoryStorage::new());
        let identity = store.get_or_create().await;

        let stored = assert_ok!(store.storage.load(IDENTITY_KEY).await);
        assert_eq!(stored.as_deref(), Some(identity.as_str()));

        // A second store over the same backend sees the same identity.
        let again = IdentityStore::new(store.storage).get_or_create().await;
        assert_eq!(again, identity);
    }

    #[tokio::test]
    async fn test_stored_identity_is_reused() {
        let storage = MemoryStorage::with_value(IDENTITY_KEY, "User-0badc0de");
        let calls = Arc::new(AtomicUsize::new(0));
        let store = IdentityStore::with_generator(storage, CountingGenerator(Arc::clone(&calls)));

        assert_eq!(store.get_or_create().await.as_str(), "User-0badc0de");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_identity_is_replaced() {
        let storage = MemoryStorage::with_value(IDENTITY_KEY, "not-an-identity");
        let store = IdentityStore::with_generator(storage, CountingGenerator(Arc::default()));

        let identity = store.get_or_create().await;
        assert_eq!(identity.as_str(), "User-00000000");

        let stored = assert_ok!(store.storage.load(IDENTITY_KEY).await);
        assert_eq!(stored.as_deref(), Some("User-00000000"));
    }

    #[tokio::test]
    async fn test_unavailable_storage_degrades() {
        let store = IdentityStore::new(BrokenStorage);

        let first = store.get_or_create().await;
        let second = store.get_or_create().await;

        assert!(AnonymousIdentity::parse(first.as_str()).is_ok());
        assert_eq!(first, second);
        assert_eq!(store.is_ephemeral(), Some(true));
    }

    #[tokio::test]
    async fn test_failed_write_degrades() {
        let store = IdentityStore::new(ReadOnlyStorage);
        assert_eq!(store.is_ephemeral(), None);

        let identity = store.get_or_create().await;
        assert_eq!(store.get_or_create().await, identity);
        assert_eq!(store.is_ephemeral(), Some(true));
    }
}
