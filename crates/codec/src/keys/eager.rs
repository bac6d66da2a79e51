//! [`EagerKeyProvider`]: every lookup reads the store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{current_of, rotation, KeyError, KeyGenerator, KeyMaterial, KeyProvider};
use crate::store::KeyStoreClient;

/// Key provider without local state.
///
/// Each call fetches the document at `path`, so a rotation performed by any
/// other process is visible immediately, at the cost of one store
/// round-trip per lookup.
///
/// Rotations and resets through one provider (and its clones) are
/// serialised, so concurrent rotations never overwrite each other's key.
#[derive(Clone)]
pub struct EagerKeyProvider {
    store: Arc<dyn KeyStoreClient>,
    path: String,
    generator: Arc<KeyGenerator>,
    write_lock: Arc<Mutex<()>>,
}

impl EagerKeyProvider {
    /// Create a provider for the document at `path`.
    pub fn new(
        store: Arc<dyn KeyStoreClient>,
        path: impl Into<String>,
        generator: Arc<KeyGenerator>,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            generator,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl KeyProvider for EagerKeyProvider {
    async fn current_key_id(&self) -> Result<String, KeyError> {
        let snapshot = rotation::fetch(self.store.as_ref(), &self.path).await?;
        Ok(snapshot.current_key_id().to_owned())
    }

    async fn key(&self, id: &str) -> Result<KeyMaterial, KeyError> {
        rotation::fetch(self.store.as_ref(), &self.path)
            .await?
            .key(id)
            .ok_or_else(|| KeyError::KeyNotFound(id.to_owned()))
    }

    async fn current_key(&self) -> Result<KeyMaterial, KeyError> {
        let snapshot = rotation::fetch(self.store.as_ref(), &self.path).await?;
        current_of(&snapshot)
    }

    async fn rotate(&self) -> Result<String, KeyError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = rotation::rotate(self.store.as_ref(), &self.path, &self.generator).await?;
        Ok(snapshot.current_key_id().to_owned())
    }

    async fn reset(&self) -> Result<String, KeyError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = rotation::reset(self.store.as_ref(), &self.path, &self.generator).await?;
        Ok(snapshot.current_key_id().to_owned())
    }
}
