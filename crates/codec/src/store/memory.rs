//! [`MemoryKeyStore`]: process-local key documents.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KeyStoreClient, StoreError};
use crate::keys::KeyStoreSnapshot;

/// In-memory key store.
///
/// Cloning yields another handle to the same documents, so several provider
/// instances can observe each other's rotations the way they would through a
/// shared remote store.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyStore {
    documents: Arc<RwLock<HashMap<String, KeyStoreSnapshot>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStoreClient for MemoryKeyStore {
    async fn get(&self, path: &str) -> Result<Option<KeyStoreSnapshot>, StoreError> {
        Ok(self.documents.read().await.get(path).cloned())
    }

    async fn put(&self, path: &str, snapshot: &KeyStoreSnapshot) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert(path.to_owned(), snapshot.clone());
        Ok(())
    }
}
