//! [`FixedKeyProvider`]: one static key, no store.

use async_trait::async_trait;

use super::{KeyError, KeyMaterial, KeyProvider};

/// Provider that always answers with the single key it was built with.
///
/// Useful for local development and tests. Rotation and reset return
/// [`KeyError::UnsupportedOperation`].
#[derive(Clone, Debug)]
pub struct FixedKeyProvider {
    key: KeyMaterial,
}

impl FixedKeyProvider {
    /// Wrap `key`.
    pub fn new(key: KeyMaterial) -> Self {
        Self { key }
    }
}

#[async_trait]
impl KeyProvider for FixedKeyProvider {
    async fn current_key_id(&self) -> Result<String, KeyError> {
        Ok(self.key.id().to_owned())
    }

    async fn key(&self, id: &str) -> Result<KeyMaterial, KeyError> {
        if id == self.key.id() {
            Ok(self.key.clone())
        } else {
            Err(KeyError::KeyNotFound(id.to_owned()))
        }
    }

    async fn current_key(&self) -> Result<KeyMaterial, KeyError> {
        Ok(self.key.clone())
    }
}
