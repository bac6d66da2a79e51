//! Key material, key documents, and the strategies that look keys up.
//!
//! # Providers
//!
//! Every codec resolves keys through a [`KeyProvider`]. Three strategies ship:
//!
//! - [`EagerKeyProvider`] reads the store document on every call. Strongest
//!   consistency, one store round-trip per lookup.
//! - [`CachedKeyProvider`] serves lookups from an in-memory snapshot that a
//!   background task refreshes on a fixed interval. A lookup that misses the
//!   snapshot forces one synchronous refresh before giving up.
//! - [`FixedKeyProvider`] holds a single key in memory and cannot rotate.
//!
//! # Rotation and reset
//!
//! Rotation appends a freshly generated key to the document and makes it
//! current; old keys stay so older payloads remain decryptable. Reset
//! replaces the whole document with one new key and permanently orphans
//! every payload encrypted before it. Rotation never resets.
//!
//! # Security invariants
//!
//! - Key secrets are never logged or included in `Debug` output.
//! - A snapshot shared with readers is never mutated; updates publish a new one.

pub mod cached;
pub mod eager;
pub mod fixed;
pub mod generator;
pub mod material;
pub mod snapshot;

mod rotation;

pub use cached::CachedKeyProvider;
pub use eager::EagerKeyProvider;
pub use fixed::FixedKeyProvider;
pub use generator::KeyGenerator;
pub use material::KeyMaterial;
pub use snapshot::KeyStoreSnapshot;

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by key providers.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The store could not be read, or the document is absent or malformed.
    #[error("failed to retrieve key document: {0}")]
    ConfigRetrieval(String),

    /// No key with this id exists.
    #[error("could not find key with id: {0}")]
    KeyNotFound(String),

    /// Persisting a rotated or reset document failed; nothing changed.
    #[error("failed to persist key document: {0}")]
    StoreWrite(String),

    /// The provider does not support this operation.
    #[error("{0} is not supported by this key provider")]
    UnsupportedOperation(&'static str),
}

/// Key lookup, shared by every codec.
///
/// Implementations must be thread-safe (`Send + Sync`) so one provider can
/// serve concurrent encode and decode calls.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Id of the key new payloads should be encrypted with.
    async fn current_key_id(&self) -> Result<String, KeyError>;

    /// Look up a key by id.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::KeyNotFound`] if no key with `id` exists.
    async fn key(&self, id: &str) -> Result<KeyMaterial, KeyError>;

    /// The current key.
    ///
    /// The default resolves [`current_key_id`](Self::current_key_id) and then
    /// [`key`](Self::key); providers that can answer from a single document
    /// read override it.
    async fn current_key(&self) -> Result<KeyMaterial, KeyError> {
        let id = self.current_key_id().await?;
        self.key(&id).await
    }

    /// Generate a new key, append it to the key set and make it current.
    ///
    /// Returns the new key id.
    async fn rotate(&self) -> Result<String, KeyError> {
        Err(KeyError::UnsupportedOperation("rotate"))
    }

    /// Replace the whole key set with one new key, invalidating all prior
    /// ciphertext.
    ///
    /// Returns the new key id.
    async fn reset(&self) -> Result<String, KeyError> {
        Err(KeyError::UnsupportedOperation("reset"))
    }
}

/// Resolve the current key of a snapshot, reporting an empty or dangling
/// current id as a missing key.
pub(crate) fn current_of(snapshot: &KeyStoreSnapshot) -> Result<KeyMaterial, KeyError> {
    snapshot
        .current_key()
        .ok_or_else(|| KeyError::KeyNotFound(snapshot.current_key_id().to_owned()))
}
