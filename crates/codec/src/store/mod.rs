//! Access to the versioned key document `{currentKeyId, keys}`.
//!
//! The store is an external collaborator: providers only need whole-document
//! reads and writes at a path. Two local implementations ship with the crate:
//!
//! - [`MemoryKeyStore`]: process-local, shareable between provider instances.
//! - [`FileKeyStore`]: one JSON document per path under a root directory.

pub mod file;
pub mod memory;

pub use file::FileKeyStore;
pub use memory::MemoryKeyStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::keys::KeyStoreSnapshot;

/// Errors produced by a store client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    /// Reading or writing the backing medium failed.
    #[error("key store i/o error at {path}: {source}")]
    Io {
        /// Document path being accessed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The stored document could not be (de)serialised.
    #[error("key document at {path} is malformed: {source}")]
    Serialization {
        /// Document path being accessed.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Whole-document read/write access to key documents.
///
/// There is no partial-field update primitive: every change is a
/// read-modify-write of the complete document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStoreClient: Send + Sync {
    /// Read the document at `path`. `Ok(None)` means no document exists.
    async fn get(&self, path: &str) -> Result<Option<KeyStoreSnapshot>, StoreError>;

    /// Replace the document at `path` with `snapshot`.
    async fn put(&self, path: &str, snapshot: &KeyStoreSnapshot) -> Result<(), StoreError>;
}
