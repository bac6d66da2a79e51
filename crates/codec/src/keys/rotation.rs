//! Store-side fetch, rotation, and reset shared by the store-backed providers.

use tracing::info;

use super::{KeyError, KeyGenerator, KeyStoreSnapshot};
use crate::store::KeyStoreClient;

/// Read and validate the document at `path`.
pub(crate) async fn fetch(
    store: &dyn KeyStoreClient,
    path: &str,
) -> Result<KeyStoreSnapshot, KeyError> {
    let snapshot = store
        .get(path)
        .await
        .map_err(|e| KeyError::ConfigRetrieval(e.to_string()))?
        .ok_or_else(|| KeyError::ConfigRetrieval(format!("no key document at {path}")))?;
    snapshot
        .validate()
        .map_err(|e| KeyError::ConfigRetrieval(format!("invalid key document at {path}: {e}")))?;
    Ok(snapshot)
}

/// Append a fresh key to the document at `path`, make it current, and persist
/// the whole document.
///
/// Returns the persisted document. If the write fails the store is unchanged
/// and nothing is considered rotated.
pub(crate) async fn rotate(
    store: &dyn KeyStoreClient,
    path: &str,
    generator: &KeyGenerator,
) -> Result<KeyStoreSnapshot, KeyError> {
    let mut snapshot = fetch(store, path).await?;
    // Ids are time-derived; another writer may already hold this millisecond.
    while !snapshot.append_current(&generator.generate()) {}

    store
        .put(path, &snapshot)
        .await
        .map_err(|e| KeyError::StoreWrite(e.to_string()))?;

    info!(
        path,
        key_id = snapshot.current_key_id(),
        retained = snapshot.len() - 1,
        "key rotated"
    );
    Ok(snapshot)
}

/// Replace the document at `path` with a single fresh key.
///
/// Does not read the existing document, so it also initialises a path that
/// has none.
pub(crate) async fn reset(
    store: &dyn KeyStoreClient,
    path: &str,
    generator: &KeyGenerator,
) -> Result<KeyStoreSnapshot, KeyError> {
    let snapshot = KeyStoreSnapshot::single(&generator.generate());
    store
        .put(path, &snapshot)
        .await
        .map_err(|e| KeyError::StoreWrite(e.to_string()))?;

    info!(path, key_id = snapshot.current_key_id(), "key set reset");
    Ok(snapshot)
}
