//! [`FileKeyStore`]: key documents as JSON files on local disk.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{KeyStoreClient, StoreError};
use crate::keys::KeyStoreSnapshot;

/// File-backed key store.
///
/// The document at path `a/b` lives in `<root>/a/b.json`. Writes go to a
/// sibling temporary file which is then renamed over the target, so readers
/// see either the old or the new document.
#[derive(Clone, Debug)]
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a document path to its file, refusing anything that would
    /// escape the root directory.
    fn file_for(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let escapes = path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StoreError::Io {
                path: path.to_owned(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "document path must be relative and must not contain `..`",
                ),
            });
        }
        Ok(with_suffix(self.root.join(relative), ".json"))
    }
}

/// Append `suffix` to the final component, keeping any dots already in it.
fn with_suffix(path: PathBuf, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path);
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl KeyStoreClient for FileKeyStore {
    async fn get(&self, path: &str) -> Result<Option<KeyStoreSnapshot>, StoreError> {
        let file = self.file_for(path)?;
        let raw = match fs::read(&file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                path: path.to_owned(),
                source,
            })
    }

    async fn put(&self, path: &str, snapshot: &KeyStoreSnapshot) -> Result<(), StoreError> {
        let file = self.file_for(path)?;
        let io_err = |source| StoreError::Io {
            path: path.to_owned(),
            source,
        };

        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| {
            StoreError::Serialization {
                path: path.to_owned(),
                source,
            }
        })?;

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = with_suffix(file.clone(), ".tmp");
        fs::write(&tmp, &body).await.map_err(io_err)?;
        fs::rename(&tmp, &file).await.map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyGenerator;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        assert!(store.get("codec/shared").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        let snapshot = KeyStoreSnapshot::single(&KeyGenerator::new().generate());
        store.put("codec/shared", &snapshot).await.unwrap();

        assert!(dir.path().join("codec/shared.json").exists());
        assert!(!dir.path().join("codec/shared.json.tmp").exists());
        assert_eq!(store.get("codec/shared").await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn document_uses_original_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        let snapshot = KeyStoreSnapshot::single(&KeyGenerator::new().generate());
        store.put("doc", &snapshot).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("doc.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["currentKeyId"], snapshot.current_key_id());
        assert!(json["keys"].is_object());
    }

    #[tokio::test]
    async fn malformed_document_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.json"), b"not json").unwrap();
        let store = FileKeyStore::new(dir.path());
        assert!(matches!(
            store.get("doc").await,
            Err(StoreError::Serialization { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_paths_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        assert!(store.get("../outside").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn dotted_paths_are_distinct_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        let alpha = KeyStoreSnapshot::single(&KeyGenerator::new().generate());
        store.put("tenant.alpha", &alpha).await.unwrap();

        assert!(store.get("tenant.beta").await.unwrap().is_none());
        assert!(store.get("tenant").await.unwrap().is_none());
        assert!(dir.path().join("tenant.alpha.json").exists());

        let beta = KeyStoreSnapshot::single(&KeyGenerator::new().generate());
        store.put("tenant.beta", &beta).await.unwrap();
        assert_eq!(store.get("tenant.alpha").await.unwrap(), Some(alpha));
        assert_eq!(store.get("tenant.beta").await.unwrap(), Some(beta));
    }
}
