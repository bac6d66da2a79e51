//! [`KeyStoreSnapshot`]: the key document as read from or written to a store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::material::KeyMaterial;

/// The versioned key document `{currentKeyId, keys}`.
///
/// Serialised with the field names existing stores already hold:
///
/// ```json
/// {"currentKeyId": "key-1700000000000", "keys": {"key-1700000000000": "..."}}
/// ```
///
/// Once handed to a provider a snapshot is treated as immutable; changes are
/// made on an owned copy and published as a whole new document.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStoreSnapshot {
    #[serde(default)]
    current_key_id: String,
    #[serde(default)]
    keys: BTreeMap<String, String>,
}

impl KeyStoreSnapshot {
    /// A document holding exactly one key, which is also current.
    pub fn single(material: &KeyMaterial) -> Self {
        let mut snapshot = Self::default();
        snapshot.append_current(material);
        snapshot
    }

    /// Id of the key new payloads are encrypted with. Empty for an empty document.
    pub fn current_key_id(&self) -> &str {
        &self.current_key_id
    }

    /// Number of keys in the document.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` if the document holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `true` if a key with `id` exists.
    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    /// Ids of all keys, in ascending order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Look up a key by id.
    pub fn key(&self, id: &str) -> Option<KeyMaterial> {
        self.keys
            .get(id)
            .map(|secret| KeyMaterial::new(id, secret.as_bytes()))
    }

    /// The current key, if the document names one that exists.
    pub fn current_key(&self) -> Option<KeyMaterial> {
        self.key(&self.current_key_id)
    }

    /// Add `material` and make it current. Existing entries are kept.
    ///
    /// Returns `false` (leaving the document untouched) if the id is already
    /// present: rotation never overwrites a key.
    pub fn append_current(&mut self, material: &KeyMaterial) -> bool {
        if self.keys.contains_key(material.id()) {
            return false;
        }
        self.keys
            .insert(material.id().to_owned(), material.secret_str().into_owned());
        self.current_key_id = material.id().to_owned();
        true
    }

    /// Check the document invariant: a non-empty key set must contain the
    /// current key id.
    pub fn validate(&self) -> Result<(), String> {
        if !self.keys.is_empty() && !self.keys.contains_key(&self.current_key_id) {
            return Err(format!(
                "current key id {:?} is not among the {} stored keys",
                self.current_key_id,
                self.keys.len()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyStoreSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key ids only; never print secrets.
        f.debug_struct("KeyStoreSnapshot")
            .field("current_key_id", &self.current_key_id)
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}
