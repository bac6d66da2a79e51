//! [`KeyMaterial`]: one generation of symmetric key.

use std::borrow::Cow;

/// Key bytes that are zeroed on drop and never printed.
///
/// Equality is only derived for tests; secrets are never compared at runtime.
#[derive(Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct SecretBytes(Box<[u8]>);

impl SecretBytes {
    /// Borrow the raw key bytes.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        // Zero the key material on drop.
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("SecretBytes([REDACTED])")
    }
}

/// An immutable `{id, secret}` pair.
///
/// `id` names one generation of key and travels in envelope metadata;
/// `secret` is the symmetric key itself.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct KeyMaterial {
    id: String,
    secret: SecretBytes,
}

impl KeyMaterial {
    /// Build key material from an id and raw secret bytes.
    pub fn new(id: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            id: id.into(),
            secret: SecretBytes(secret.into()),
        }
    }

    /// The key id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw secret bytes.
    pub fn secret(&self) -> &[u8] {
        self.secret.expose()
    }

    /// The secret as stored in a key document (UTF-8 text).
    pub(crate) fn secret_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.secret.expose())
    }
}
