//! [`KeyGenerator`]: fresh key material for initialisation and rotation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use super::material::KeyMaterial;

/// Random bytes drawn per key before encoding.
const RANDOM_BYTES: usize = 32;

/// Characters of the encoded random value kept as the secret.
///
/// The secret is the UTF-8 form of this many base64url characters, which is a
/// 32-byte AES-256 key carrying 192 bits of entropy. Stores written by
/// existing producers hold keys in exactly this shape.
pub const SECRET_CHARS: usize = 32;

/// Produces key material with time-derived ids of the form `key-<unix millis>`.
///
/// Ids from one generator are strictly increasing: two keys generated within
/// the same millisecond get consecutive millisecond values.
#[derive(Debug, Default)]
pub struct KeyGenerator {
    last_millis: AtomicU64,
}

impl KeyGenerator {
    /// Create a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new key.
    ///
    /// Draws from the OS CSPRNG; entropy-source failure panics inside the RNG,
    /// which is treated as fatal.
    pub fn generate(&self) -> KeyMaterial {
        let mut raw = [0u8; RANDOM_BYTES];
        OsRng.fill_bytes(&mut raw);
        let mut encoded = URL_SAFE_NO_PAD.encode(raw);
        encoded.truncate(SECRET_CHARS);

        KeyMaterial::new(format!("key-{}", self.next_millis()), encoded.as_bytes())
    }

    fn next_millis(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let mut last = self.last_millis.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_millis.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
