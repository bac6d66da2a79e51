//! AES-GCM sealing and opening of payload bodies.
//!
//! **Algorithm choice:** plain AES-GCM with a random 96-bit nonce per call and
//! a 128-bit authentication tag, byte-compatible with the JCA
//! `AES/GCM/NoPadding` transformation used by existing producers.
//!
//! **Never reuse a nonce under the same key.** GCM nonce reuse breaks both
//! confidentiality and authentication, so every [`seal`] call draws a fresh
//! nonce from the OS CSPRNG.

use aes_gcm::{
    aead::{consts::U12, rand_core::RngCore, Aead, KeyInit, OsRng},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm, Nonce,
};
use thiserror::Error;

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag (16 bytes = 128 bits).
pub const TAG_LEN: usize = 16;

/// Key lengths accepted by [`seal`] and [`open`]: AES-128, AES-192, AES-256.
pub const SUPPORTED_KEY_LENS: [usize; 3] = [16, 24, 32];

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is not 16, 24 or 32 bytes long.
    #[error("invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    /// The sealed data is shorter than a nonce plus an authentication tag.
    #[error("sealed data truncated: {0} bytes (minimum {min})", min = NONCE_LEN + TAG_LEN)]
    Truncated(usize),

    /// AES-GCM encryption or authentication failed.
    #[error("aead operation failed")]
    AeadFailure,
}

/// AES-GCM instance selected by key length.
enum GcmCipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl GcmCipher {
    fn new(key: &[u8]) -> Result<Self, CipherError> {
        let invalid = |_| CipherError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(|c| Self::Aes128(Box::new(c))).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key).map(|c| Self::Aes192(Box::new(c))).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(key).map(|c| Self::Aes256(Box::new(c))).map_err(invalid),
            other => Err(CipherError::InvalidKeyLength(other)),
        }
    }

    fn encrypt(&self, nonce: &Nonce<U12>, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes192(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| CipherError::AeadFailure)
    }

    fn decrypt(&self, nonce: &Nonce<U12>, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        match self {
            Self::Aes128(c) => c.decrypt(nonce, ciphertext),
            Self::Aes192(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CipherError::AeadFailure)
    }
}

/// Generate a fresh random nonce from the OS CSPRNG.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key`.
///
/// Returns `nonce || ciphertext || tag`, i.e. `NONCE_LEN + plaintext.len() +
/// TAG_LEN` bytes.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] for a key that is not 16, 24 or
/// 32 bytes, and [`CipherError::AeadFailure`] on an internal AEAD error.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = GcmCipher::new(key)?;
    let nonce_bytes = generate_nonce();
    let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce_bytes), plaintext)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt data produced by [`seal`].
///
/// # Errors
///
/// Returns [`CipherError::Truncated`] if `sealed` cannot hold a nonce and a
/// tag, [`CipherError::InvalidKeyLength`] for a bad key, and
/// [`CipherError::AeadFailure`] if authentication fails (wrong key or
/// tampered data).
pub fn open(sealed: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Truncated(sealed.len()));
    }
    let cipher = GcmCipher::new(key)?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext)
}
