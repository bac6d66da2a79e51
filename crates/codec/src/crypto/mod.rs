//! AES-GCM payload encryption primitives.
//!
//! This module is intentionally free of store and codec dependencies.
//! It provides the low-level seal/open operations used by the codec layer.
//!
//! # Sealed format
//!
//! ```text
//! [0, 12)    nonce
//! [12, n-16) ciphertext
//! [n-16, n)  GCM authentication tag
//! ```

pub mod cipher;

pub use cipher::{CipherError, NONCE_LEN, TAG_LEN};
