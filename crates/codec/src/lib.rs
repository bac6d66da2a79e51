//! Key-versioned AES-GCM payload codec.
//!
//! Payloads are sealed under the current key of a versioned key document and
//! stamped with the key id and a codec tag, so that:
//!
//! - keys can rotate without breaking older payloads,
//! - several independently keyed codecs can share one decode pipeline.
//!
//! Key documents live behind a [`store::KeyStoreClient`]; codecs resolve keys
//! through a [`keys::KeyProvider`], either straight from the store on every
//! call or from a periodically refreshed snapshot.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod service;
pub mod store;
pub mod telemetry;
