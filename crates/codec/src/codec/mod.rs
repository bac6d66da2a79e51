//! Tag-scoped AES-GCM payload codec and the multi-codec decode chain.
//!
//! # Envelope
//!
//! An encoded payload carries four metadata entries (UTF-8 values) and the
//! sealed body:
//!
//! | key                 | value                            |
//! |---------------------|----------------------------------|
//! | `encoding`          | `binary/encrypted`               |
//! | `encryption-cipher` | `AES/GCM/NoPadding`              |
//! | `encryption-key-id` | id of the encrypting key         |
//! | `encryption-tag`    | tag of the codec that encoded it |
//!
//! `data` = 12-byte nonce ‖ ciphertext ‖ 16-byte authentication tag. The
//! plaintext is the protobuf wire form of the whole inner payload, so decoding
//! restores its metadata as well as its data, and an inner payload may itself
//! be an envelope of another tag.
//!
//! # Tag dispatch
//!
//! A codec only decodes payloads whose `encoding` is the sentinel *and* whose
//! `encryption-tag` equals its own tag; every other payload passes through
//! unchanged. That is what lets several independently keyed codecs share one
//! [`DecodeChain`]. Payloads a codec does claim either decrypt or fail loudly:
//! an integrity failure is never turned into a pass-through.

pub mod chain;

pub use chain::DecodeChain;

use std::sync::Arc;

use bytes::Bytes;
use common::Payload;
use thiserror::Error;
use tracing::{debug, error};

use crate::crypto::{cipher, CipherError};
use crate::keys::{KeyError, KeyMaterial, KeyProvider};

/// Metadata key holding the encoding sentinel.
pub const METADATA_ENCODING_KEY: &str = "encoding";
/// Encoding sentinel marking payloads produced by this codec family.
pub const METADATA_ENCODING: &str = "binary/encrypted";
/// Metadata key holding the cipher identifier.
pub const METADATA_CIPHER_KEY: &str = "encryption-cipher";
/// Cipher identifier written on every envelope.
pub const METADATA_CIPHER: &str = "AES/GCM/NoPadding";
/// Metadata key holding the encrypting key's id.
pub const METADATA_KEY_ID_KEY: &str = "encryption-key-id";
/// Metadata key holding the codec tag.
pub const METADATA_TAG_KEY: &str = "encryption-tag";

/// Errors produced by the codec layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Key lookup failed.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Sealing the payload failed.
    #[error("payload encryption failed: {0}")]
    Encryption(#[source] CipherError),

    /// The envelope was malformed or failed authentication.
    #[error("payload decryption failed: {0}")]
    Decryption(String),
}

/// Encodes and decodes payloads for one tag with one key provider.
#[derive(Clone)]
pub struct PayloadCodec {
    provider: Arc<dyn KeyProvider>,
    tag: String,
}

impl PayloadCodec {
    /// Create a codec for `tag` resolving keys through `provider`.
    pub fn new(provider: Arc<dyn KeyProvider>, tag: impl Into<String>) -> Self {
        Self {
            provider,
            tag: tag.into(),
        }
    }

    /// The namespace tag this codec writes and claims.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The key provider behind this codec.
    pub fn provider(&self) -> &Arc<dyn KeyProvider> {
        &self.provider
    }

    /// Seal `payload` into an envelope under the provider's current key.
    ///
    /// # Errors
    ///
    /// [`CodecError::Key`] if the current key cannot be resolved,
    /// [`CodecError::Encryption`] if sealing fails.
    pub async fn encode(&self, payload: &Payload) -> Result<Payload, CodecError> {
        let key = self.provider.current_key().await?;
        self.seal_with(&key, payload)
    }

    /// Seal every payload under one current key.
    ///
    /// The current key is resolved once, so a batch never mixes key ids even
    /// if a rotation lands while it is being encoded.
    pub async fn encode_all(&self, payloads: &[Payload]) -> Result<Vec<Payload>, CodecError> {
        let key = self.provider.current_key().await?;
        payloads
            .iter()
            .map(|p| self.seal_with(&key, p))
            .collect()
    }

    /// Open `payload` if this codec owns it, returning the inner payload;
    /// return it unchanged otherwise.
    ///
    /// # Errors
    ///
    /// [`CodecError::Key`] if the envelope names an unknown key,
    /// [`CodecError::Decryption`] for a malformed or tampered envelope, or
    /// plaintext that is not a payload.
    pub async fn decode(&self, payload: Payload) -> Result<Payload, CodecError> {
        if !self.owns(&payload) {
            return Ok(payload);
        }

        let key_id = payload
            .metadata_value(METADATA_KEY_ID_KEY)
            .ok_or_else(|| {
                CodecError::Decryption(format!("envelope has no {METADATA_KEY_ID_KEY} entry"))
            })
            .and_then(|raw| {
                std::str::from_utf8(raw).map_err(|_| {
                    CodecError::Decryption(format!("{METADATA_KEY_ID_KEY} is not valid UTF-8"))
                })
            })?;

        let key = self.provider.key(key_id).await?;
        let plaintext = cipher::open(&payload.data, key.secret()).map_err(|e| {
            error!(tag = %self.tag, key_id, error = %e, "payload decryption failed");
            CodecError::Decryption(e.to_string())
        })?;

        Payload::from_wire(&plaintext).map_err(|e| {
            error!(tag = %self.tag, key_id, error = %e, "decrypted data is not a payload");
            CodecError::Decryption(format!("decrypted data is not a payload: {e}"))
        })
    }

    /// Decode each payload independently; one failure does not affect the others.
    pub async fn decode_all(&self, payloads: Vec<Payload>) -> Vec<Result<Payload, CodecError>> {
        let mut results = Vec::with_capacity(payloads.len());
        for payload in payloads {
            results.push(self.decode(payload).await);
        }
        results
    }

    /// `true` if `payload` carries this codec family's sentinel and this tag.
    pub fn owns(&self, payload: &Payload) -> bool {
        let encoded =
            payload.metadata_value(METADATA_ENCODING_KEY) == Some(METADATA_ENCODING.as_bytes());
        let same_tag = payload.metadata_value(METADATA_TAG_KEY) == Some(self.tag.as_bytes());
        if encoded && !same_tag {
            debug!(tag = %self.tag, "encrypted payload belongs to another tag; passing through");
        }
        encoded && same_tag
    }

    fn seal_with(&self, key: &KeyMaterial, payload: &Payload) -> Result<Payload, CodecError> {
        let sealed = cipher::seal(&payload.to_wire(), key.secret()).map_err(|e| {
            error!(tag = %self.tag, key_id = key.id(), error = %e, "payload encryption failed");
            CodecError::Encryption(e)
        })?;

        Ok(Payload::from_data(sealed)
            .with_metadata(METADATA_ENCODING_KEY, METADATA_ENCODING)
            .with_metadata(METADATA_CIPHER_KEY, METADATA_CIPHER)
            .with_metadata(METADATA_KEY_ID_KEY, Bytes::from(key.id().to_owned()))
            .with_metadata(METADATA_TAG_KEY, Bytes::from(self.tag.clone())))
    }
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCodec").field("tag", &self.tag).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::crypto::{NONCE_LEN, TAG_LEN};
    use crate::keys::{EagerKeyProvider, FixedKeyProvider, KeyGenerator};
    use crate::store::MemoryKeyStore;

    fn plain(data: &'static [u8]) -> Payload {
        Payload::from_data(data)
    }

    fn fixed_codec(tag: &str, key_id: &str) -> PayloadCodec {
        let key = KeyMaterial::new(key_id, b"abcdefghijklmnopqrstuvwxyz012345");
        PayloadCodec::new(Arc::new(FixedKeyProvider::new(key)), tag)
    }

    async fn store_codec(store: &MemoryKeyStore, tag: &str) -> PayloadCodec {
        let provider = EagerKeyProvider::new(
            Arc::new(store.clone()),
            format!("codec/{tag}"),
            Arc::new(KeyGenerator::new()),
        );
        provider.reset().await.unwrap();
        PayloadCodec::new(Arc::new(provider), tag)
    }

    #[tokio::test]
    async fn greeting_scenario() {
        let codec = fixed_codec("greeting", "key-1700000000000");
        let encoded = codec.encode(&plain(b"hello")).await.unwrap();

        assert_eq!(encoded.metadata_value("encoding"), Some(&b"binary/encrypted"[..]));
        assert_eq!(
            encoded.metadata_value("encryption-cipher"),
            Some(&b"AES/GCM/NoPadding"[..])
        );
        assert_eq!(encoded.metadata_value("encryption-tag"), Some(&b"greeting"[..]));
        assert_eq!(
            encoded.metadata_value("encryption-key-id"),
            Some(&b"key-1700000000000"[..])
        );
        // "hello" as an inner payload is 7 bytes on the wire.
        assert_eq!(plain(b"hello").encoded_len(), 7);
        assert_eq!(encoded.data.len(), NONCE_LEN + 7 + TAG_LEN);

        let decoded = codec.decode(encoded).await.unwrap();
        assert_eq!(&decoded.data[..], b"hello");
    }

    #[tokio::test]
    async fn round_trip_various_sizes() {
        let codec = fixed_codec("shared", "key-1");
        for len in [0usize, 1, 15, 16, 17, 1024, 64 * 1024] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let original = Payload::from_data(plaintext);
            let encoded = codec.encode(&original).await.unwrap();
            let decoded = codec.decode(encoded).await.unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[tokio::test]
    async fn round_trip_keeps_inner_metadata() {
        let codec = fixed_codec("shared", "key-1");
        let originals = vec![
            plain(b"\"hi\"").with_metadata("encoding", &b"json/plain"[..]),
            plain(b"").with_metadata("encoding", &b"binary/null"[..]),
            Payload::default(),
        ];

        let encoded = codec.encode_all(&originals).await.unwrap();
        assert!(encoded.iter().all(|p| codec.owns(p)));

        let mut decoded = Vec::new();
        for envelope in encoded {
            decoded.push(codec.decode(envelope).await.unwrap());
        }
        assert_eq!(decoded, originals);
    }

    #[tokio::test]
    async fn plaintext_that_is_not_a_payload_is_a_decryption_failure() {
        let codec = fixed_codec("greeting", "key-1");
        let key = KeyMaterial::new("key-1", b"abcdefghijklmnopqrstuvwxyz012345");
        let mut encoded = codec.encode(&plain(b"hello")).await.unwrap();
        // A valid seal over bytes that do not parse (truncated length prefix).
        encoded.data = cipher::seal(b"\x12\x09abc", key.secret()).unwrap().into();
        assert!(matches!(
            codec.decode(encoded).await,
            Err(CodecError::Decryption(msg)) if msg.contains("not a payload")
        ));
    }

    #[tokio::test]
    async fn foreign_tag_passes_through_unchanged() {
        let greeting = fixed_codec("greeting", "key-1");
        let farewell = fixed_codec("farewell", "key-1");
        let encoded = greeting.encode(&plain(b"hello")).await.unwrap();
        assert_eq!(farewell.decode(encoded.clone()).await.unwrap(), encoded);
    }

    #[tokio::test]
    async fn payload_without_sentinel_passes_through() {
        let codec = fixed_codec("greeting", "key-1");
        let plain = Payload::from_data(&b"{\"a\":1}"[..]).with_metadata("encoding", &b"json/plain"[..]);
        assert_eq!(codec.decode(plain.clone()).await.unwrap(), plain);

        // Right tag but no sentinel: still not ours.
        let tagged = Payload::from_data(&b"raw"[..]).with_metadata(METADATA_TAG_KEY, &b"greeting"[..]);
        assert_eq!(codec.decode(tagged.clone()).await.unwrap(), tagged);
    }

    #[tokio::test]
    async fn tampered_envelope_is_a_decryption_failure() {
        let codec = fixed_codec("greeting", "key-1");
        let mut encoded = codec.encode(&plain(b"hello")).await.unwrap();
        let mut data = encoded.data.to_vec();
        data[NONCE_LEN] ^= 0x80;
        encoded.data = data.into();
        assert!(matches!(
            codec.decode(encoded).await,
            Err(CodecError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn truncated_envelope_is_a_decryption_failure() {
        let codec = fixed_codec("greeting", "key-1");
        let mut encoded = codec.encode(&plain(b"hello")).await.unwrap();
        encoded.data = encoded.data.slice(..NONCE_LEN + 3);
        assert!(matches!(
            codec.decode(encoded).await,
            Err(CodecError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn missing_key_id_is_a_decryption_failure() {
        let codec = fixed_codec("greeting", "key-1");
        let mut encoded = codec.encode(&plain(b"hello")).await.unwrap();
        encoded.metadata.remove(METADATA_KEY_ID_KEY);
        assert!(matches!(
            codec.decode(encoded).await,
            Err(CodecError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn wrong_key_under_same_id_is_a_decryption_failure() {
        let producer = fixed_codec("greeting", "key-1");
        let other = KeyMaterial::new("key-1", b"ZYXWVUTSRQPONMLKJIHGFEDCBA987654");
        let consumer = PayloadCodec::new(Arc::new(FixedKeyProvider::new(other)), "greeting");
        let encoded = producer.encode(&plain(b"hello")).await.unwrap();
        assert!(matches!(
            consumer.decode(encoded).await,
            Err(CodecError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn unknown_key_id_is_key_not_found() {
        let codec = fixed_codec("greeting", "key-1");
        let mut encoded = codec.encode(&plain(b"hello")).await.unwrap();
        encoded
            .metadata
            .insert(METADATA_KEY_ID_KEY.into(), Bytes::from_static(b"key-2"));
        assert!(matches!(
            codec.decode(encoded).await,
            Err(CodecError::Key(KeyError::KeyNotFound(id))) if id == "key-2"
        ));
    }

    #[tokio::test]
    async fn rotation_keeps_old_payloads_decodable() {
        let store = MemoryKeyStore::new();
        let codec = store_codec(&store, "shared").await;
        let before = codec.encode(&plain(b"before rotation")).await.unwrap();

        codec.provider().rotate().await.unwrap();
        let after = codec.encode(&plain(b"after rotation")).await.unwrap();
        assert_ne!(
            before.metadata_value(METADATA_KEY_ID_KEY),
            after.metadata_value(METADATA_KEY_ID_KEY)
        );

        assert_eq!(&codec.decode(before).await.unwrap().data[..], b"before rotation");
        assert_eq!(&codec.decode(after).await.unwrap().data[..], b"after rotation");
    }

    #[tokio::test]
    async fn reset_orphans_old_payloads() {
        let store = MemoryKeyStore::new();
        let codec = store_codec(&store, "shared").await;
        let before = codec.encode(&plain(b"doomed")).await.unwrap();

        codec.provider().reset().await.unwrap();
        assert!(matches!(
            codec.decode(before).await,
            Err(CodecError::Key(KeyError::KeyNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn nonces_never_repeat_under_one_key() {
        let codec = fixed_codec("shared", "key-1");
        let payloads = vec![Payload::from_data(&b"same plaintext"[..]); 10_000];
        let encoded = codec.encode_all(&payloads).await.unwrap();

        let nonces: HashSet<Vec<u8>> = encoded
            .iter()
            .map(|p| p.data[..NONCE_LEN].to_vec())
            .collect();
        assert_eq!(nonces.len(), 10_000);
    }

    #[tokio::test]
    async fn encode_all_uses_one_key_id() {
        let store = MemoryKeyStore::new();
        let codec = store_codec(&store, "shared").await;
        let payloads: Vec<_> = (0..5u8).map(|i| Payload::from_data(vec![i])).collect();
        let encoded = codec.encode_all(&payloads).await.unwrap();
        let ids: HashSet<_> = encoded
            .iter()
            .map(|p| p.metadata_value(METADATA_KEY_ID_KEY).unwrap().to_vec())
            .collect();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn decode_all_isolates_failures() {
        let codec = fixed_codec("greeting", "key-1");
        let good = codec.encode(&plain(b"fine")).await.unwrap();
        let mut bad = codec.encode(&plain(b"broken")).await.unwrap();
        bad.data = bad.data.slice(..4);
        let plain = Payload::from_data(&b"untouched"[..]);

        let results = codec.decode_all(vec![good, bad, plain.clone()]).await;
        assert_eq!(&results[0].as_ref().unwrap().data[..], b"fine");
        assert!(matches!(results[1], Err(CodecError::Decryption(_))));
        assert_eq!(results[2].as_ref().unwrap(), &plain);
    }
}
