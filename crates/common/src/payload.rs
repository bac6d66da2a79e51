//! The opaque binary payload exchanged with codecs.
//!
//! A payload is a metadata map of raw byte values plus a data blob. Encrypted
//! envelopes and plaintext payloads share this shape; the metadata decides
//! which codec (if any) owns a payload.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single payload: `metadata` entries plus opaque `data` bytes.
///
/// Serialised with the protobuf JSON mapping, where every byte value is a
/// standard base64 string:
///
/// ```json
/// {"metadata": {"encoding": "YmluYXJ5L2VuY3J5cHRlZA=="}, "data": "..."}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Metadata entries, ordered by key for stable output.
    #[serde(default, with = "base64_map")]
    pub metadata: BTreeMap<String, Bytes>,
    /// Payload body.
    #[serde(default, with = "base64_bytes")]
    pub data: Bytes,
}

impl Payload {
    /// A payload with the given data and no metadata.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: BTreeMap::new(),
            data: data.into(),
        }
    }

    /// Builder-style insertion of a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Raw metadata value for `key`, if present.
    pub fn metadata_value(&self, key: &str) -> Option<&[u8]> {
        self.metadata.get(key).map(|v| v.as_ref())
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::de::Error as _;

    use super::*;

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

mod base64_map {
    use base64::Engine as _;
    use serde::de::Error as _;

    use super::*;

    pub fn serialize<S: Serializer>(
        value: &BTreeMap<String, Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = value
            .iter()
            .map(|(k, v)| (k.as_str(), STANDARD.encode(v)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Bytes>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v.as_bytes())
                    .map(|raw| (k, Bytes::from(raw)))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
