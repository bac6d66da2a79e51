//! Documents exchanged with whatever transport feeds the codecs.
//!
//! These types are serialised as JSON. The payload list mirrors the protobuf
//! JSON mapping of a `Payloads` message so existing clients can talk to the
//! codec without a schema change.

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

// ---------------------------------------------------------------------------
// Payload list
// ---------------------------------------------------------------------------

/// A list of payloads to encode or decode, and the shape of the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadsDocument {
    /// Payloads in caller order. Results keep the same order.
    #[serde(default)]
    pub payloads: Vec<Payload>,
}

impl PayloadsDocument {
    /// Wrap a payload list.
    pub fn new(payloads: Vec<Payload>) -> Self {
        Self { payloads }
    }
}

// ---------------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------------

/// The key a codec encrypts with after a rotation or reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentKey {
    /// Codec name.
    pub codec: String,
    /// Id of the codec's new current key.
    pub current_key_id: String,
}

/// Result of a rotate or reset request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChangeResponse {
    /// One entry per codec whose key set changed.
    pub changed: Vec<CurrentKey>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error document returned when an operation fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"key_not_found"`).
    pub code: String,
    /// Human-readable description. Never contains key material.
    pub message: String,
    /// Index of the failing payload, when the failure is tied to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_index: Option<usize>,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            payload_index: None,
        }
    }

    /// Attach the index of the payload that failed.
    pub fn for_payload(mut self, index: usize) -> Self {
        self.payload_index = Some(index);
        self
    }
}
