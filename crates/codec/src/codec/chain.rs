//! [`DecodeChain`]: one decode pipeline shared by several tag-scoped codecs.

use std::collections::HashSet;

use common::Payload;
use tracing::warn;

use super::{CodecError, PayloadCodec};

/// Ordered list of codecs applied to every payload on decode.
///
/// Each payload is passed through the codecs in the order given at
/// construction, every codec's output feeding the next. A codec ignores
/// payloads carrying another tag, so for payloads matching exactly one tag
/// the result does not depend on the order; the order is still fixed so
/// logs and failures are reproducible.
///
/// There is no chained encode. Callers pick one codec explicitly to encode.
#[derive(Clone, Debug)]
pub struct DecodeChain {
    codecs: Vec<PayloadCodec>,
}

impl DecodeChain {
    /// Build a chain over `codecs`, applied in the given order.
    pub fn new(codecs: Vec<PayloadCodec>) -> Self {
        let mut seen = HashSet::new();
        for codec in &codecs {
            if !seen.insert(codec.tag()) {
                warn!(
                    tag = codec.tag(),
                    "duplicate codec tag in decode chain; only the first codec will decode it"
                );
            }
        }
        Self { codecs }
    }

    /// The codecs in application order.
    pub fn codecs(&self) -> &[PayloadCodec] {
        &self.codecs
    }

    /// Decode one payload through every codec in order.
    ///
    /// Stops at the first codec that fails; that failure is the result.
    pub async fn decode(&self, payload: Payload) -> Result<Payload, CodecError> {
        let mut current = payload;
        for codec in &self.codecs {
            current = codec.decode(current).await?;
        }
        Ok(current)
    }

    /// Decode every payload, returning one result per payload in input order.
    pub async fn decode_all(&self, payloads: Vec<Payload>) -> Vec<Result<Payload, CodecError>> {
        let mut results = Vec::with_capacity(payloads.len());
        for payload in payloads {
            results.push(self.decode(payload).await);
        }
        results
    }
}
