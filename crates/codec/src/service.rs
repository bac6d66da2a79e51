//! [`CodecService`]: the configured set of codecs behind one façade.
//!
//! Every configured codec gets its own key provider and [`PayloadCodec`].
//! Encoding goes through one explicitly selected codec; decoding goes
//! through a [`DecodeChain`] of all of them in ascending name order.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::protocol::CurrentKey;
use common::{Payload, ServiceError};
use tracing::{debug, error, info};

use crate::codec::{CodecError, DecodeChain, PayloadCodec};
use crate::config::{Config, ProviderMode};
use crate::keys::{
    CachedKeyProvider, EagerKeyProvider, KeyError, KeyGenerator, KeyProvider,
};
use crate::store::KeyStoreClient;

impl From<KeyError> for ServiceError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::ConfigRetrieval(m) => ServiceError::ConfigRetrievalFailure(m),
            KeyError::KeyNotFound(id) => ServiceError::KeyNotFound(id),
            e @ KeyError::StoreWrite(_) => ServiceError::ConfigRetrievalFailure(e.to_string()),
            e @ KeyError::UnsupportedOperation(_) => {
                ServiceError::UnsupportedOperation(e.to_string())
            }
        }
    }
}

impl From<CodecError> for ServiceError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Key(k) => k.into(),
            CodecError::Encryption(c) => ServiceError::EncryptionFailure(c.to_string()),
            CodecError::Decryption(m) => ServiceError::DecryptionFailure(m),
        }
    }
}

/// Named codecs, the decode chain over them, and the default encode codec.
pub struct CodecService {
    codecs: BTreeMap<String, PayloadCodec>,
    chain: DecodeChain,
    encode_codec: String,
}

impl CodecService {
    /// Build one provider and codec per configured codec.
    ///
    /// Cached providers load their document here and start refreshing in
    /// the background; eager providers touch the store on first use.
    ///
    /// # Errors
    ///
    /// Fails if the encode codec is not configured or a cached provider
    /// cannot load its initial document.
    pub async fn from_config(cfg: &Config, store: Arc<dyn KeyStoreClient>) -> Result<Self> {
        let generator = Arc::new(KeyGenerator::new());
        let mut codecs = BTreeMap::new();

        for (name, c) in &cfg.codecs {
            let provider: Arc<dyn KeyProvider> = match c.mode {
                ProviderMode::Eager => Arc::new(EagerKeyProvider::new(
                    Arc::clone(&store),
                    c.path.clone(),
                    Arc::clone(&generator),
                )),
                ProviderMode::Cached => Arc::new(
                    CachedKeyProvider::new(
                        Arc::clone(&store),
                        c.path.clone(),
                        Arc::clone(&generator),
                        c.refresh_interval(),
                    )
                    .await
                    .with_context(|| {
                        format!("codec {name:?}: failed to load key document {:?}", c.path)
                    })?,
                ),
            };
            debug!(codec = %name, tag = %c.tag, mode = ?c.mode, "codec configured");
            codecs.insert(name.clone(), PayloadCodec::new(provider, c.tag.clone()));
        }

        if !codecs.contains_key(&cfg.encode_codec) {
            anyhow::bail!("encode codec {:?} is not configured", cfg.encode_codec);
        }

        let chain = DecodeChain::new(codecs.values().cloned().collect());
        info!(
            codecs = codecs.len(),
            encode_codec = %cfg.encode_codec,
            "codec service ready"
        );

        Ok(Self {
            codecs,
            chain,
            encode_codec: cfg.encode_codec.clone(),
        })
    }

    /// Configured codec names, ascending.
    pub fn codec_names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }

    /// Name of the codec [`encode`](Self::encode) uses.
    pub fn encode_codec(&self) -> &str {
        &self.encode_codec
    }

    /// Encrypt every payload's data with the default encode codec.
    pub async fn encode(&self, payloads: &[Payload]) -> Result<Vec<Payload>, ServiceError> {
        self.encode_with(&self.encode_codec, payloads).await
    }

    /// Encrypt every payload's data with the codec called `name`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::BadRequest`] for an unknown codec name; otherwise the
    /// first failure aborts the whole batch.
    pub async fn encode_with(
        &self,
        name: &str,
        payloads: &[Payload],
    ) -> Result<Vec<Payload>, ServiceError> {
        let codec = self.codec(name)?;
        codec.encode_all(payloads).await.map_err(|e| {
            error!(codec = %name, error = %e, "encode failed");
            e.into()
        })
    }

    /// Decode every payload through the chain, one result per payload.
    pub async fn decode(&self, payloads: Vec<Payload>) -> Vec<Result<Payload, ServiceError>> {
        self.chain
            .decode_all(payloads)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.map_err(|e| {
                    error!(payload_index = index, error = %e, "decode failed");
                    e.into()
                })
            })
            .collect()
    }

    /// Rotate every codec whose provider supports rotation.
    ///
    /// Codecs with a non-rotating provider are skipped. Any other failure
    /// stops the pass; codecs rotated before it keep their new key.
    pub async fn rotate_all(&self) -> Result<Vec<CurrentKey>, ServiceError> {
        let mut rotated = Vec::new();
        for (name, codec) in &self.codecs {
            match codec.provider().rotate().await {
                Ok(current_key_id) => rotated.push(CurrentKey {
                    codec: name.clone(),
                    current_key_id,
                }),
                Err(KeyError::UnsupportedOperation(_)) => {
                    debug!(codec = %name, "provider does not rotate; skipped");
                }
                Err(e) => {
                    error!(codec = %name, error = %e, "rotation failed");
                    return Err(e.into());
                }
            }
        }
        Ok(rotated)
    }

    /// Reset the key set of the codec called `name`.
    pub async fn reset(&self, name: &str) -> Result<CurrentKey, ServiceError> {
        let current_key_id = self.codec(name)?.provider().reset().await?;
        Ok(CurrentKey {
            codec: name.to_owned(),
            current_key_id,
        })
    }

    fn codec(&self, name: &str) -> Result<&PayloadCodec, ServiceError> {
        self.codecs
            .get(name)
            .ok_or_else(|| ServiceError::BadRequest(format!("unknown codec {name:?}")))
    }
}

/// Reset one codec's key document without building the whole service.
///
/// Reset never reads the existing document, so this also creates the
/// document for a codec that has never had one.
pub async fn reset_codec(
    cfg: &Config,
    store: Arc<dyn KeyStoreClient>,
    name: &str,
) -> Result<CurrentKey, ServiceError> {
    let c = cfg
        .codecs
        .get(name)
        .ok_or_else(|| ServiceError::BadRequest(format!("unknown codec {name:?}")))?;
    let provider = EagerKeyProvider::new(store, c.path.clone(), Arc::new(KeyGenerator::new()));
    let current_key_id = provider.reset().await?;
    Ok(CurrentKey {
        codec: name.to_owned(),
        current_key_id,
    })
}
