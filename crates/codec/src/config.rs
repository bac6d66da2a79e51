//! Configuration loading and validation for the codec service.
//!
//! All values are read from `KEYVAULT__*` environment variables at startup,
//! with `__` separating nested keys:
//!
//! ```text
//! KEYVAULT__ENCODE_CODEC=shared
//! KEYVAULT__CODECS__SHARED__TAG=shared
//! KEYVAULT__CODECS__SHARED__PATH=codec/shared
//! KEYVAULT__CODECS__FAREWELL__TAG=farewell
//! KEYVAULT__CODECS__FAREWELL__PATH=codec/farewell
//! KEYVAULT__CODECS__FAREWELL__MODE=cached
//! KEYVAULT__CODECS__FAREWELL__REFRESH_INTERVAL_SECS=30
//! ```
//!
//! The process exits with a clear error message if any required variable is
//! missing or invalid.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{builder::DefaultState, ConfigBuilder, Environment};
use serde::Deserialize;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "KEYVAULT";

/// How a codec's key provider reaches the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Read the store on every lookup.
    #[default]
    Eager,
    /// Serve lookups from a periodically refreshed snapshot.
    Cached,
}

/// One named codec instance.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    /// Namespace tag written to and matched against envelope metadata. **Required.**
    pub tag: String,

    /// Key document path in the store. **Required.**
    pub path: String,

    /// Provider strategy.
    #[serde(default)]
    pub mode: ProviderMode,

    /// How often (seconds) a cached provider refreshes its snapshot.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl CodecConfig {
    /// Refresh interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory of the file-backed key store.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Name of the codec used for `encode`. **Required.**
    pub encode_codec: String,

    /// Codec instances by name. The decode chain applies them in ascending
    /// name order.
    #[serde(default)]
    pub codecs: BTreeMap<String, CodecConfig>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_store_dir() -> String {
    "keystore".into()
}
fn default_refresh_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_builder(
            config::Config::builder()
                .add_source(Environment::with_prefix(ENV_PREFIX).separator("__")),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let cfg = builder
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.store_dir, "STORE_DIR")?;
        ensure_non_empty(&self.encode_codec, "ENCODE_CODEC")?;

        if self.codecs.is_empty() {
            anyhow::bail!("at least one codec must be configured under CODECS__<NAME>__*");
        }
        if !self.codecs.contains_key(&self.encode_codec) {
            anyhow::bail!(
                "ENCODE_CODEC names unknown codec {:?}; configured: {:?}",
                self.encode_codec,
                self.codecs.keys().collect::<Vec<_>>()
            );
        }

        let mut tags = HashSet::new();
        for (name, codec) in &self.codecs {
            let var = |field: &str| format!("CODECS__{}__{field}", name.to_uppercase());
            ensure_non_empty(&codec.tag, &var("TAG"))?;
            ensure_non_empty(&codec.path, &var("PATH"))?;
            if codec.refresh_interval_secs == 0 {
                anyhow::bail!("{} must be > 0", var("REFRESH_INTERVAL_SECS"));
            }
            if !tags.insert(codec.tag.as_str()) {
                anyhow::bail!("{} duplicates tag {:?}", var("TAG"), codec.tag);
            }
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
