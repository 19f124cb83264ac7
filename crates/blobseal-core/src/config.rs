use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BlobsealError, BlobsealResult};

/// Top-level configuration (loaded from blobseal.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobsealConfig {
    pub crypto: CryptoConfig,
    pub logging: LogConfig,
}

/// Container encryption and verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Plaintext read size while encrypting (default: 8192)
    pub page_size: usize,
    /// Plaintext bytes per read while decrypting and verifying (default: 16384)
    pub verify_chunk_size: usize,
    /// Zero-pad plaintext up to its size bucket before encrypting (default: true)
    pub extra_padding: bool,
    /// Refuse to decrypt or validate without a digest in the metadata (default: true)
    pub require_digest: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            page_size: 8192,
            verify_chunk_size: 16 * 1024,
            extra_padding: true,
            require_digest: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl BlobsealConfig {
    pub fn validate(&self) -> BlobsealResult<()> {
        if self.crypto.page_size == 0 {
            return Err(BlobsealError::Config("crypto.page_size must be positive".into()));
        }
        if self.crypto.verify_chunk_size == 0 {
            return Err(BlobsealError::Config(
                "crypto.verify_chunk_size must be positive".into(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            return Err(BlobsealError::Config(format!(
                "logging.format must be \"json\" or \"text\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

/// Load and validate the config at `path`, falling back to defaults when the
/// file does not exist. A missing file is not logged here: this usually runs
/// before the subscriber is installed.
pub fn load_config(path: &Path) -> BlobsealResult<BlobsealConfig> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: BlobsealConfig = toml::from_str(&content)
            .map_err(|e| BlobsealError::Config(format!("parsing {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded config");
        config
    } else {
        BlobsealConfig::default()
    };
    config.validate()?;
    Ok(config)
}
