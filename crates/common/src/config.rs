use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyStrength, PBKDF2_ITERATIONS};

/// Default ceiling for `ExchangeCoordinator::wait`
pub const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 30;

/// Tunables for a peer
///
/// Loading the file is the embedding application's job; this type only
///  knows how to parse and default itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Upper bound, in seconds, on how long an exchange waits for responses
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,
    /// Symmetric key width; `aes128` only on runtimes that restrict key strength
    #[serde(default)]
    pub key_strength: KeyStrength,
    /// PBKDF2 round count for password-derived keys
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

fn default_exchange_timeout_secs() -> u64 {
    DEFAULT_EXCHANGE_TIMEOUT_SECS
}

fn default_kdf_iterations() -> u32 {
    PBKDF2_ITERATIONS
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_secs: default_exchange_timeout_secs(),
            key_strength: KeyStrength::default(),
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl PeerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PeerConfig = toml::from_str(raw)?;
        if config.kdf_iterations == 0 {
            return Err(ConfigError::Invalid(
                "kdf_iterations must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }
}
