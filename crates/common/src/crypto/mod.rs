//! Cryptographic primitives for PeerLink
//!
//! - **Identity**: Ed25519 keypairs (`SecretKey`/`PublicKey`) per user, used
//!   for signing and as the target of sealed (asymmetric) blobs
//! - **Bulk encryption**: AES-CBC behind the [`SymmetricCipher`] capability
//! - **Key derivation**: PBKDF2-HMAC-SHA256 from a password and a salt
//! - **Hybrid encryption**: a fresh session key and iv encrypt the payload,
//!   `iv || key` is sealed to the recipient's public key
//!
//! Every failure in this module is a [`CryptoError`]; callers treat it as
//!  fatal for the message at hand and must not retry identical inputs.

mod cipher;
mod kdf;
mod keys;

use std::sync::Arc;

pub use cipher::{generate_iv, AesCbc, KeyStrength, SymmetricCipher, SymmetricKey, IV_SIZE};
pub use kdf::{derive_key, generate_salt, PBKDF2_ITERATIONS, SALT_SIZE};
pub use keys::{PublicKey, SecretKey, MAX_SEAL_INPUT, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};

use crate::config::PeerConfig;

/// The uniform security failure
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("security failure: {0}")]
    Default(#[from] anyhow::Error),
}

/// Crypto capabilities chosen once at startup and handed to every
///  component that encrypts or derives keys
#[derive(Debug, Clone)]
pub struct CryptoSuite {
    cipher: Arc<dyn SymmetricCipher>,
    strength: KeyStrength,
    kdf_iterations: u32,
}

impl Default for CryptoSuite {
    fn default() -> Self {
        Self::new(Arc::new(AesCbc), KeyStrength::default(), PBKDF2_ITERATIONS)
    }
}

impl CryptoSuite {
    pub fn new(cipher: Arc<dyn SymmetricCipher>, strength: KeyStrength, kdf_iterations: u32) -> Self {
        Self {
            cipher,
            strength,
            kdf_iterations,
        }
    }

    pub fn from_config(config: &PeerConfig) -> Self {
        Self::new(Arc::new(AesCbc), config.key_strength, config.kdf_iterations)
    }

    pub fn strength(&self) -> KeyStrength {
        self.strength
    }

    pub fn derive_key(&self, password: &str, salt: &[u8]) -> SymmetricKey {
        derive_key(password, salt, self.strength, self.kdf_iterations)
    }

    pub fn generate_key(&self) -> SymmetricKey {
        SymmetricKey::generate(self.strength)
    }

    pub fn encrypt(
        &self,
        key: &SymmetricKey,
        iv: Option<&[u8; IV_SIZE]>,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher.encrypt(key, iv, data)
    }

    pub fn decrypt(
        &self,
        key: &SymmetricKey,
        iv: Option<&[u8; IV_SIZE]>,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher.decrypt(key, iv, data)
    }
}
