//! Symmetric encryption
//!
//! Every algorithm implements the [`SymmetricCipher`] capability; callers
//!  pick one by passing it in (see [`super::CryptoSuite`]) instead of
//!  extending a base type.

use std::fmt::Debug;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};

use super::CryptoError;

/// Size of the CBC initialisation vector in bytes
pub const IV_SIZE: usize = 16;

/// Symmetric key width, chosen once at startup
///
/// `Aes128` exists for runtimes that restrict key strength; everything
///  else should stay on the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrength {
    Aes128,
    #[default]
    Aes256,
}

impl KeyStrength {
    pub fn key_len(&self) -> usize {
        match self {
            KeyStrength::Aes128 => 16,
            KeyStrength::Aes256 => 32,
        }
    }
}

/// Raw symmetric key material (16 or 32 bytes)
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(pub(super) Vec<u8>);

impl Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey({} bits)", self.0.len() * 8)
    }
}

impl SymmetricKey {
    /// Generate a fresh random session key of the given strength
    pub fn generate(strength: KeyStrength) -> Self {
        let mut buff = vec![0u8; strength.key_len()];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    /// Create a key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error unless the slice is exactly 16 or 32 bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, CryptoError> {
        match data.len() {
            16 | 32 => Ok(Self(data.to_vec())),
            len => Err(anyhow::anyhow!("invalid symmetric key size: {}", len).into()),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Generate a random initialisation vector
pub fn generate_iv() -> Result<[u8; IV_SIZE], CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    getrandom::getrandom(&mut iv).map_err(|e| anyhow::anyhow!("failed to generate iv: {}", e))?;
    Ok(iv)
}

/// Capability shared by every symmetric algorithm
pub trait SymmetricCipher: Send + Sync + Debug {
    /// Encrypt `data`
    ///
    /// With an explicit `iv` the output is the bare ciphertext. Without one,
    ///  a random iv is generated and prepended: `iv (16) || ciphertext`.
    fn encrypt(
        &self,
        key: &SymmetricKey,
        iv: Option<&[u8; IV_SIZE]>,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt `data`
    ///
    /// Without an explicit `iv` the first 16 bytes of `data` are taken as the iv.
    fn decrypt(
        &self,
        key: &SymmetricKey,
        iv: Option<&[u8; IV_SIZE]>,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

/// AES in CBC mode with PKCS#7 padding; key width follows the key length
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCbc;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

impl AesCbc {
    fn encrypt_raw(key: &SymmetricKey, iv: &[u8; IV_SIZE], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = match key.bytes().len() {
            16 => Aes128CbcEnc::new_from_slices(key.bytes(), iv)
                .map_err(|e| anyhow::anyhow!("cipher init error: {}", e))?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            32 => Aes256CbcEnc::new_from_slices(key.bytes(), iv)
                .map_err(|e| anyhow::anyhow!("cipher init error: {}", e))?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            len => return Err(anyhow::anyhow!("unsupported key size: {}", len).into()),
        };
        Ok(ciphertext)
    }

    fn decrypt_raw(key: &SymmetricKey, iv: &[u8; IV_SIZE], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let plaintext = match key.bytes().len() {
            16 => Aes128CbcDec::new_from_slices(key.bytes(), iv)
                .map_err(|e| anyhow::anyhow!("cipher init error: {}", e))?
                .decrypt_padded_vec_mut::<Pkcs7>(data),
            32 => Aes256CbcDec::new_from_slices(key.bytes(), iv)
                .map_err(|e| anyhow::anyhow!("cipher init error: {}", e))?
                .decrypt_padded_vec_mut::<Pkcs7>(data),
            len => return Err(anyhow::anyhow!("unsupported key size: {}", len).into()),
        };
        plaintext.map_err(|_| anyhow::anyhow!("decrypt error").into())
    }
}

impl SymmetricCipher for AesCbc {
    fn encrypt(
        &self,
        key: &SymmetricKey,
        iv: Option<&[u8; IV_SIZE]>,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match iv {
            Some(iv) => Self::encrypt_raw(key, iv, data),
            None => {
                let iv = generate_iv()?;
                let ciphertext = Self::encrypt_raw(key, &iv, data)?;
                let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
                out.extend_from_slice(&iv);
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
        }
    }

    fn decrypt(
        &self,
        key: &SymmetricKey,
        iv: Option<&[u8; IV_SIZE]>,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match iv {
            Some(iv) => Self::decrypt_raw(key, iv, data),
            None => {
                if data.len() < IV_SIZE {
                    return Err(anyhow::anyhow!("data too short for iv").into());
                }
                let mut iv = [0u8; IV_SIZE];
                iv.copy_from_slice(&data[..IV_SIZE]);
                Self::decrypt_raw(key, &iv, &data[IV_SIZE..])
            }
        }
    }
}
