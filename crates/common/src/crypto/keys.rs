use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::CryptoError;

/// Size of Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of the ChaCha20-Poly1305 nonce used by sealed blobs
pub const SEAL_NONCE_SIZE: usize = 12;
/// Largest plaintext accepted by [`PublicKey::seal`]
///
/// Sealing is a single-block transform meant for short key blobs
///  (iv || session key), never for bulk payloads.
pub const MAX_SEAL_INPUT: usize = 128;

const SEAL_CONTEXT: &str = "peerlink 2024 sealed key blob";

/// Public half of a user's identity keypair
///
/// Published unencrypted in the directory; it is the root of trust
///  other peers use to seal messages for this user and to verify
///  signatures made by this user.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(VerifyingKey);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = CryptoError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        let key = VerifyingKey::from_bytes(&buff)
            .map_err(|e| anyhow::anyhow!("invalid public key: {}", e))?;
        Ok(PublicKey(key))
    }
}

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        Self::try_from(buff.as_slice())
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Convert Ed25519 public key to X25519 (Montgomery curve) for ECDH
    fn to_x25519(self) -> Result<X25519PublicKey, CryptoError> {
        let edwards_bytes = self.to_bytes();
        let edwards_point = CompressedEdwardsY::from_slice(&edwards_bytes)
            .map_err(|_| anyhow::anyhow!("public key invalid edwards point"))?
            .decompress()
            .ok_or_else(|| anyhow::anyhow!("public key failed to decompress edwards point"))?;

        let montgomery_point = edwards_point.to_montgomery();
        Ok(X25519PublicKey::from(montgomery_point.to_bytes()))
    }

    /// Verify an Ed25519 signature on a message.
    ///
    /// Any failure (malformed signature, wrong key, tampered message)
    ///  yields `false` rather than an error.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        self.0.verify_strict(msg, &signature).is_ok()
    }

    /// Encrypt a short blob so that only the holder of the matching
    ///  [`SecretKey`] can open it.
    ///
    /// Output layout: `ephemeral_pubkey (32) || nonce (12) || ciphertext || tag (16)`.
    ///
    /// An ephemeral Ed25519 key is generated per call; both keys are moved
    ///  to X25519 and the ECDH output is stretched into a ChaCha20-Poly1305 key.
    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() > MAX_SEAL_INPUT {
            return Err(anyhow::anyhow!(
                "sealed input too large, at most {} bytes, got {}",
                MAX_SEAL_INPUT,
                data.len()
            )
            .into());
        }

        let ephemeral = SecretKey::generate();
        let shared = ephemeral.to_x25519().diffie_hellman(&self.to_x25519()?);
        let key = blake3::derive_key(SEAL_CONTEXT, shared.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        let mut nonce_bytes = [0u8; SEAL_NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), data)
            .map_err(|_| anyhow::anyhow!("seal error"))?;

        let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + SEAL_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&ephemeral.public().to_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Private half of a user's identity keypair
///
/// Stored in the directory only in encrypted form (see
///  `IdentityDirectory::add_private_key`).
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({})", self.public().to_hex())
    }
}

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(secret: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self(SigningKey::from_bytes(&secret))
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = CryptoError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid private key size, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PRIVATE_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Self::from(buff))
    }
}

impl SecretKey {
    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        Ok(Self::from(buff))
    }

    /// Generate a new random secret key using a cryptographically secure RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        Self::from(bytes)
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// The scalar bytes of the Ed25519 key are used directly as the X25519 private key.
    fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0.to_scalar_bytes())
    }

    /// Sign a message with this secret key using Ed25519.
    ///
    /// Ed25519 signing cannot fail for a well-formed key, so there is no
    ///  error path here.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.0.sign(msg).to_bytes().to_vec()
    }

    /// Open a blob produced by [`PublicKey::seal`] for this key.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < PUBLIC_KEY_SIZE + SEAL_NONCE_SIZE {
            return Err(anyhow::anyhow!("sealed blob too short").into());
        }
        let (ephemeral, rest) = data.split_at(PUBLIC_KEY_SIZE);
        let (nonce, ciphertext) = rest.split_at(SEAL_NONCE_SIZE);

        let ephemeral = PublicKey::try_from(ephemeral)?;
        let shared = self.to_x25519().diffie_hellman(&ephemeral.to_x25519()?);
        let key = blake3::derive_key(SEAL_CONTEXT, shared.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow::anyhow!("open error"))?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keypair_hex_roundtrip() {
        let private_key = SecretKey::generate();
        let public_key = private_key.public();

        let recovered_private = SecretKey::from_hex(&private_key.to_hex()).unwrap();
        assert_eq!(private_key.to_bytes(), recovered_private.to_bytes());

        let recovered_public = PublicKey::from_hex(&format!("0x{}", public_key.to_hex())).unwrap();
        assert_eq!(public_key, recovered_public);
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = SecretKey::generate();
        let public_key = secret_key.public();
        let message = b"hello, world!";

        let signature = secret_key.sign(message);
        assert!(public_key.verify(message, &signature));

        // wrong message
        assert!(!public_key.verify(b"hello, world?", &signature));
        // wrong key
        assert!(!SecretKey::generate().public().verify(message, &signature));
        // garbage signature
        assert!(!public_key.verify(message, b"not a signature"));
    }

    #[test]
    fn test_seal_open() {
        let recipient = SecretKey::generate();
        let blob = [7u8; 48];

        let sealed = recipient.public().seal(&blob).unwrap();
        assert_ne!(&sealed[PUBLIC_KEY_SIZE + SEAL_NONCE_SIZE..], &blob[..]);

        let opened = recipient.open(&sealed).unwrap();
        assert_eq!(opened, blob.to_vec());
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let recipient = SecretKey::generate();
        let intruder = SecretKey::generate();

        let sealed = recipient.public().seal(b"session key").unwrap();
        assert!(intruder.open(&sealed).is_err());
    }

    #[test]
    fn test_seal_rejects_large_input() {
        let recipient = SecretKey::generate();
        let blob = vec![0u8; MAX_SEAL_INPUT + 1];
        assert!(recipient.public().seal(&blob).is_err());
    }

    #[test]
    fn test_open_rejects_truncated_blob() {
        let recipient = SecretKey::generate();
        assert!(recipient.open(&[0u8; 10]).is_err());
    }
}
