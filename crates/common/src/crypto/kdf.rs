use sha2::Sha256;

use super::cipher::{KeyStrength, SymmetricKey};

/// Default PBKDF2 round count
pub const PBKDF2_ITERATIONS: u32 = 10_000;
/// Size of a freshly generated salt in bytes
pub const SALT_SIZE: usize = 16;

/// Derive a symmetric key from a password with PBKDF2-HMAC-SHA256
///
/// Deterministic for a fixed `(password, salt, strength, iterations)`.
pub fn derive_key(
    password: &str,
    salt: &[u8],
    strength: KeyStrength,
    iterations: u32,
) -> SymmetricKey {
    let mut out = vec![0u8; strength.key_len()];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    SymmetricKey(out)
}

/// Generate a random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    getrandom::getrandom(&mut salt).expect("failed to generate random bytes");
    salt
}
