//! Ownership-protected key-value storage consumed from the overlay
//!
//! Records are addressed by a key triple: who the record is about
//!  ([`OwnerKey`]), what it holds ([`ContentKey`]) and which protection
//!  scope guards it ([`DomainKey`]). Enforcing the protection is the
//!  adapter's job; this module only builds the triples.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod memory;

pub use memory::{MemoryStore, MemoryStoreClient};

/// Size of owner and domain keys in bytes
pub const RECORD_KEY_SIZE: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("unhandled store provider error: {0}")]
    Provider(#[from] anyhow::Error),
    /// The overlay could not be reached for this operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fixed discriminant for the kind of record stored under an owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKey {
    Locations,
    PrivateKey,
    PublicKey,
    Salt,
    Identifiers,
}

/// Location of a record in the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey([u8; RECORD_KEY_SIZE]);

impl OwnerKey {
    /// Owner key for the world-readable records of a user
    pub fn for_user(username: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"owner:");
        hasher.update(username.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Owner key for records only reachable with the user's credentials
    ///
    /// A wrong password addresses a different record, which simply
    ///  does not exist.
    pub fn for_credentials(username: &str, salt: &[u8], password: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"credentials:");
        hasher.update(username.as_bytes());
        hasher.update(salt);
        hasher.update(password.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_KEY_SIZE] {
        &self.0
    }
}

/// Protection scope of a record
///
/// Whoever controls the key that owns a domain may write every record in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainKey([u8; RECORD_KEY_SIZE]);

impl DomainKey {
    pub fn for_user(username: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"domain:");
        hasher.update(username.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_KEY_SIZE] {
        &self.0
    }
}

/// Full address of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub owner: OwnerKey,
    pub content: ContentKey,
    pub domain: DomainKey,
}

impl RecordKey {
    pub fn new(owner: OwnerKey, content: ContentKey, domain: DomainKey) -> Self {
        Self {
            owner,
            content,
            domain,
        }
    }

    /// A record in the user's own domain, addressed by username
    pub fn user(username: &str, content: ContentKey) -> Self {
        Self::new(
            OwnerKey::for_user(username),
            content,
            DomainKey::for_user(username),
        )
    }

    /// Bytes a writer signs to prove control of the domain
    pub fn signing_bytes(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * RECORD_KEY_SIZE + 1 + data.len());
        out.extend_from_slice(self.owner.as_bytes());
        out.push(self.content as u8);
        out.extend_from_slice(self.domain.as_bytes());
        out.extend_from_slice(data);
        out
    }
}

/// Ownership-protected key-value store
///
/// Reads need no proof. Writes only take effect when the adapter can
///  prove control of the record's domain; a rejected write is dropped
///  without an error, exactly like a write that has not propagated yet.
#[async_trait]
pub trait SecuredStore: Send + Sync + Debug + Clone + 'static {
    /// Fetch a record
    ///
    /// # Returns
    /// * `Ok(bytes)` - The stored bytes, empty if nothing is stored
    /// * `Err(StoreError)` - The overlay could not serve the read
    async fn get(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError>;

    /// Store a record, replacing any previous value
    async fn put(&self, key: &RecordKey, data: Vec<u8>) -> Result<(), StoreError>;
}
