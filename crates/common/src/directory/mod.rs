//! Per-user records kept in the overlay
//!
//! - [`IdentityDirectory`]: device locations and key material
//! - [`IdentifierDirectory`]: a bidirectional key <-> value map per user
//!
//! Every mutation is a whole-record read-modify-write. Two peers writing
//!  the same user's record at the same time can lose an update; the last
//!  write wins. No retries happen here, failures go straight to the caller.

mod identifiers;
mod identity;
mod location;

pub use identifiers::{IdentifierDirectory, IdentifierMap};
pub use identity::IdentityDirectory;
pub use location::{DeviceId, PeerLocation};

use crate::crypto::CryptoError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// Password-protected records need the user's salt first
    #[error("no salt registered for user {0}")]
    MissingSalt(String),
    /// The caller's key does not match the user's published public key
    #[error("identity proof rejected for user {0}")]
    IdentityMismatch(String),
}
