/**
 * Peer tunables and their defaults.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Identity keypairs, signing and sealed blobs
 *  - Symmetric encryption and password-based key derivation
 */
pub mod crypto;
/**
 * Per-user records kept in the overlay:
 *  device locations, key material and identifier maps.
 */
pub mod directory;
/**
 * A device on the overlay, and the encrypted
 *  request/response exchanges it takes part in.
 */
pub mod peer;
/**
 * The ownership-protected key-value contract
 *  the overlay provides, plus an in-memory adapter.
 */
pub mod store;
/**
 * In-process network and store for multi-device tests.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::config::PeerConfig;
    pub use crate::crypto::{CryptoSuite, PublicKey, SecretKey};
    pub use crate::directory::{DeviceId, IdentifierDirectory, IdentityDirectory, PeerLocation};
    pub use crate::peer::{
        Exchange, ExchangeCoordinator, Payload, Peer, PeerBuilder, Request, RequestHandler,
        Response, Transport,
    };
    pub use crate::store::{MemoryStore, SecuredStore};
}
