use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{DirectoryError, PeerLocation};
use crate::crypto::{CryptoSuite, PublicKey, SecretKey};
use crate::store::{ContentKey, DomainKey, OwnerKey, RecordKey, SecuredStore};

/// Per-user registry of device locations and key material
///
/// | record      | stored as                              | readable by |
/// |-------------|----------------------------------------|-------------|
/// | locations   | bincode `Vec<PeerLocation>`            | anyone      |
/// | public key  | raw 32 bytes                           | anyone      |
/// | salt        | raw bytes                              | anyone      |
/// | private key | AES-CBC under a password-derived key   | password holders |
#[derive(Debug, Clone)]
pub struct IdentityDirectory<S: SecuredStore> {
    store: S,
    crypto: CryptoSuite,
    /// locations this peer has written, by username
    cache: Arc<RwLock<HashMap<String, Vec<PeerLocation>>>>,
}

impl<S: SecuredStore> IdentityDirectory<S> {
    pub fn new(store: S, crypto: CryptoSuite) -> Self {
        Self {
            store,
            crypto,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register `location` for `username`
    ///
    /// Adding a location that is already listed leaves the list unchanged.
    pub async fn add_location(
        &self,
        username: &str,
        location: PeerLocation,
    ) -> Result<(), DirectoryError> {
        let mut locations = self.get_locations(username).await?;
        if !locations.contains(&location) {
            locations.push(location);
        }
        self.put_locations(username, locations).await
    }

    /// Unregister `location` for `username`; a no-op if it is not listed
    pub async fn remove_location(
        &self,
        username: &str,
        location: &PeerLocation,
    ) -> Result<(), DirectoryError> {
        let mut locations = self.get_locations(username).await?;
        locations.retain(|l| l != location);
        self.put_locations(username, locations).await
    }

    /// All registered locations of `username`, empty if none
    pub async fn get_locations(&self, username: &str) -> Result<Vec<PeerLocation>, DirectoryError> {
        let key = RecordKey::user(username, ContentKey::Locations);
        let bytes = self.store.get(&key).await?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Locations of `username` as last written through this directory
    pub fn cached_locations(&self, username: &str) -> Vec<PeerLocation> {
        self.cache.read().get(username).cloned().unwrap_or_default()
    }

    async fn put_locations(
        &self,
        username: &str,
        locations: Vec<PeerLocation>,
    ) -> Result<(), DirectoryError> {
        let key = RecordKey::user(username, ContentKey::Locations);
        self.store.put(&key, bincode::serialize(&locations)?).await?;
        tracing::debug!(
            "stored {} location(s) for user {}",
            locations.len(),
            username
        );
        self.cache.write().insert(username.to_string(), locations);
        Ok(())
    }

    pub async fn add_public_key(
        &self,
        username: &str,
        public_key: &PublicKey,
    ) -> Result<(), DirectoryError> {
        let key = RecordKey::user(username, ContentKey::PublicKey);
        self.store.put(&key, public_key.to_bytes().to_vec()).await?;
        Ok(())
    }

    pub async fn get_public_key(&self, username: &str) -> Result<Option<PublicKey>, DirectoryError> {
        let key = RecordKey::user(username, ContentKey::PublicKey);
        let bytes = self.store.get(&key).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(PublicKey::try_from(bytes.as_slice())?))
    }

    pub async fn add_salt(&self, username: &str, salt: &[u8]) -> Result<(), DirectoryError> {
        let key = RecordKey::user(username, ContentKey::Salt);
        self.store.put(&key, salt.to_vec()).await?;
        Ok(())
    }

    pub async fn get_salt(&self, username: &str) -> Result<Option<Vec<u8>>, DirectoryError> {
        let key = RecordKey::user(username, ContentKey::Salt);
        let bytes = self.store.get(&key).await?;
        Ok((!bytes.is_empty()).then_some(bytes))
    }

    /// Store the user's private key, encrypted under a key derived from
    ///  `password` and the user's salt
    ///
    /// The record lives at an owner key hashed from username, salt and
    ///  password, so only the right password can even find it.
    pub async fn add_private_key(
        &self,
        username: &str,
        password: &str,
        secret_key: &SecretKey,
    ) -> Result<(), DirectoryError> {
        let salt = self
            .get_salt(username)
            .await?
            .ok_or_else(|| DirectoryError::MissingSalt(username.to_string()))?;

        let key = self.private_key_record(username, &salt, password);
        let encryption_key = self.crypto.derive_key(password, &salt);
        let encrypted = self
            .crypto
            .encrypt(&encryption_key, None, &secret_key.to_bytes())?;

        self.store.put(&key, encrypted).await?;
        Ok(())
    }

    /// Fetch and decrypt the user's private key
    ///
    /// `proof` is the key the caller already holds for this user; it must
    ///  match the published public key before anything is decrypted.
    pub async fn get_private_key(
        &self,
        username: &str,
        password: &str,
        proof: &SecretKey,
    ) -> Result<Option<SecretKey>, DirectoryError> {
        match self.get_public_key(username).await? {
            None => return Ok(None),
            Some(public_key) if public_key == proof.public() => {}
            Some(_) => return Err(DirectoryError::IdentityMismatch(username.to_string())),
        }

        let Some(salt) = self.get_salt(username).await? else {
            return Ok(None);
        };

        let key = self.private_key_record(username, &salt, password);
        let encrypted = self.store.get(&key).await?;
        if encrypted.is_empty() {
            return Ok(None);
        }

        let encryption_key = self.crypto.derive_key(password, &salt);
        let bytes = self.crypto.decrypt(&encryption_key, None, &encrypted)?;
        Ok(Some(SecretKey::try_from(bytes.as_slice())?))
    }

    fn private_key_record(&self, username: &str, salt: &[u8], password: &str) -> RecordKey {
        RecordKey::new(
            OwnerKey::for_credentials(username, salt, password),
            ContentKey::PrivateKey,
            DomainKey::for_user(username),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_salt;
    use crate::directory::DeviceId;
    use crate::store::{MemoryStore, MemoryStoreClient};

    fn directory(user_key: &SecretKey) -> IdentityDirectory<MemoryStoreClient> {
        IdentityDirectory::new(
            MemoryStore::new().client(user_key.clone()),
            CryptoSuite::default(),
        )
    }

    fn location(username: &str, addr: &str) -> PeerLocation {
        PeerLocation::new(username, DeviceId::generate(), addr.parse().unwrap())
    }

    #[tokio::test]
    async fn test_empty_locations() {
        let dir = directory(&SecretKey::generate());
        assert!(dir.get_locations("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_location_twice_keeps_one() {
        let dir = directory(&SecretKey::generate());
        let loc = location("alice", "10.0.0.1:4001");

        dir.add_location("alice", loc.clone()).await.unwrap();
        dir.add_location("alice", loc.clone()).await.unwrap();

        assert_eq!(dir.get_locations("alice").await.unwrap(), vec![loc]);
    }

    #[tokio::test]
    async fn test_remove_location() {
        let dir = directory(&SecretKey::generate());
        let loc = location("alice", "10.0.0.1:4001");
        let other = location("alice", "10.0.0.2:4002");

        // removing from an empty list is a no-op
        dir.remove_location("alice", &loc).await.unwrap();
        assert!(dir.get_locations("alice").await.unwrap().is_empty());

        dir.add_location("alice", loc.clone()).await.unwrap();
        dir.add_location("alice", other.clone()).await.unwrap();
        dir.remove_location("alice", &loc).await.unwrap();

        assert_eq!(dir.get_locations("alice").await.unwrap(), vec![other.clone()]);
        assert_eq!(dir.cached_locations("alice"), vec![other]);
    }

    #[tokio::test]
    async fn test_public_key_and_salt() {
        let user_key = SecretKey::generate();
        let dir = directory(&user_key);
        let salt = generate_salt();

        assert!(dir.get_public_key("alice").await.unwrap().is_none());
        assert!(dir.get_salt("alice").await.unwrap().is_none());

        dir.add_public_key("alice", &user_key.public()).await.unwrap();
        dir.add_salt("alice", &salt).await.unwrap();

        assert_eq!(
            dir.get_public_key("alice").await.unwrap(),
            Some(user_key.public())
        );
        assert_eq!(dir.get_salt("alice").await.unwrap(), Some(salt.to_vec()));
    }

    #[tokio::test]
    async fn test_private_key_roundtrip() {
        let user_key = SecretKey::generate();
        let dir = directory(&user_key);

        dir.add_salt("alice", &generate_salt()).await.unwrap();
        dir.add_public_key("alice", &user_key.public()).await.unwrap();
        dir.add_private_key("alice", "hunter2", &user_key)
            .await
            .unwrap();

        let recovered = dir
            .get_private_key("alice", "hunter2", &user_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recovered.to_bytes(), user_key.to_bytes());
    }

    #[tokio::test]
    async fn test_wrong_password_finds_nothing() {
        let user_key = SecretKey::generate();
        let dir = directory(&user_key);

        dir.add_salt("alice", &generate_salt()).await.unwrap();
        dir.add_public_key("alice", &user_key.public()).await.unwrap();
        dir.add_private_key("alice", "hunter2", &user_key)
            .await
            .unwrap();

        assert!(dir
            .get_private_key("alice", "hunter3", &user_key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_private_key_needs_identity_proof() {
        let user_key = SecretKey::generate();
        let dir = directory(&user_key);

        dir.add_salt("alice", &generate_salt()).await.unwrap();
        dir.add_public_key("alice", &user_key.public()).await.unwrap();
        dir.add_private_key("alice", "hunter2", &user_key)
            .await
            .unwrap();

        let result = dir
            .get_private_key("alice", "hunter2", &SecretKey::generate())
            .await;
        assert!(matches!(result, Err(DirectoryError::IdentityMismatch(_))));
    }

    #[tokio::test]
    async fn test_private_key_needs_salt() {
        let user_key = SecretKey::generate();
        let dir = directory(&user_key);

        let result = dir.add_private_key("alice", "hunter2", &user_key).await;
        assert!(matches!(result, Err(DirectoryError::MissingSalt(_))));
    }

    #[tokio::test]
    async fn test_unregistered_user_has_no_private_key() {
        let user_key = SecretKey::generate();
        let dir = directory(&user_key);

        let result = dir.get_private_key("nobody", "pw", &user_key).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let user_key = SecretKey::generate();
        let dir = directory(&user_key);

        dir.store().store().set_offline(true);
        let result = dir
            .add_location("alice", location("alice", "10.0.0.1:4001"))
            .await;
        assert!(matches!(result, Err(DirectoryError::Store(_))));
    }
}
