use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{DomainKey, RecordKey, SecuredStore, StoreError};
use crate::crypto::{PublicKey, SecretKey};

/// In-memory stand-in for the overlay, shared by every peer in a process
///
/// Models the overlay's protection scheme: the first key that writes into
///  a domain owns it, later writes signed by any other key are dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    records: HashMap<RecordKey, Vec<u8>>,
    /// domain -> key that claimed it
    domains: HashMap<DomainKey, PublicKey>,
    offline: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A view of the store that signs its writes with `signer`
    pub fn client(&self, signer: SecretKey) -> MemoryStoreClient {
        MemoryStoreClient {
            store: self.clone(),
            signer,
        }
    }

    /// Simulate losing (or regaining) the overlay; while offline every
    ///  operation fails with [`StoreError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.inner.write() {
            inner.offline = offline;
        }
    }

    /// Key that currently owns `domain`, if any
    pub fn domain_owner(&self, domain: &DomainKey) -> Option<PublicKey> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.domains.get(domain).copied())
    }

    fn get(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| anyhow::anyhow!("failed to acquire read lock: {}", e))?;
        if inner.offline {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }

        Ok(inner.records.get(key).cloned().unwrap_or_default())
    }

    fn put(
        &self,
        key: &RecordKey,
        data: Vec<u8>,
        writer: PublicKey,
        signature: &[u8],
    ) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| anyhow::anyhow!("failed to acquire write lock: {}", e))?;
        if inner.offline {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }

        let owner = *inner.domains.entry(key.domain).or_insert(writer);
        if owner != writer || !owner.verify(&key.signing_bytes(&data), signature) {
            // rejected writes are indistinguishable from unpropagated ones
            tracing::warn!(
                "dropping write to {:?} in a domain owned by {:?}",
                key.content,
                owner
            );
            return Ok(());
        }

        inner.records.insert(*key, data);
        Ok(())
    }
}

/// One peer's handle on a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryStoreClient {
    store: MemoryStore,
    signer: SecretKey,
}

impl MemoryStoreClient {
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl SecuredStore for MemoryStoreClient {
    async fn get(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError> {
        self.store.get(key)
    }

    async fn put(&self, key: &RecordKey, data: Vec<u8>) -> Result<(), StoreError> {
        let signature = self.signer.sign(&key.signing_bytes(&data));
        self.store.put(key, data, self.signer.public(), &signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ContentKey;

    #[tokio::test]
    async fn test_absent_record_is_empty() {
        let store = MemoryStore::new().client(SecretKey::generate());
        let key = RecordKey::user("alice", ContentKey::Salt);

        assert!(store.get(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owner_can_overwrite() {
        let store = MemoryStore::new().client(SecretKey::generate());
        let key = RecordKey::user("alice", ContentKey::Salt);

        store.put(&key, vec![1, 2, 3]).await.unwrap();
        store.put(&key, vec![4, 5]).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_foreign_write_is_silently_dropped() {
        let backend = MemoryStore::new();
        let alice_key = SecretKey::generate();
        let alice = backend.client(alice_key.clone());
        let mallory = backend.client(SecretKey::generate());
        let key = RecordKey::user("alice", ContentKey::PublicKey);

        alice.put(&key, vec![1]).await.unwrap();
        // no error, but no effect either
        mallory.put(&key, vec![2]).await.unwrap();

        assert_eq!(mallory.get(&key).await.unwrap(), vec![1]);
        assert_eq!(
            backend.domain_owner(&key.domain),
            Some(alice_key.public())
        );
    }

    #[tokio::test]
    async fn test_claim_covers_whole_domain() {
        let backend = MemoryStore::new();
        let alice = backend.client(SecretKey::generate());
        let mallory = backend.client(SecretKey::generate());

        alice
            .put(&RecordKey::user("alice", ContentKey::Salt), vec![1])
            .await
            .unwrap();

        let locations = RecordKey::user("alice", ContentKey::Locations);
        mallory.put(&locations, vec![9]).await.unwrap();
        assert!(alice.get(&locations).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let backend = MemoryStore::new();
        let client = backend.client(SecretKey::generate());
        let key = RecordKey::user("alice", ContentKey::Salt);

        backend.set_offline(true);
        assert!(matches!(
            client.get(&key).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            client.put(&key, vec![1]).await,
            Err(StoreError::Unavailable(_))
        ));

        backend.set_offline(false);
        assert!(client.get(&key).await.is_ok());
    }
}
