use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use super::DirectoryError;
use crate::store::{ContentKey, RecordKey, SecuredStore};

/// Two mutually inverse maps for one key/value type pair
///
/// Inserting `(k, v)` drops any earlier pair that used `k` or `v`, so both
///  directions stay one-to-one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierMap<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    forward: HashMap<K, V>,
    inverse: HashMap<V, K>,
}

impl<K, V> Default for IdentifierMap<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    fn default() -> Self {
        Self {
            forward: HashMap::new(),
            inverse: HashMap::new(),
        }
    }
}

impl<K, V> IdentifierMap<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Eq + Hash + Clone + Serialize + DeserializeOwned,
{
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(old_value) = self.forward.remove(&key) {
            self.inverse.remove(&old_value);
        }
        if let Some(old_key) = self.inverse.remove(&value) {
            self.forward.remove(&old_key);
        }
        self.forward.insert(key.clone(), value.clone());
        self.inverse.insert(value, key);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.forward.remove(key)?;
        self.inverse.remove(&value);
        Some(value)
    }

    pub fn value(&self, key: &K) -> Option<&V> {
        self.forward.get(key)
    }

    pub fn key(&self, value: &V) -> Option<&K> {
        self.inverse.get(value)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Persisted as the list of forward pairs; the inverse is rebuilt on load
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        let pairs: Vec<(&K, &V)> = self.forward.iter().collect();
        bincode::serialize(&pairs)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let pairs: Vec<(K, V)> = bincode::deserialize(bytes)?;
        let mut map = Self::default();
        for (key, value) in pairs {
            map.insert(key, value);
        }
        Ok(map)
    }
}

/// Per-user [`IdentifierMap`] stored in the overlay
///
/// Mutations on one directory instance are serialized; writers on other
///  peers are not coordinated with, and the last write wins.
#[derive(Debug, Clone)]
pub struct IdentifierDirectory<S, K, V>
where
    S: SecuredStore,
{
    store: S,
    write_lock: Arc<Mutex<()>>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<S, K, V> IdentifierDirectory<S, K, V>
where
    S: SecuredStore,
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync,
    V: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
            _types: PhantomData,
        }
    }

    pub async fn add_identifier(
        &self,
        username: &str,
        key: K,
        value: V,
    ) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.fetch(username).await?;
        map.insert(key, value);
        self.put(username, &map).await
    }

    /// Remove the pair keyed by `key`; a no-op if there is none
    pub async fn remove_identifier(&self, username: &str, key: &K) -> Result<(), DirectoryError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.fetch(username).await?;
        if map.remove(key).is_none() {
            return Ok(());
        }
        self.put(username, &map).await
    }

    pub async fn get_identifier_value(
        &self,
        username: &str,
        key: &K,
    ) -> Result<Option<V>, DirectoryError> {
        Ok(self.fetch(username).await?.value(key).cloned())
    }

    pub async fn get_key(&self, username: &str, value: &V) -> Result<Option<K>, DirectoryError> {
        Ok(self.fetch(username).await?.key(value).cloned())
    }

    /// The whole map of `username`, empty if nothing is stored
    pub async fn fetch(&self, username: &str) -> Result<IdentifierMap<K, V>, DirectoryError> {
        let record = RecordKey::user(username, ContentKey::Identifiers);
        let bytes = self.store.get(&record).await?;
        if bytes.is_empty() {
            return Ok(IdentifierMap::default());
        }
        Ok(IdentifierMap::from_bytes(&bytes)?)
    }

    async fn put(&self, username: &str, map: &IdentifierMap<K, V>) -> Result<(), DirectoryError> {
        let record = RecordKey::user(username, ContentKey::Identifiers);
        self.store.put(&record, map.to_bytes()?).await?;
        tracing::debug!("stored {} identifier(s) for user {}", map.len(), username);
        Ok(())
    }
}
