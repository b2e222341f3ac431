use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;

use super::network::MemoryTransport;
use crate::crypto::SecretKey;
use crate::directory::PeerLocation;
use crate::peer::Peer;
use crate::store::{MemoryStore, MemoryStoreClient};

/// A device on a [`super::TestNetwork`]
#[derive(Debug)]
pub struct TestPeer {
    peer: Peer<MemoryStoreClient>,
}

impl TestPeer {
    /// Build a peer for `username` whose store writes are signed with
    ///  the user's key
    pub fn new(
        username: &str,
        secret_key: SecretKey,
        store: MemoryStore,
        transport: Arc<MemoryTransport>,
    ) -> Result<Self> {
        let peer = Peer::builder()
            .username(username)
            .store(store.client(secret_key.clone()))
            .secret_key(secret_key)
            .transport(transport)
            .build()?;
        Ok(Self { peer })
    }

    pub fn peer(&self) -> &Peer<MemoryStoreClient> {
        &self.peer
    }

    pub fn location(&self) -> &PeerLocation {
        self.peer.location()
    }

    pub fn address(&self) -> SocketAddr {
        self.peer.address()
    }

    /// Register the user if needed, then log this device in
    pub async fn join(&self, password: &str) -> Result<()> {
        let registered = self
            .peer
            .directory()
            .get_public_key(self.peer.username())
            .await?
            .is_some();
        if !registered && !self.peer.register(password).await {
            return Err(anyhow::anyhow!("failed to register {}", self.peer.username()));
        }
        if !self.peer.login().await {
            return Err(anyhow::anyhow!("failed to log in {}", self.location()));
        }
        Ok(())
    }
}
