use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::peer::TestPeer;
use crate::crypto::SecretKey;
use crate::peer::{InboundHandler, Transport, TransportError};
use crate::store::MemoryStore;

#[derive(Debug, Default)]
struct Routes {
    queues: HashMap<SocketAddr, flume::Sender<Vec<u8>>>,
    down: HashSet<SocketAddr>,
}

/// In-process stand-in for the overlay's direct-send layer
///
/// Every bound address gets one delivery queue, drained in order by a
///  task running that address's inbound handler.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<Mutex<Routes>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport for `address`; it receives nothing until a handler
    ///  is registered on it
    pub fn bind(&self, address: SocketAddr) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            network: self.clone(),
            address,
        })
    }

    /// Make `address` unreachable; queued payloads are still delivered
    pub fn disconnect(&self, address: SocketAddr) {
        self.routes.lock().down.insert(address);
    }

    pub fn reconnect(&self, address: SocketAddr) {
        self.routes.lock().down.remove(&address);
    }

    fn route(&self, address: &SocketAddr) -> Option<flume::Sender<Vec<u8>>> {
        let routes = self.routes.lock();
        if routes.down.contains(address) {
            return None;
        }
        routes.queues.get(address).cloned()
    }

    fn listen(&self, address: SocketAddr, handler: Arc<dyn InboundHandler>) {
        let (tx, rx) = flume::unbounded::<Vec<u8>>();
        if self.routes.lock().queues.insert(address, tx).is_some() {
            tracing::warn!("replaced inbound handler on {}", address);
        }
        tokio::spawn(async move {
            while let Ok(payload) = rx.recv_async().await {
                handler.handle_inbound(payload).await;
            }
            tracing::debug!("delivery queue for {} closed", address);
        });
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: SocketAddr,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_direct(&self, address: SocketAddr, payload: Vec<u8>) -> Result<(), TransportError> {
        let queue = self
            .network
            .route(&address)
            .ok_or(TransportError::Unreachable(address))?;
        queue
            .send_async(payload)
            .await
            .map_err(|e| TransportError::Connection(address, e.to_string()))
    }

    fn register_inbound_handler(&self, handler: Arc<dyn InboundHandler>) {
        self.network.listen(self.address, handler);
    }

    fn local_address(&self) -> SocketAddr {
        self.address
    }
}

/// Devices of any number of users sharing one network and one store
///
/// Devices added for the same username share that user's identity key.
#[derive(Debug, Default)]
pub struct TestNetwork {
    network: MemoryNetwork,
    store: MemoryStore,
    keys: HashMap<String, SecretKey>,
    hosts: u8,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Add and start a device for `username` at the next free address
    ///
    /// Addresses are handed out as `10.0.0.1:4001`, `10.0.0.2:4002`, ...
    pub fn add_device(&mut self, username: &str) -> Result<TestPeer> {
        if self.hosts == u8::MAX {
            return Err(anyhow::anyhow!("test network is out of addresses"));
        }
        self.hosts += 1;
        let address = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, self.hosts)),
            4000 + self.hosts as u16,
        );
        let secret_key = self
            .keys
            .entry(username.to_string())
            .or_insert_with(SecretKey::generate)
            .clone();

        let peer = TestPeer::new(
            username,
            secret_key,
            self.store.clone(),
            self.network.bind(address),
        )?;
        peer.peer().start();
        tracing::debug!("added device {}", peer.location());
        Ok(peer)
    }

    /// Poll `condition` until it holds or `timeout` passes
    pub async fn eventually<F, Fut>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            match condition().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!("condition check failed: {}", e),
            }

            if start.elapsed() > timeout {
                return Err(anyhow::anyhow!(
                    "condition not met within timeout ({:?})",
                    timeout
                ));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl InboundHandler for Counter {
        async fn handle_inbound(&self, payload: Vec<u8>) {
            self.0.fetch_add(payload.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_delivery_and_disconnect() -> Result<()> {
        let net = TestNetwork::new();
        let a: SocketAddr = "10.0.0.1:4001".parse()?;
        let b: SocketAddr = "10.0.0.2:4002".parse()?;
        let from_a = net.network().bind(a);
        let at_b = net.network().bind(b);

        // nobody listening yet
        assert!(matches!(
            from_a.send_direct(b, vec![1]).await,
            Err(TransportError::Unreachable(_))
        ));

        let counter = Arc::new(Counter::default());
        at_b.register_inbound_handler(counter.clone());
        from_a.send_direct(b, vec![1, 2, 3]).await?;
        net.eventually(Duration::from_secs(1), || async {
            Ok(counter.0.load(Ordering::SeqCst) == 3)
        })
        .await?;

        net.network().disconnect(b);
        assert!(from_a.send_direct(b, vec![1]).await.is_err());
        net.network().reconnect(b);
        from_a.send_direct(b, vec![1]).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_eventually_timeout() {
        let net = TestNetwork::new();

        let result = net
            .eventually(Duration::from_millis(50), || async { Ok(false) })
            .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn test_devices_of_one_user_share_a_key() -> Result<()> {
        let mut net = TestNetwork::new();
        let d1 = net.add_device("alice")?;
        let d2 = net.add_device("alice")?;
        let other = net.add_device("bob")?;

        assert_eq!(d1.peer().secret().public(), d2.peer().secret().public());
        assert_ne!(d1.peer().secret().public(), other.peer().secret().public());
        assert_ne!(d1.location().address, d2.location().address);
        Ok(())
    }
}
