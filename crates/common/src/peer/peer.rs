use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::PeerConfig;
use crate::crypto::{generate_salt, CryptoSuite, SecretKey};
use crate::directory::{DeviceId, DirectoryError, IdentityDirectory, PeerLocation};
use crate::store::SecuredStore;

use super::protocol::{
    EncryptionEnvelope, Exchange, ExchangeCoordinator, MessageDispatcher, Payload, Ping,
    PingExchange, PingHandler, RequestHandler, SealedSender,
};
use super::transport::{InboundHandler, MessageSender, Transport};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("message codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("peer builder is missing {0}")]
    Incomplete(&'static str),
}

pub struct PeerBuilder<S: SecuredStore> {
    username: Option<String>,
    /// generated if not set
    device_id: Option<DeviceId>,
    /// the user's identity key; every device of a user holds the same one
    secret_key: Option<SecretKey>,
    store: Option<S>,
    transport: Option<Arc<dyn Transport>>,
    config: PeerConfig,
}

impl<S: SecuredStore> Default for PeerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SecuredStore> PeerBuilder<S> {
    pub fn new() -> Self {
        PeerBuilder {
            username: None,
            device_id: None,
            secret_key: None,
            store: None,
            transport: None,
            config: PeerConfig::default(),
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn device_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Peer<S>, PeerError> {
        let username = self.username.ok_or(PeerError::Incomplete("a username"))?;
        let secret_key = self.secret_key.ok_or(PeerError::Incomplete("a secret key"))?;
        let store = self.store.ok_or(PeerError::Incomplete("a secured store"))?;
        let transport = self.transport.ok_or(PeerError::Incomplete("a transport"))?;
        let device_id = self.device_id.unwrap_or_else(DeviceId::generate);

        let location = PeerLocation::new(username, device_id, transport.local_address());
        let crypto = CryptoSuite::from_config(&self.config);
        let directory = IdentityDirectory::new(store, crypto.clone());
        let dispatcher = Arc::new(MessageDispatcher::new(location.clone()));
        dispatcher.register_handler::<Ping, _>(|| Box::new(PingHandler));

        let envelope = Arc::new(EncryptionEnvelope::new(
            dispatcher.clone(),
            directory.clone(),
            secret_key.clone(),
            crypto,
        ));
        let sender: Arc<dyn MessageSender> =
            Arc::new(SealedSender::new(envelope.clone(), transport.clone()));

        Ok(Peer {
            location,
            secret_key,
            config: self.config,
            directory,
            dispatcher,
            envelope,
            transport,
            sender,
            started: AtomicBool::new(false),
        })
    }
}

/// One device of one user on the overlay
///
/// Ties the identity directory, the dispatcher behind its encryption
///  envelope, and the transport together. Lifecycle operations report
///  failure as `false` and log the cause; directory reads surface their
///  errors.
#[derive(Debug)]
pub struct Peer<S: SecuredStore> {
    location: PeerLocation,
    secret_key: SecretKey,
    config: PeerConfig,
    directory: IdentityDirectory<S>,
    dispatcher: Arc<MessageDispatcher>,
    envelope: Arc<EncryptionEnvelope<S>>,
    transport: Arc<dyn Transport>,
    sender: Arc<dyn MessageSender>,
    started: AtomicBool,
}

impl<S: SecuredStore> Peer<S> {
    pub fn builder() -> PeerBuilder<S> {
        PeerBuilder::new()
    }

    pub fn location(&self) -> &PeerLocation {
        &self.location
    }

    pub fn username(&self) -> &str {
        &self.location.username
    }

    pub fn address(&self) -> SocketAddr {
        self.location.address
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn directory(&self) -> &IdentityDirectory<S> {
        &self.directory
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    /// Start accepting inbound frames
    ///
    /// Only the first call registers with the transport.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("peer {} already started", self.location);
            return;
        }
        self.transport.register_inbound_handler(Arc::new(InboundRouter {
            envelope: self.envelope.clone(),
            transport: self.transport.clone(),
        }));
        tracing::info!("peer {} listening", self.location);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Publish a fresh salt, the user's public key and the user's private
    ///  key encrypted under `password`
    pub async fn register(&self, password: &str) -> bool {
        match self.try_register(password).await {
            Ok(()) => {
                tracing::info!("registered user {}", self.username());
                true
            }
            Err(e) => {
                tracing::error!("failed to register user {}: {}", self.username(), e);
                false
            }
        }
    }

    async fn try_register(&self, password: &str) -> Result<(), DirectoryError> {
        let username = self.username();
        self.directory.add_salt(username, &generate_salt()).await?;
        self.directory
            .add_public_key(username, &self.secret_key.public())
            .await?;
        self.directory
            .add_private_key(username, password, &self.secret_key)
            .await
    }

    /// Announce this device's location
    pub async fn login(&self) -> bool {
        match self
            .directory
            .add_location(self.username(), self.location.clone())
            .await
        {
            Ok(()) => {
                tracing::info!("logged in {}", self.location);
                true
            }
            Err(e) => {
                tracing::error!("failed to log in {}: {}", self.location, e);
                false
            }
        }
    }

    /// Withdraw this device's location
    pub async fn logout(&self) -> bool {
        match self
            .directory
            .remove_location(self.username(), &self.location)
            .await
        {
            Ok(()) => {
                tracing::info!("logged out {}", self.location);
                true
            }
            Err(e) => {
                tracing::error!("failed to log out {}: {}", self.location, e);
                false
            }
        }
    }

    /// Fetch the user's private key, proving identity with the key this
    ///  peer already holds
    pub async fn recover_private_key(&self, password: &str) -> Result<Option<SecretKey>, PeerError> {
        Ok(self
            .directory
            .get_private_key(self.username(), password, &self.secret_key)
            .await?)
    }

    /// Locations this peer has written, by username
    pub fn known_locations(&self, username: &str) -> Vec<PeerLocation> {
        self.directory.cached_locations(username)
    }

    pub fn register_handler<P, F>(&self, factory: F)
    where
        P: Payload,
        F: Fn() -> Box<dyn RequestHandler> + Send + Sync + 'static,
    {
        self.dispatcher.register_handler::<P, F>(factory);
    }

    /// A coordinator for one outgoing exchange, sending through this peer
    pub fn coordinator<E: Exchange>(&self, exchange: E) -> Arc<ExchangeCoordinator<E>> {
        ExchangeCoordinator::with_default_timeout(
            exchange,
            self.location.clone(),
            self.dispatcher.clone(),
            self.sender.clone(),
            self.config.exchange_timeout(),
        )
    }

    /// Ping every registered device of this peer's user
    ///
    /// Returns the devices that answered within `timeout`, or the
    ///  configured exchange timeout if none is given.
    pub async fn ping_devices(&self, timeout: Option<Duration>) -> Result<Vec<PeerLocation>, PeerError> {
        let recipients = self.directory.get_locations(self.username()).await?;
        let request = super::protocol::Request::new(
            self.location.clone(),
            recipients,
            &Ping::default(),
        )?;

        let coordinator = self.coordinator(PingExchange::new());
        coordinator.send_request(request).await;
        if !coordinator.wait(timeout).await {
            tracing::warn!(
                "ping from {} timed out at {}%",
                self.location,
                coordinator.progress()
            );
        }
        Ok(coordinator.result())
    }
}

/// Feeds inbound frames through the envelope and ships replies back out
struct InboundRouter<S: SecuredStore> {
    envelope: Arc<EncryptionEnvelope<S>>,
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl<S: SecuredStore> InboundHandler for InboundRouter<S> {
    async fn handle_inbound(&self, payload: Vec<u8>) {
        let reply = match self.envelope.receive(&payload).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("dropping inbound message: {}", e);
                return;
            }
        };
        let result = match self.envelope.seal_reply(&reply).await {
            Ok(outbound) => {
                self.transport
                    .send_direct(outbound.address, outbound.payload)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!("failed to send reply to {}: {}", reply.recipient, e);
        }
    }
}
