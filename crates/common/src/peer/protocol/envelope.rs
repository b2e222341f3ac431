use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::{generate_iv, CryptoError, CryptoSuite, SecretKey, SymmetricKey, IV_SIZE};
use crate::directory::{DirectoryError, IdentityDirectory, PeerLocation};
use crate::peer::transport::{MessageSender, Transport, TransportError};
use crate::store::SecuredStore;

use super::dispatcher::{MessageDispatcher, Reply};
use super::messages::{EncryptedEnvelope, Frame, Message};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("frame codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
    /// No public key is published for the user a message is addressed to
    #[error("no public key published for user {0}")]
    UnknownRecipient(String),
}

/// An encoded frame ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub address: SocketAddr,
    pub payload: Vec<u8>,
}

/// Hybrid encryption around a [`MessageDispatcher`]
///
/// Sealed frames are opened with the local secret key before dispatch;
///  plain frames are dispatched as they are. Replies always leave sealed
///  to the public key the recipient's user published in the directory.
#[derive(Debug)]
pub struct EncryptionEnvelope<S: SecuredStore> {
    dispatcher: Arc<MessageDispatcher>,
    directory: IdentityDirectory<S>,
    secret_key: SecretKey,
    crypto: CryptoSuite,
}

impl<S: SecuredStore> EncryptionEnvelope<S> {
    pub fn new(
        dispatcher: Arc<MessageDispatcher>,
        directory: IdentityDirectory<S>,
        secret_key: SecretKey,
        crypto: CryptoSuite,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            secret_key,
            crypto,
        }
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    /// Handle one inbound frame
    ///
    /// # Returns
    /// * `Ok(Some(outbound))` - A sealed reply to send
    /// * `Ok(None)` - Nothing to send back
    /// * `Err(EnvelopeError)` - The frame could not be opened, or the reply
    ///   could not be sealed; either way only this message is lost
    pub async fn handle_inbound(&self, bytes: &[u8]) -> Result<Option<Outbound>, EnvelopeError> {
        let Some(reply) = self.receive(bytes).await? else {
            return Ok(None);
        };
        let payload = self.seal(&reply.recipient.username, &reply.message).await?;
        Ok(Some(Outbound {
            address: reply.recipient.address,
            payload,
        }))
    }

    /// Open and dispatch one inbound frame, returning the plain reply
    pub async fn receive(&self, bytes: &[u8]) -> Result<Option<Reply>, EnvelopeError> {
        let message = match Frame::from_bytes(bytes)? {
            Frame::Plain(message) => message,
            Frame::Sealed(envelope) => self.open(&envelope)?,
        };
        Ok(self.dispatcher.dispatch(message).await)
    }

    /// Seal a reply for its recipient
    ///
    /// A reply that cannot be sealed never leaves, so the failure is a
    ///  send failure towards the recipient.
    pub async fn seal_reply(&self, reply: &Reply) -> Result<Outbound, TransportError> {
        let payload = self
            .seal(&reply.recipient.username, &reply.message)
            .await
            .map_err(|e| TransportError::Prepare(reply.recipient.address, e.to_string()))?;
        Ok(Outbound {
            address: reply.recipient.address,
            payload,
        })
    }

    /// Seal `message` for `username` and encode it as a frame
    pub async fn seal(&self, username: &str, message: &Message) -> Result<Vec<u8>, EnvelopeError> {
        let public_key = self
            .directory
            .get_public_key(username)
            .await?
            .ok_or_else(|| EnvelopeError::UnknownRecipient(username.to_string()))?;

        let session_key = self.crypto.generate_key();
        let iv = generate_iv()?;
        let encrypted_payload =
            self.crypto
                .encrypt(&session_key, Some(&iv), &bincode::serialize(message)?)?;

        let mut key_blob = Vec::with_capacity(IV_SIZE + session_key.bytes().len());
        key_blob.extend_from_slice(&iv);
        key_blob.extend_from_slice(session_key.bytes());
        let encrypted_key = public_key.seal(&key_blob)?;

        let frame = Frame::Sealed(EncryptedEnvelope {
            signature: Vec::new(),
            encrypted_key,
            encrypted_payload,
        });
        Ok(frame.to_bytes()?)
    }

    /// Recover the message inside an envelope sealed for this peer
    pub fn open(&self, envelope: &EncryptedEnvelope) -> Result<Message, EnvelopeError> {
        let key_blob = self.secret_key.open(&envelope.encrypted_key)?;
        if key_blob.len() <= IV_SIZE {
            return Err(CryptoError::from(anyhow::anyhow!("key blob too short")).into());
        }
        let (iv_bytes, key_bytes) = key_blob.split_at(IV_SIZE);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(iv_bytes);
        let session_key = SymmetricKey::from_slice(key_bytes)?;

        let plaintext = self
            .crypto
            .decrypt(&session_key, Some(&iv), &envelope.encrypted_payload)?;
        Ok(bincode::deserialize(&plaintext)?)
    }
}

/// [`MessageSender`] that seals every message before handing it to the
///  transport
#[derive(Debug)]
pub struct SealedSender<S: SecuredStore> {
    envelope: Arc<EncryptionEnvelope<S>>,
    transport: Arc<dyn Transport>,
}

impl<S: SecuredStore> SealedSender<S> {
    pub fn new(envelope: Arc<EncryptionEnvelope<S>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            envelope,
            transport,
        }
    }
}

#[async_trait]
impl<S: SecuredStore> MessageSender for SealedSender<S> {
    async fn send_message(
        &self,
        recipient: &PeerLocation,
        message: &Message,
    ) -> Result<(), TransportError> {
        let payload = self
            .envelope
            .seal(&recipient.username, message)
            .await
            .map_err(|e| TransportError::Prepare(recipient.address, e.to_string()))?;
        self.transport.send_direct(recipient.address, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DeviceId;
    use crate::peer::protocol::dispatcher::RequestHandler;
    use crate::peer::protocol::messages::{Ping, Pong, Request, Response};
    use crate::store::{MemoryStore, MemoryStoreClient};

    struct PongHandler;

    #[async_trait]
    impl RequestHandler for PongHandler {
        async fn handle(&mut self, request: Request, local: &PeerLocation) -> Option<Response> {
            Response::reply(&request, local, &Pong::default()).ok()
        }
    }

    struct Side {
        location: PeerLocation,
        envelope: EncryptionEnvelope<MemoryStoreClient>,
    }

    async fn side(store: &MemoryStore, username: &str, addr: &str) -> Side {
        let key = SecretKey::generate();
        let location = PeerLocation::new(username, DeviceId::generate(), addr.parse().unwrap());
        let directory = IdentityDirectory::new(store.client(key.clone()), CryptoSuite::default());
        directory
            .add_public_key(username, &key.public())
            .await
            .unwrap();
        let dispatcher = Arc::new(MessageDispatcher::new(location.clone()));
        Side {
            location,
            envelope: EncryptionEnvelope::new(dispatcher, directory, key, CryptoSuite::default()),
        }
    }

    #[tokio::test]
    async fn test_seal_open_roundtrip() {
        let store = MemoryStore::new();
        let alice = side(&store, "alice", "10.0.0.1:4001").await;
        let bob = side(&store, "bob", "10.0.0.2:4002").await;

        let request = Request::new(
            alice.location.clone(),
            vec![bob.location.clone()],
            &Ping {
                note: "ünïcödé ✓".to_string(),
            },
        )
        .unwrap();
        let message = Message::Request(request);

        let bytes = alice.envelope.seal("bob", &message).await.unwrap();
        let Frame::Sealed(envelope) = Frame::from_bytes(&bytes).unwrap() else {
            panic!("expected a sealed frame");
        };
        assert!(envelope.signature.is_empty());

        assert_eq!(bob.envelope.open(&envelope).unwrap(), message);
        // only bob can open it
        assert!(alice.envelope.open(&envelope).is_err());
    }

    #[tokio::test]
    async fn test_sealed_request_gets_sealed_reply() {
        let store = MemoryStore::new();
        let alice = side(&store, "alice", "10.0.0.1:4001").await;
        let bob = side(&store, "bob", "10.0.0.2:4002").await;
        bob.envelope
            .dispatcher()
            .register_handler::<Ping, _>(|| Box::new(PongHandler));

        let request = Request::new(
            alice.location.clone(),
            vec![bob.location.clone()],
            &Ping::default(),
        )
        .unwrap();
        let bytes = alice
            .envelope
            .seal("bob", &Message::Request(request.clone()))
            .await
            .unwrap();

        let outbound = bob.envelope.handle_inbound(&bytes).await.unwrap().unwrap();
        assert_eq!(outbound.address, alice.location.address);

        let Frame::Sealed(envelope) = Frame::from_bytes(&outbound.payload).unwrap() else {
            panic!("expected a sealed reply");
        };
        let Message::Response(response) = alice.envelope.open(&envelope).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.exchange_id, request.exchange_id);
        assert_eq!(response.responding_device, bob.location);
    }

    #[tokio::test]
    async fn test_plain_frame_passes_through() {
        let store = MemoryStore::new();
        let alice = side(&store, "alice", "10.0.0.1:4001").await;
        let bob = side(&store, "bob", "10.0.0.2:4002").await;
        bob.envelope
            .dispatcher()
            .register_handler::<Ping, _>(|| Box::new(PongHandler));

        let request = Request::new(alice.location.clone(), vec![], &Ping::default()).unwrap();
        let bytes = Frame::Plain(Message::Request(request)).to_bytes().unwrap();

        let outbound = bob.envelope.handle_inbound(&bytes).await.unwrap();
        assert!(outbound.is_some());
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_silent() {
        let store = MemoryStore::new();
        let alice = side(&store, "alice", "10.0.0.1:4001").await;
        let bob = side(&store, "bob", "10.0.0.2:4002").await;

        let request = Request::new(alice.location.clone(), vec![], &Ping::default()).unwrap();
        let bytes = alice
            .envelope
            .seal("bob", &Message::Request(request))
            .await
            .unwrap();

        assert!(bob.envelope.handle_inbound(&bytes).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_to_unknown_user_fails_only_the_reply() {
        let store = MemoryStore::new();
        let bob = side(&store, "bob", "10.0.0.2:4002").await;
        bob.envelope
            .dispatcher()
            .register_handler::<Ping, _>(|| Box::new(PongHandler));

        let stranger = PeerLocation::new(
            "carol",
            DeviceId::generate(),
            "10.0.0.3:4003".parse().unwrap(),
        );
        let request = Request::new(stranger, vec![], &Ping::default()).unwrap();
        let bytes = Frame::Plain(Message::Request(request)).to_bytes().unwrap();

        let result = bob.envelope.handle_inbound(&bytes).await;
        assert!(matches!(result, Err(EnvelopeError::UnknownRecipient(_))));
    }

    #[tokio::test]
    async fn test_unsealable_reply_is_a_send_failure() {
        let store = MemoryStore::new();
        let bob = side(&store, "bob", "10.0.0.2:4002").await;
        bob.envelope
            .dispatcher()
            .register_handler::<Ping, _>(|| Box::new(PongHandler));

        let stranger = PeerLocation::new(
            "carol",
            DeviceId::generate(),
            "10.0.0.3:4003".parse().unwrap(),
        );
        let request = Request::new(stranger.clone(), vec![], &Ping::default()).unwrap();
        let bytes = Frame::Plain(Message::Request(request)).to_bytes().unwrap();

        // the request itself opens and dispatches fine
        let reply = bob.envelope.receive(&bytes).await.unwrap().unwrap();
        assert_eq!(reply.recipient, stranger);

        let result = bob.envelope.seal_reply(&reply).await;
        assert!(matches!(
            result,
            Err(TransportError::Prepare(address, _)) if address == stranger.address
        ));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_rejected() {
        let store = MemoryStore::new();
        let bob = side(&store, "bob", "10.0.0.2:4002").await;

        assert!(bob.envelope.handle_inbound(&[0xff; 7]).await.is_err());
    }
}
