use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::directory::PeerLocation;

use super::protocol::Message;

/// A direct send that did not reach its destination
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no peer reachable at {0}")]
    Unreachable(SocketAddr),
    #[error("connection to {0} failed: {1}")]
    Connection(SocketAddr, String),
    /// The message could not be prepared for sending
    #[error("failed to prepare message for {0}: {1}")]
    Prepare(SocketAddr, String),
}

/// Receives every payload the transport delivers to this peer
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_inbound(&self, payload: Vec<u8>);
}

/// Direct peer-to-peer delivery provided by the overlay
///
/// A send resolves once the transport has either handed the payload over
///  or given up; the `Err` carries the failure reason.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send_direct(&self, address: SocketAddr, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Install the handler for inbound payloads; called once at peer startup
    fn register_inbound_handler(&self, handler: Arc<dyn InboundHandler>);

    fn local_address(&self) -> SocketAddr;
}

/// Sends one protocol message to one device
///
/// Sits between exchanges and the transport so encryption can be applied
///  per recipient.
#[async_trait]
pub trait MessageSender: Send + Sync + Debug {
    async fn send_message(
        &self,
        recipient: &PeerLocation,
        message: &Message,
    ) -> Result<(), TransportError>;
}
