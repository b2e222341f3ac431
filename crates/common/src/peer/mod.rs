mod peer;
pub mod protocol;
mod transport;

pub use peer::{Peer, PeerBuilder, PeerError};
pub use protocol::{
    EncryptionEnvelope, EnvelopeError, Exchange, ExchangeCoordinator, ExchangeState,
    MessageDispatcher, Payload, PingExchange, PingHandler, Request, RequestHandler, Response,
};
pub use transport::{InboundHandler, MessageSender, Transport, TransportError};
