//! Request/response exchanges between devices
//!
//! An inbound frame travels
//!  transport -> [`EncryptionEnvelope`] -> [`MessageDispatcher`] -> handler,
//!  and any reply travels the same way back out. Outgoing exchanges are
//!  driven by an [`ExchangeCoordinator`], which registers itself with the
//!  dispatcher so responses find their way back to it.

mod dispatcher;
mod envelope;
mod exchange;
mod messages;
mod ping;

pub use dispatcher::{HandlerFactory, MessageDispatcher, Reply, RequestHandler, ResponseSink};
pub use envelope::{EncryptionEnvelope, EnvelopeError, Outbound, SealedSender};
pub use exchange::{Exchange, ExchangeCoordinator, ExchangeState};
pub use messages::{
    Body, EncryptedEnvelope, ExchangeId, Frame, Message, Payload, Ping, Pong, Request, Response,
};
pub use ping::{PingExchange, PingHandler};
