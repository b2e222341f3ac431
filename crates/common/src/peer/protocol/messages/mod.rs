use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::PeerLocation;

mod ping;

pub use ping::{Ping, Pong};

/// Correlates one outgoing request with the responses it produces
pub type ExchangeId = Uuid;

/// An application-defined request or response body
///
/// `KIND` is the discriminant the dispatcher routes on; it must be unique
///  per payload type across the application.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
}

/// Body of a message, tagged with its payload kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub kind: String,
    pub data: Vec<u8>,
}

impl Body {
    pub fn encode<P: Payload>(payload: &P) -> Result<Self, bincode::Error> {
        Ok(Self {
            kind: P::KIND.to_string(),
            data: bincode::serialize(payload)?,
        })
    }

    /// Decode the body as `P`, failing if the kind does not match
    pub fn decode<P: Payload>(&self) -> Result<P, bincode::Error> {
        if self.kind != P::KIND {
            return Err(Box::new(bincode::ErrorKind::Custom(format!(
                "payload kind mismatch: expected {}, got {}",
                P::KIND,
                self.kind
            ))));
        }
        bincode::deserialize(&self.data)
    }
}

/// Request fanned out to a set of devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub exchange_id: ExchangeId,
    pub originating_device: PeerLocation,
    pub recipients: Vec<PeerLocation>,
    pub body: Body,
}

impl Request {
    /// Build a request with a fresh exchange id
    pub fn new<P: Payload>(
        originating_device: PeerLocation,
        recipients: Vec<PeerLocation>,
        payload: &P,
    ) -> Result<Self, bincode::Error> {
        Ok(Self {
            exchange_id: Uuid::new_v4(),
            originating_device,
            recipients,
            body: Body::encode(payload)?,
        })
    }

    pub fn kind(&self) -> &str {
        &self.body.kind
    }

    pub fn decode<P: Payload>(&self) -> Result<P, bincode::Error> {
        self.body.decode()
    }
}

/// Answer from one recipient of a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub exchange_id: ExchangeId,
    pub responding_device: PeerLocation,
    pub destination_address: SocketAddr,
    pub body: Body,
}

impl Response {
    /// Build the answer `responder` sends back for `request`
    pub fn reply<P: Payload>(
        request: &Request,
        responder: &PeerLocation,
        payload: &P,
    ) -> Result<Self, bincode::Error> {
        Ok(Self {
            exchange_id: request.exchange_id,
            responding_device: responder.clone(),
            destination_address: request.originating_device.address,
            body: Body::encode(payload)?,
        })
    }

    pub fn kind(&self) -> &str {
        &self.body.kind
    }

    pub fn decode<P: Payload>(&self) -> Result<P, bincode::Error> {
        self.body.decode()
    }
}

/// Messages routed by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            Message::Request(request) => request.exchange_id,
            Message::Response(response) => response.exchange_id,
        }
    }
}

/// Hybrid-encrypted [`Message`]
///
/// `encrypted_key` opens, with the recipient's secret key, to
///  `iv (16) || session key`; the session key decrypts `encrypted_payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Reserved; empty in envelopes produced by this crate
    pub signature: Vec<u8>,
    pub encrypted_key: Vec<u8>,
    pub encrypted_payload: Vec<u8>,
}

/// Top-level unit carried by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Passed straight to the dispatcher
    Plain(Message),
    /// Opened first, then dispatched
    Sealed(EncryptedEnvelope),
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
