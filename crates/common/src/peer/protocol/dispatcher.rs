use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::directory::PeerLocation;

use super::messages::{ExchangeId, Message, Payload, Request, Response};

/// Handles one inbound request
///
/// A fresh handler is built by its factory for every request, so
///  implementations may keep per-request state in `self`.
#[async_trait]
pub trait RequestHandler: Send {
    /// Decide whether and what to answer
    ///
    /// `local` is the device handling the request.
    async fn handle(&mut self, request: Request, local: &PeerLocation) -> Option<Response>;
}

/// Builds a [`RequestHandler`] per inbound request
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn RequestHandler> + Send + Sync>;

/// Receiver of the responses to one outgoing exchange
pub trait ResponseSink: Send + Sync {
    fn deliver(&self, response: Response);
}

/// Reply the dispatcher wants sent, and to whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub recipient: PeerLocation,
    pub message: Message,
}

struct PendingSlot {
    sink: Weak<dyn ResponseSink>,
    /// responses still accepted for this exchange
    outstanding: usize,
}

/// Routes inbound messages
///
/// Requests go to a handler picked by payload kind; responses go to the
///  exchange waiting on their exchange id. The dispatcher never performs
///  I/O: one inbound message becomes at most one reply.
pub struct MessageDispatcher {
    local: PeerLocation,
    handlers: RwLock<HashMap<String, HandlerFactory>>,
    pending: Mutex<HashMap<ExchangeId, PendingSlot>>,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("local", &self.local)
            .field("handlers", &self.handlers.read().keys().collect::<Vec<_>>())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl MessageDispatcher {
    pub fn new(local: PeerLocation) -> Self {
        Self {
            local,
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> &PeerLocation {
        &self.local
    }

    /// Route requests carrying payload `P` to handlers built by `factory`
    ///
    /// Registering a kind twice replaces the earlier factory.
    pub fn register_handler<P, F>(&self, factory: F)
    where
        P: Payload,
        F: Fn() -> Box<dyn RequestHandler> + Send + Sync + 'static,
    {
        let previous = self
            .handlers
            .write()
            .insert(P::KIND.to_string(), Arc::new(factory));
        if previous.is_some() {
            tracing::warn!("replaced request handler for payload kind {}", P::KIND);
        }
    }

    /// Expect one more response for `exchange_id`, delivered to `sink`
    ///
    /// Must be called before the matching request leaves this peer.
    pub fn register_pending(&self, exchange_id: ExchangeId, sink: Weak<dyn ResponseSink>) {
        let mut pending = self.pending.lock();
        let slot = pending.entry(exchange_id).or_insert_with(|| PendingSlot {
            sink: sink.clone(),
            outstanding: 0,
        });
        slot.sink = sink;
        slot.outstanding += 1;
    }

    /// Withdraw one expected response, e.g. because its request never left
    pub fn unregister_pending(&self, exchange_id: &ExchangeId) {
        let mut pending = self.pending.lock();
        if let Some(slot) = pending.get_mut(exchange_id) {
            slot.outstanding = slot.outstanding.saturating_sub(1);
            if slot.outstanding == 0 {
                pending.remove(exchange_id);
            }
        }
    }

    /// Forget every response still expected for `exchange_id`
    ///
    /// Returns how many were outstanding.
    pub fn retract_pending(&self, exchange_id: &ExchangeId) -> usize {
        self.pending
            .lock()
            .remove(exchange_id)
            .map(|slot| slot.outstanding)
            .unwrap_or(0)
    }

    /// Number of responses still expected for `exchange_id`
    pub fn pending_responses(&self, exchange_id: &ExchangeId) -> usize {
        self.pending
            .lock()
            .get(exchange_id)
            .map(|slot| slot.outstanding)
            .unwrap_or(0)
    }

    /// Turn one inbound message into zero or one reply
    pub async fn dispatch(&self, message: Message) -> Option<Reply> {
        match message {
            Message::Request(request) => self.dispatch_request(request).await,
            Message::Response(response) => {
                self.dispatch_response(response);
                None
            }
        }
    }

    async fn dispatch_request(&self, request: Request) -> Option<Reply> {
        let factory = self.handlers.read().get(request.kind()).cloned();
        let Some(factory) = factory else {
            tracing::warn!(
                "no handler for payload kind {} from {}, not replying",
                request.kind(),
                request.originating_device
            );
            return None;
        };

        let recipient = request.originating_device.clone();
        let exchange_id = request.exchange_id;
        let mut handler = factory();
        let response = handler.handle(request, &self.local).await?;
        tracing::debug!("replying to {} for exchange {}", recipient, exchange_id);

        Some(Reply {
            recipient,
            message: Message::Response(response),
        })
    }

    fn dispatch_response(&self, response: Response) {
        let sink = {
            let mut pending = self.pending.lock();
            let Some(slot) = pending.get_mut(&response.exchange_id) else {
                tracing::debug!(
                    "dropping response from {} for unknown exchange {}",
                    response.responding_device,
                    response.exchange_id
                );
                return;
            };
            slot.outstanding -= 1;
            let sink = slot.sink.clone();
            if slot.outstanding == 0 {
                pending.remove(&response.exchange_id);
            }
            sink
        };

        match sink.upgrade() {
            Some(sink) => sink.deliver(response),
            None => tracing::debug!(
                "exchange {} went away before its response arrived",
                response.exchange_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DeviceId;
    use crate::peer::protocol::messages::{Ping, Pong};

    fn location(username: &str, addr: &str) -> PeerLocation {
        PeerLocation::new(username, DeviceId::generate(), addr.parse().unwrap())
    }

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&mut self, request: Request, local: &PeerLocation) -> Option<Response> {
            let ping: Ping = request.decode().ok()?;
            Response::reply(&request, local, &Pong { note: ping.note }).ok()
        }
    }

    #[derive(Default)]
    struct Collector {
        received: Mutex<Vec<Response>>,
    }

    impl ResponseSink for Collector {
        fn deliver(&self, response: Response) {
            self.received.lock().push(response);
        }
    }

    fn sink(collector: &Arc<Collector>) -> Weak<dyn ResponseSink> {
        let weak: Weak<Collector> = Arc::downgrade(collector);
        weak
    }

    #[tokio::test]
    async fn test_request_goes_to_registered_handler() {
        let local = location("alice", "10.0.0.2:4002");
        let origin = location("alice", "10.0.0.1:4001");
        let dispatcher = MessageDispatcher::new(local.clone());
        dispatcher.register_handler::<Ping, _>(|| Box::new(EchoHandler));

        let request = Request::new(
            origin.clone(),
            vec![local.clone()],
            &Ping {
                note: "hi".to_string(),
            },
        )
        .unwrap();
        let reply = dispatcher
            .dispatch(Message::Request(request.clone()))
            .await
            .unwrap();

        assert_eq!(reply.recipient, origin);
        let Message::Response(response) = reply.message else {
            panic!("expected a response");
        };
        assert_eq!(response.exchange_id, request.exchange_id);
        assert_eq!(response.decode::<Pong>().unwrap().note, "hi");
    }

    #[tokio::test]
    async fn test_unknown_kind_gets_no_reply() {
        let dispatcher = MessageDispatcher::new(location("alice", "10.0.0.2:4002"));
        let request = Request::new(
            location("bob", "10.0.0.9:4009"),
            vec![],
            &Ping::default(),
        )
        .unwrap();

        assert!(dispatcher.dispatch(Message::Request(request)).await.is_none());
    }

    #[tokio::test]
    async fn test_response_delivered_once_per_slot() {
        let local = location("alice", "10.0.0.1:4001");
        let dispatcher = MessageDispatcher::new(local.clone());
        let collector = Arc::new(Collector::default());

        let request = Request::new(local.clone(), vec![], &Ping::default()).unwrap();
        dispatcher.register_pending(request.exchange_id, sink(&collector));
        assert_eq!(dispatcher.pending_responses(&request.exchange_id), 1);

        let responder = location("alice", "10.0.0.2:4002");
        let response = Response::reply(&request, &responder, &Pong::default()).unwrap();

        dispatcher
            .dispatch(Message::Response(response.clone()))
            .await;
        // a duplicate finds no slot left
        dispatcher.dispatch(Message::Response(response)).await;

        assert_eq!(collector.received.lock().len(), 1);
        assert_eq!(dispatcher.pending_responses(&request.exchange_id), 0);
    }

    #[tokio::test]
    async fn test_unregister_pending() {
        let local = location("alice", "10.0.0.1:4001");
        let dispatcher = MessageDispatcher::new(local.clone());
        let collector = Arc::new(Collector::default());
        let request = Request::new(local, vec![], &Ping::default()).unwrap();

        dispatcher.register_pending(request.exchange_id, sink(&collector));
        dispatcher.register_pending(request.exchange_id, sink(&collector));
        dispatcher.unregister_pending(&request.exchange_id);
        assert_eq!(dispatcher.pending_responses(&request.exchange_id), 1);

        dispatcher.unregister_pending(&request.exchange_id);
        assert_eq!(dispatcher.pending_responses(&request.exchange_id), 0);
    }

    #[tokio::test]
    async fn test_retract_pending() {
        let local = location("alice", "10.0.0.1:4001");
        let dispatcher = MessageDispatcher::new(local.clone());
        let collector = Arc::new(Collector::default());
        let request = Request::new(local.clone(), vec![], &Ping::default()).unwrap();

        dispatcher.register_pending(request.exchange_id, sink(&collector));
        dispatcher.register_pending(request.exchange_id, sink(&collector));
        assert_eq!(dispatcher.retract_pending(&request.exchange_id), 2);
        assert_eq!(dispatcher.retract_pending(&request.exchange_id), 0);

        let response = Response::reply(&request, &local, &Pong::default()).unwrap();
        dispatcher.dispatch(Message::Response(response)).await;
        assert!(collector.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_exchange_is_not_kept_alive() {
        let local = location("alice", "10.0.0.1:4001");
        let dispatcher = MessageDispatcher::new(local.clone());
        let collector = Arc::new(Collector::default());
        let request = Request::new(local.clone(), vec![], &Ping::default()).unwrap();

        dispatcher.register_pending(request.exchange_id, sink(&collector));
        drop(collector);

        let response = Response::reply(&request, &local, &Pong::default()).unwrap();
        // nothing to deliver to, and nothing panics
        assert!(dispatcher
            .dispatch(Message::Response(response))
            .await
            .is_none());
    }
}
