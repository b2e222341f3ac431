use async_trait::async_trait;
use parking_lot::Mutex;

use crate::directory::PeerLocation;

use super::dispatcher::RequestHandler;
use super::exchange::Exchange;
use super::messages::{Ping, Pong, Request, Response};

/// Answers every ping with a pong echoing its note
#[derive(Debug, Default)]
pub struct PingHandler;

#[async_trait]
impl RequestHandler for PingHandler {
    async fn handle(&mut self, request: Request, local: &PeerLocation) -> Option<Response> {
        let ping: Ping = match request.decode() {
            Ok(ping) => ping,
            Err(e) => {
                tracing::warn!(
                    "malformed ping from {}: {}",
                    request.originating_device,
                    e
                );
                return None;
            }
        };
        tracing::debug!("pong to {}", request.originating_device);
        Response::reply(&request, local, &Pong { note: ping.note }).ok()
    }
}

/// Collects the devices that answered a ping
#[derive(Debug, Default)]
pub struct PingExchange {
    responders: Mutex<Vec<PeerLocation>>,
}

impl PingExchange {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Exchange for PingExchange {
    type Output = Vec<PeerLocation>;

    fn on_response(&self, response: &Response) {
        if response.decode::<Pong>().is_err() {
            tracing::warn!(
                "ignoring non-pong answer from {} to exchange {}",
                response.responding_device,
                response.exchange_id
            );
            return;
        }
        let mut responders = self.responders.lock();
        if !responders.contains(&response.responding_device) {
            responders.push(response.responding_device.clone());
        }
    }

    fn result(&self) -> Vec<PeerLocation> {
        self.responders.lock().clone()
    }
}
