//! Outgoing multi-peer exchanges
//!
//! One [`ExchangeCoordinator`] drives one request through
//!  `Idle -> Sending -> AwaitingResponses -> Completed`:
//!
//! 1. every recipient other than the local device gets a pending slot in
//!    the dispatcher, then the request is sent to all of them at once
//! 2. failed sends give their slot back and are otherwise ignored
//! 3. the countdown starts at the number of devices actually notified
//! 4. each routed response ticks it down; at zero the exchange is complete
//!
//! There is no failed state. An exchange whose sends all failed expects
//!  nothing and completes immediately.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::DEFAULT_EXCHANGE_TIMEOUT_SECS;
use crate::directory::PeerLocation;
use crate::peer::transport::MessageSender;

use super::dispatcher::{MessageDispatcher, ResponseSink};
use super::messages::{ExchangeId, Message, Request, Response};

/// What an exchange does with its responses
pub trait Exchange: Send + Sync + 'static {
    type Output;

    /// Called once per routed response, in arrival order
    fn on_response(&self, response: &Response);

    /// Current result; may be asked for before the exchange completes
    fn result(&self) -> Self::Output;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    AwaitingResponses,
    Completed,
}

#[derive(Debug, Default)]
struct Countdown {
    started: bool,
    notified: usize,
    /// responses routed so far, including any that beat the countdown
    received: usize,
    /// `None` until every send has resolved
    remaining: Option<usize>,
    exchange_id: Option<ExchangeId>,
}

impl Countdown {
    fn state(&self) -> ExchangeState {
        match (self.started, self.remaining) {
            (false, _) => ExchangeState::Idle,
            (true, None) => ExchangeState::Sending,
            (true, Some(0)) => ExchangeState::Completed,
            (true, Some(_)) => ExchangeState::AwaitingResponses,
        }
    }
}

pub struct ExchangeCoordinator<E: Exchange> {
    exchange: E,
    local: PeerLocation,
    dispatcher: Arc<MessageDispatcher>,
    sender: Arc<dyn MessageSender>,
    countdown: Mutex<Countdown>,
    completed: watch::Sender<bool>,
    default_timeout: Duration,
    this: Weak<Self>,
}

impl<E: Exchange> std::fmt::Debug for ExchangeCoordinator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeCoordinator")
            .field("local", &self.local)
            .field("sender", &self.sender)
            .field("countdown", &*self.countdown.lock())
            .finish()
    }
}

impl<E: Exchange> ExchangeCoordinator<E> {
    pub fn new(
        exchange: E,
        local: PeerLocation,
        dispatcher: Arc<MessageDispatcher>,
        sender: Arc<dyn MessageSender>,
    ) -> Arc<Self> {
        Self::with_default_timeout(
            exchange,
            local,
            dispatcher,
            sender,
            Duration::from_secs(DEFAULT_EXCHANGE_TIMEOUT_SECS),
        )
    }

    /// Replace the ceiling used by [`Self::wait`] when no timeout is given
    pub fn with_default_timeout(
        exchange: E,
        local: PeerLocation,
        dispatcher: Arc<MessageDispatcher>,
        sender: Arc<dyn MessageSender>,
        default_timeout: Duration,
    ) -> Arc<Self> {
        let (completed, _) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            exchange,
            local,
            dispatcher,
            sender,
            countdown: Mutex::new(Countdown::default()),
            completed,
            default_timeout,
            this: this.clone(),
        })
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Send `request` to every recipient except the local device
    ///
    /// Returns once every send has resolved. Per-recipient failures are
    ///  logged and skipped; they never fail the exchange.
    pub async fn send_request(&self, request: Request) {
        let exchange_id = request.exchange_id;
        {
            let mut countdown = self.countdown.lock();
            if countdown.started {
                tracing::warn!(
                    "exchange {:?} already sent, ignoring request {}",
                    countdown.exchange_id,
                    exchange_id
                );
                return;
            }
            countdown.started = true;
            countdown.exchange_id = Some(exchange_id);
        }

        let targets: Vec<PeerLocation> = request
            .recipients
            .iter()
            .filter(|recipient| recipient.address != self.local.address)
            .cloned()
            .collect();

        let sink: Weak<dyn ResponseSink> = self.this.clone();
        for _ in &targets {
            self.dispatcher.register_pending(exchange_id, sink.clone());
        }

        let message = Message::Request(request);
        let results = join_all(
            targets
                .iter()
                .map(|target| self.sender.send_message(target, &message)),
        )
        .await;

        let mut notified = 0;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => notified += 1,
                Err(e) => {
                    tracing::warn!(
                        "exchange {}: failed to notify {}: {}",
                        exchange_id,
                        target,
                        e
                    );
                    self.dispatcher.unregister_pending(&exchange_id);
                }
            }
        }

        let done = {
            let mut countdown = self.countdown.lock();
            countdown.notified = notified;
            let remaining = notified.saturating_sub(countdown.received);
            countdown.remaining = Some(remaining);
            remaining == 0
        };
        tracing::debug!(
            "exchange {}: notified {} of {} recipient(s)",
            exchange_id,
            notified,
            targets.len()
        );
        if done {
            self.completed.send_replace(true);
        }
    }

    /// Wait for completion, at most `timeout` or the default ceiling
    ///
    /// Returns whether the exchange completed. Timing out cancels nothing.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut completed = self.completed.subscribe();
        let signalled = matches!(
            tokio::time::timeout(timeout, completed.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        signalled || self.is_completed()
    }

    pub fn is_completed(&self) -> bool {
        self.countdown.lock().remaining == Some(0)
    }

    pub fn state(&self) -> ExchangeState {
        self.countdown.lock().state()
    }

    /// Percentage of notified recipients that have answered
    pub fn progress(&self) -> u8 {
        let countdown = self.countdown.lock();
        match (countdown.started, countdown.remaining) {
            (false, _) | (true, None) => 0,
            (true, Some(_)) if countdown.notified == 0 => 100,
            (true, Some(remaining)) => {
                let answered = (countdown.notified - remaining) as f64;
                (100.0 * answered / countdown.notified as f64).round() as u8
            }
        }
    }

    pub fn result(&self) -> E::Output {
        self.exchange.result()
    }
}

impl<E: Exchange> Drop for ExchangeCoordinator<E> {
    fn drop(&mut self) {
        if let Some(exchange_id) = self.countdown.get_mut().exchange_id {
            let retracted = self.dispatcher.retract_pending(&exchange_id);
            if retracted > 0 {
                tracing::debug!(
                    "exchange {} dropped with {} response(s) outstanding",
                    exchange_id,
                    retracted
                );
            }
        }
    }
}

impl<E: Exchange> ResponseSink for ExchangeCoordinator<E> {
    fn deliver(&self, response: Response) {
        self.exchange.on_response(&response);

        let done = {
            let mut countdown = self.countdown.lock();
            countdown.received += 1;
            match countdown.remaining {
                // clamp: surplus responses never push the countdown below zero
                Some(remaining) if remaining > 0 => {
                    countdown.remaining = Some(remaining - 1);
                    remaining == 1
                }
                Some(_) => {
                    tracing::debug!(
                        "exchange {}: surplus response from {}",
                        response.exchange_id,
                        response.responding_device
                    );
                    false
                }
                None => false,
            }
        };
        if done {
            tracing::debug!("exchange {} completed", response.exchange_id);
            self.completed.send_replace(true);
        }
    }
}
