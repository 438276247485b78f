/// Broker router: drains the notification queue into live sessions
///
/// Architecture:
/// 1. DeliverySource: one consumed queue (AMQP in production, in-memory in tests)
/// 2. BrokerRouter::route: routing key -> uid -> registry snapshot -> enqueue
/// 3. BrokerRouter::consume: strictly one delivery at a time, acked once each
/// 4. BrokerRouter::run: reconnects with backoff when the broker goes away
///
/// Delivery is best-effort. A notification for a user with no live session is
/// acknowledged and dropped; the broker queue is not a per-user mailbox.
use crate::websocket::{ConnectionRegistry, SendError, Uid};
use async_trait::async_trait;
use bytes::Bytes;
use resilience::{Backoff, RetryConfig};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod amqp;
pub mod routing;

pub use amqp::{AmqpConnector, AmqpSource};
pub use routing::{parse_routing_key, routing_key_for};

/// One message consumed from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerDelivery {
    pub routing_key: String,
    pub body: Bytes,
    pub delivery_tag: u64,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("broker topology declaration failed: {0}")]
    Declare(String),

    #[error("broker consume failed: {0}")]
    Consume(String),

    #[error("broker ack failed for delivery {tag}: {reason}")]
    Ack { tag: u64, reason: String },
}

/// A stream of deliveries that must each be acknowledged
#[async_trait]
pub trait DeliverySource: Send {
    /// Next delivery; `None` when the broker closed the consumer
    async fn next_delivery(&mut self) -> Option<Result<BrokerDelivery, BrokerError>>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError>;
}

/// Opens fresh delivery sources, used for reconnects
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Source: DeliverySource;

    async fn connect(&self) -> Result<Self::Source, BrokerError>;
}

/// Health of the broker consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStatus {
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Routing key did not name a user
    Unroutable,
    /// User has no live session
    NoRecipients { uid: Uid },
    /// Fan-out attempted; stalled or closed sessions were evicted
    Delivered {
        uid: Uid,
        delivered: usize,
        evicted: usize,
    },
}

/// Why `consume` returned without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeEnd {
    Shutdown,
    SourceClosed,
}

pub struct BrokerRouter {
    registry: ConnectionRegistry,
    status: watch::Sender<BrokerStatus>,
    reconnect: RetryConfig,
}

impl BrokerRouter {
    pub fn new(registry: ConnectionRegistry) -> Self {
        let (status, _) = watch::channel(BrokerStatus::Connecting);
        Self {
            registry,
            status,
            reconnect: resilience::broker_reconnect_config(),
        }
    }

    /// Override the reconnect schedule
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Subscribe to consumer health changes
    pub fn status(&self) -> watch::Receiver<BrokerStatus> {
        self.status.subscribe()
    }

    /// Fan one delivery out to every live session of its addressee
    ///
    /// Never waits on a client: payloads are enqueued without blocking and a
    /// session whose queue is full is unregistered and evicted. One failing
    /// session does not affect delivery to the others.
    pub async fn route(&self, delivery: &BrokerDelivery) -> RouteOutcome {
        let Some(uid) = routing::parse_routing_key(&delivery.routing_key) else {
            warn!(
                routing_key = %delivery.routing_key,
                delivery_tag = delivery.delivery_tag,
                "discarding delivery with unroutable key"
            );
            return RouteOutcome::Unroutable;
        };

        let sessions = self.registry.lookup(uid).await;
        if sessions.is_empty() {
            debug!(uid, delivery_tag = delivery.delivery_tag, "no live session, dropping");
            return RouteOutcome::NoRecipients { uid };
        }

        let mut delivered = 0;
        let mut evicted = 0;

        for session in &sessions {
            match session.send(delivery.body.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    match e {
                        SendError::Full => {
                            warn!(uid, session_id = %session.id(), "session not keeping up, evicting")
                        }
                        SendError::Closed => {
                            debug!(uid, session_id = %session.id(), "session already closed")
                        }
                    }
                    self.registry.unregister(session).await;
                    session.evict();
                    evicted += 1;
                }
            }
        }

        RouteOutcome::Delivered {
            uid,
            delivered,
            evicted,
        }
    }

    /// Process deliveries one at a time until shutdown or source failure
    ///
    /// Every delivery taken from the source is acknowledged exactly once,
    /// whatever its routing outcome.
    pub async fn consume<S: DeliverySource>(
        &self,
        source: &mut S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ConsumeEnd, BrokerError> {
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown_requested(shutdown) => return Ok(ConsumeEnd::Shutdown),
                next = source.next_delivery() => next,
            };

            let delivery = match next {
                None => return Ok(ConsumeEnd::SourceClosed),
                Some(Err(e)) => return Err(e),
                Some(Ok(delivery)) => delivery,
            };

            let outcome = self.route(&delivery).await;
            source.ack(delivery.delivery_tag).await?;

            debug!(
                delivery_tag = delivery.delivery_tag,
                ?outcome,
                "delivery processed"
            );
        }
    }

    /// Consume for the life of the process
    ///
    /// `initial` comes from the startup connection, whose failure is fatal to
    /// the caller. Later losses are retried with backoff and reported through
    /// `status()` until shutdown is signalled.
    pub async fn run<C: BrokerConnector>(
        self,
        connector: C,
        initial: C::Source,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut source = initial;
        let mut backoff = Backoff::new(self.reconnect.clone());

        loop {
            self.status.send_replace(BrokerStatus::Connected);
            backoff.reset();

            match self.consume(&mut source, &mut shutdown).await {
                Ok(ConsumeEnd::Shutdown) => break,
                Ok(ConsumeEnd::SourceClosed) => warn!("broker closed the consumer, reconnecting"),
                Err(e) => warn!(error = %e, "broker consumption failed, reconnecting"),
            }

            self.status.send_replace(BrokerStatus::Reconnecting);

            match self.reconnect(&connector, &mut backoff, &mut shutdown).await {
                Some(next) => source = next,
                None => break,
            }
        }

        self.status.send_replace(BrokerStatus::Stopped);
        info!("broker router stopped");
    }

    async fn reconnect<C: BrokerConnector>(
        &self,
        connector: &C,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<C::Source> {
        loop {
            let Some(delay) = backoff.next_delay() else {
                warn!(attempts = backoff.attempt(), "giving up on broker reconnect");
                return None;
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown_requested(shutdown) => return None,
            }

            match connector.connect().await {
                Ok(source) => {
                    info!(attempt = backoff.attempt(), "broker reconnected");
                    return Some(source);
                }
                Err(e) => {
                    warn!(attempt = backoff.attempt(), error = %e, "broker reconnect failed");
                }
            }
        }
    }
}

/// Resolves once shutdown is signalled or the signal sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
