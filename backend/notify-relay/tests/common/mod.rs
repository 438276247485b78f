//! In-memory broker and transport doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use notify_relay::auth::checksum::expected_checksum;
use notify_relay::auth::ChecksumAuthenticator;
use notify_relay::broker::{BrokerDelivery, BrokerError, DeliverySource};
use notify_relay::websocket::{
    ConnectionRegistry, FrameSink, InboundFrame, Session, SessionConfig, SessionHandle,
    TransportError, Uid,
};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SECRET: &str = "shared";
pub const WAIT: Duration = Duration::from_secs(2);

pub fn delivery(routing_key: &str, body: &'static str, tag: u64) -> BrokerDelivery {
    BrokerDelivery {
        routing_key: routing_key.to_string(),
        body: Bytes::from_static(body.as_bytes()),
        delivery_tag: tag,
    }
}

pub fn handshake_json(uid: Uid, timestamp: i64, secret: &str) -> String {
    serde_json::json!({
        "uid": uid,
        "timestamp": timestamp,
        "checksum": expected_checksum(uid, timestamp, secret),
    })
    .to_string()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Delivery source backed by a queue; records acknowledgements
#[derive(Default)]
pub struct MemorySource {
    pending: VecDeque<Result<BrokerDelivery, BrokerError>>,
    pub acked: Arc<Mutex<Vec<u64>>>,
    /// Wait forever instead of reporting end-of-stream when drained
    pub hold_open: bool,
}

impl MemorySource {
    pub fn new(deliveries: Vec<BrokerDelivery>) -> Self {
        Self {
            pending: deliveries.into_iter().map(Ok).collect(),
            ..Default::default()
        }
    }

    /// Source that blocks once drained, like a live consumer with no traffic
    pub fn held_open(deliveries: Vec<BrokerDelivery>) -> Self {
        Self {
            hold_open: true,
            ..Self::new(deliveries)
        }
    }

    pub fn push_error(&mut self, error: BrokerError) {
        self.pending.push_back(Err(error));
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySource for MemorySource {
    async fn next_delivery(&mut self) -> Option<Result<BrokerDelivery, BrokerError>> {
        match self.pending.pop_front() {
            Some(next) => Some(next),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.acked.lock().unwrap().push(delivery_tag);
        Ok(())
    }
}

/// What a session wrote to its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Written {
    Text(String),
    Binary(Bytes),
    Pong(Bytes),
    Closed,
}

pub struct RecordingSink {
    tx: mpsc::UnboundedSender<Written>,
    fail_writes: bool,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn write_text(&mut self, text: String) -> Result<(), TransportError> {
        self.record(Written::Text(text))
    }

    async fn write_binary(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        self.record(Written::Binary(bytes))
    }

    async fn write_pong(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.record(Written::Pong(payload))
    }

    async fn shutdown(&mut self) {
        let _ = self.tx.send(Written::Closed);
    }
}

impl RecordingSink {
    fn record(&self, written: Written) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError);
        }
        self.tx.send(written).map_err(|_| TransportError)
    }
}

type Inbound = Pin<Box<dyn Stream<Item = Result<InboundFrame, String>> + Send>>;

fn inbound_stream(rx: mpsc::UnboundedReceiver<Result<InboundFrame, String>>) -> Inbound {
    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    }))
}

/// A running session wired to in-memory transport halves
pub struct Client {
    pub handle: SessionHandle,
    inbound: Option<mpsc::UnboundedSender<Result<InboundFrame, String>>>,
    written: mpsc::UnboundedReceiver<Written>,
    pub task: JoinHandle<()>,
}

impl Client {
    pub fn connect(registry: &ConnectionRegistry, config: SessionConfig) -> Self {
        Self::spawn(registry, config, false)
    }

    pub fn connect_with_failing_writes(registry: &ConnectionRegistry) -> Self {
        Self::spawn(registry, SessionConfig::default(), true)
    }

    fn spawn(registry: &ConnectionRegistry, config: SessionConfig, fail_writes: bool) -> Self {
        let authenticator = Arc::new(ChecksumAuthenticator::new(SECRET));
        let session = Session::new(registry.clone(), authenticator, config);
        let handle = session.handle();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let sink = RecordingSink {
            tx: written_tx,
            fail_writes,
        };

        let task = tokio::spawn(session.run(inbound_stream(inbound_rx), sink));

        Self {
            handle,
            inbound: Some(inbound_tx),
            written: written_rx,
            task,
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send_frame(InboundFrame::Text(text.into()));
    }

    pub fn send_frame(&self, frame: InboundFrame) {
        if let Some(inbound) = &self.inbound {
            inbound.send(Ok(frame)).unwrap();
        }
    }

    pub fn fail_read(&self) {
        if let Some(inbound) = &self.inbound {
            inbound.send(Err("connection reset".to_string())).unwrap();
        }
    }

    /// Drop the inbound half, as when the peer goes away
    pub fn hang_up(&mut self) {
        self.inbound.take();
    }

    pub async fn next_written(&mut self) -> Written {
        tokio::time::timeout(WAIT, self.written.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("session dropped its transport")
    }

    pub fn try_written(&mut self) -> Option<Written> {
        self.written.try_recv().ok()
    }

    pub async fn finished(self) {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not finish")
            .expect("session panicked");
    }
}

/// Poll until `uid` has `count` live sessions
pub async fn wait_for_connections(registry: &ConnectionRegistry, uid: Uid, count: usize) {
    tokio::time::timeout(WAIT, async {
        while registry.connection_count(uid).await != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("uid {} never reached {} connections", uid, count));
}

/// Poll until the registry tracks `count` running sessions
pub async fn wait_for_live(registry: &ConnectionRegistry, count: usize) {
    tokio::time::timeout(WAIT, async {
        while registry.live_sessions().await != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {} live sessions", count));
}
