/// One client connection from upgrade through disconnect
///
/// A session runs two halves concurrently inside a single task:
/// 1. The receive loop, which reads frames and treats every data frame as a
///    handshake attempt
/// 2. The writer, which drains the bounded outbound queue to the transport
///
/// Other components never touch the transport. They hold a `SessionHandle`
/// and enqueue frames without waiting; a full queue means the client is not
/// keeping up and the caller evicts it.
use super::messages::{ErrorEnvelope, Handshake, InboundFrame, OutboundFrame};
use super::{ConnectionRegistry, Uid};
use crate::auth::ChecksumAuthenticator;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of frames a session buffers before it counts as stalled
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Default time allowed to flush queued frames on shutdown
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Handshake state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(Uid),
}

/// Close requests delivered to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    /// Torn down as unhealthy; queued frames are abandoned
    Evicted,
    /// Process is stopping; queued frames get a bounded drain
    ShuttingDown,
}

/// Why a non-blocking enqueue failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("session outbound queue is full")]
    Full,

    #[error("session is closed")]
    Closed,
}

/// Transport write failed; the connection is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport closed")]
pub struct TransportError;

/// Write half of a client transport
#[async_trait]
pub trait FrameSink: Send {
    async fn write_text(&mut self, text: String) -> Result<(), TransportError>;

    async fn write_binary(&mut self, bytes: Bytes) -> Result<(), TransportError>;

    async fn write_pong(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the transport. Errors are irrelevant at this point.
    async fn shutdown(&mut self);
}

/// Shared, cheap-to-clone reference to a running session
///
/// This is what the registry stores and the router delivers to. It carries no
/// ownership of the transport.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<OutboundFrame>,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
}

/// Receiving side of a session's outbound queue
pub struct OutboundQueue {
    frames: mpsc::Receiver<OutboundFrame>,
    lifecycle: watch::Receiver<Lifecycle>,
}

impl OutboundQueue {
    /// Take the next queued frame without waiting
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.frames.try_recv().ok()
    }
}

impl SessionHandle {
    /// Create a handle together with the queue its writer drains
    pub fn channel(capacity: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (lifecycle_tx, lifecycle_rx) = watch::channel(Lifecycle::Open);

        let handle = Self {
            id: SessionId::new(),
            outbound: tx,
            lifecycle: Arc::new(lifecycle_tx),
        };
        let queue = OutboundQueue {
            frames: rx,
            lifecycle: lifecycle_rx,
        };

        (handle, queue)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Enqueue a payload without waiting
    ///
    /// Safe to call from any task, concurrently with the session's own loop.
    pub fn send(&self, payload: Bytes) -> Result<(), SendError> {
        if *self.lifecycle.borrow() != Lifecycle::Open {
            return Err(SendError::Closed);
        }

        self.outbound
            .try_send(OutboundFrame::Payload(payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Tear the session down as unhealthy, abandoning queued frames
    pub fn evict(&self) {
        self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Open {
                *state = Lifecycle::Evicted;
                true
            } else {
                false
            }
        });
    }

    /// Ask the session to flush what it has queued and close
    pub fn shutdown(&self) {
        self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Open {
                *state = Lifecycle::ShuttingDown;
                true
            } else {
                false
            }
        });
    }

    /// Whether the session has stopped accepting frames
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed() || *self.lifecycle.borrow() != Lifecycle::Open
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

/// Per-session tuning
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub outbound_capacity: usize,
    pub drain_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

/// How the session's main select ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ReadEnded,
    WriteFailed,
    Evicted,
    ShuttingDown,
}

pub struct Session {
    handle: SessionHandle,
    queue: Option<OutboundQueue>,
    registry: ConnectionRegistry,
    authenticator: Arc<ChecksumAuthenticator>,
    drain_grace: Duration,
    state: SessionState,
}

impl Session {
    pub fn new(
        registry: ConnectionRegistry,
        authenticator: Arc<ChecksumAuthenticator>,
        config: SessionConfig,
    ) -> Self {
        let (handle, queue) = SessionHandle::channel(config.outbound_capacity);
        Self {
            handle,
            queue: Some(queue),
            registry,
            authenticator,
            drain_grace: config.drain_grace,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    /// Drive the connection until the client leaves or the session is closed
    ///
    /// Always unregisters before the transport is released.
    pub async fn run<I, E, S>(mut self, mut inbound: I, mut sink: S)
    where
        I: Stream<Item = Result<InboundFrame, E>> + Unpin,
        E: fmt::Display,
        S: FrameSink,
    {
        let session_id = self.handle.id;
        debug!(%session_id, "session started");

        let Some(OutboundQueue {
            mut frames,
            mut lifecycle,
        }) = self.queue.take()
        else {
            return;
        };

        if !self.registry.attach(&self.handle).await {
            debug!(%session_id, "relay is shutting down, closing new session");
        }

        let exit = {
            let reader = self.receive_loop(&mut inbound);
            let writer = write_outbound(&mut frames, &mut sink);
            let closed = wait_closed(&mut lifecycle);

            tokio::select! {
                () = reader => Exit::ReadEnded,
                () = writer => Exit::WriteFailed,
                exit = closed => exit,
            }
        };

        let uid = self.registry.unregister(&self.handle).await;

        if exit == Exit::ShuttingDown {
            frames.close();
            if tokio::time::timeout(self.drain_grace, drain(&mut frames, &mut sink))
                .await
                .is_err()
            {
                warn!(%session_id, "drain grace elapsed, abandoning queued frames");
            }
        }

        sink.shutdown().await;
        info!(%session_id, ?uid, ?exit, "session closed");
    }

    async fn receive_loop<I, E>(&mut self, inbound: &mut I)
    where
        I: Stream<Item = Result<InboundFrame, E>> + Unpin,
        E: fmt::Display,
    {
        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(InboundFrame::Text(text)) => self.on_payload(text.as_bytes()).await,
                Ok(InboundFrame::Binary(bytes)) => self.on_payload(&bytes).await,
                Ok(InboundFrame::Ping(payload)) => {
                    // Dropped when the queue is full; the client will ping again
                    let _ = self.handle.outbound.try_send(OutboundFrame::Pong(payload));
                }
                Ok(InboundFrame::Close) => {
                    debug!(session_id = %self.handle.id, "client sent close frame");
                    break;
                }
                Ok(InboundFrame::Other) => {}
                Err(e) => {
                    debug!(session_id = %self.handle.id, error = %e, "transport read failed");
                    break;
                }
            }
        }
    }

    /// Every data frame is a handshake attempt, including after a successful
    /// one. Re-authenticating with another uid moves the session to that uid.
    async fn on_payload(&mut self, raw: &[u8]) {
        let rejection = match Handshake::from_slice(raw) {
            Err(e) => ErrorEnvelope::new(e.to_string()),
            Ok(handshake) => {
                let now = chrono::Utc::now().timestamp();
                match self.authenticator.verify(&handshake, now) {
                    Ok(uid) => {
                        self.authenticate(uid).await;
                        return;
                    }
                    Err(e) => {
                        debug!(
                            session_id = %self.handle.id,
                            uid = handshake.uid,
                            reason = %e,
                            "handshake rejected"
                        );
                        ErrorEnvelope::new(e.to_string())
                    }
                }
            }
        };

        if self
            .handle
            .outbound
            .send(OutboundFrame::Error(rejection))
            .await
            .is_err()
        {
            debug!(session_id = %self.handle.id, "outbound queue closed, error envelope dropped");
        }
    }

    async fn authenticate(&mut self, uid: Uid) {
        match self.state {
            SessionState::Authenticated(current) if current == uid => {
                debug!(session_id = %self.handle.id, uid, "repeated handshake for same uid");
            }
            SessionState::Authenticated(current) => {
                info!(session_id = %self.handle.id, from = current, to = uid, "session re-authenticated");
            }
            SessionState::Unauthenticated => {
                info!(session_id = %self.handle.id, uid, "session authenticated");
            }
        }

        self.state = SessionState::Authenticated(uid);
        self.registry.register(uid, &self.handle).await;
    }
}

async fn wait_closed(lifecycle: &mut watch::Receiver<Lifecycle>) -> Exit {
    loop {
        let state = *lifecycle.borrow_and_update();
        match state {
            Lifecycle::Evicted => return Exit::Evicted,
            Lifecycle::ShuttingDown => return Exit::ShuttingDown,
            Lifecycle::Open => {}
        }

        if lifecycle.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn write_outbound<S: FrameSink>(frames: &mut mpsc::Receiver<OutboundFrame>, sink: &mut S) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_frame(sink, frame).await {
            debug!(error = %e, "transport write failed");
            return;
        }
    }
}

async fn drain<S: FrameSink>(frames: &mut mpsc::Receiver<OutboundFrame>, sink: &mut S) {
    while let Some(frame) = frames.recv().await {
        if write_frame(sink, frame).await.is_err() {
            return;
        }
    }
}

async fn write_frame<S: FrameSink>(sink: &mut S, frame: OutboundFrame) -> Result<(), TransportError> {
    match frame {
        OutboundFrame::Error(envelope) => sink.write_text(envelope.to_json()).await,
        OutboundFrame::Payload(body) => match std::str::from_utf8(&body) {
            Ok(text) => sink.write_text(text.to_owned()).await,
            Err(_) => sink.write_binary(body).await,
        },
        OutboundFrame::Pong(payload) => sink.write_pong(payload).await,
    }
}
