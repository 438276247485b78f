/// WebSocket sessions and the registry that maps users to them
///
/// Architecture:
/// 1. ConnectionRegistry: process-wide uid -> live sessions table
/// 2. Session: one client connection, its handshake state and its writer
/// 3. Messages: handshake, error envelope and queued frame types
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod messages;
pub mod session;

pub use messages::{ErrorEnvelope, Handshake, InboundFrame, OutboundFrame};
pub use session::{
    FrameSink, OutboundQueue, SendError, Session, SessionConfig, SessionHandle, SessionId,
    SessionState, TransportError,
};

/// User identity carried in handshakes and routing keys
pub type Uid = i64;

#[derive(Default)]
struct RegistryInner {
    /// uid -> sessions; a uid may have several devices connected
    by_uid: HashMap<Uid, HashMap<SessionId, SessionHandle>>,
    /// Reverse index so a session is filed under at most one uid
    by_session: HashMap<SessionId, Uid>,
    /// Every running session, authenticated or not
    live: HashMap<SessionId, SessionHandle>,
    /// Set by `close_all`; sessions attaching afterwards are shut down at once
    closing: bool,
}

impl RegistryInner {
    fn detach(&mut self, session_id: SessionId) -> Option<Uid> {
        let uid = self.by_session.remove(&session_id)?;

        if let Some(sessions) = self.by_uid.get_mut(&uid) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                self.by_uid.remove(&uid);
            }
        }

        Some(uid)
    }
}

/// Connection registry for running sessions
///
/// Sessions are tracked from the moment their task starts and are filed
/// under a uid once they authenticate.
///
/// All reads and writes go through one `RwLock`: lookups during delivery share
/// the read side, register/unregister take the write side. The lock is never
/// held across network I/O, and every read hands back an owned copy.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a running session before it has authenticated
    ///
    /// Returns false once `close_all` has run; the session is then told to
    /// shut down immediately.
    pub async fn attach(&self, session: &SessionHandle) -> bool {
        let mut guard = self.inner.write().await;
        if guard.closing {
            session.shutdown();
            return false;
        }

        guard.live.insert(session.id(), session.clone());
        true
    }

    /// File a session under `uid`
    ///
    /// Registering the same session twice under the same uid is a no-op. If
    /// the session is currently filed under another uid it is moved.
    /// Returns true when the registry changed.
    pub async fn register(&self, uid: Uid, session: &SessionHandle) -> bool {
        let mut guard = self.inner.write().await;
        let session_id = session.id();

        let current = guard.by_session.get(&session_id).copied();
        match current {
            Some(current) if current == uid => return false,
            Some(_) => {
                guard.detach(session_id);
            }
            None => {}
        }

        guard.by_session.insert(session_id, uid);
        guard.live.insert(session_id, session.clone());
        guard
            .by_uid
            .entry(uid)
            .or_default()
            .insert(session_id, session.clone());

        tracing::debug!(
            uid,
            %session_id,
            sessions_for_uid = guard.by_uid.get(&uid).map(|s| s.len()).unwrap_or(0),
            "registered session"
        );

        true
    }

    /// Forget a session entirely
    ///
    /// Returns the uid it was filed under, or None for sessions that never
    /// authenticated.
    pub async fn unregister(&self, session: &SessionHandle) -> Option<Uid> {
        let mut guard = self.inner.write().await;
        guard.live.remove(&session.id());
        let removed = guard.detach(session.id());

        if let Some(uid) = removed {
            tracing::debug!(
                uid,
                session_id = %session.id(),
                remaining = guard.by_uid.get(&uid).map(|s| s.len()).unwrap_or(0),
                "unregistered session"
            );
        }

        removed
    }

    /// Snapshot of the sessions currently filed under `uid`
    pub async fn lookup(&self, uid: Uid) -> Vec<SessionHandle> {
        let guard = self.inner.read().await;
        guard
            .by_uid
            .get(&uid)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted, deduplicated uids with at least one live session
    pub async fn online_identities(&self) -> Vec<Uid> {
        let guard = self.inner.read().await;
        guard
            .by_uid
            .keys()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of sessions filed under `uid`
    pub async fn connection_count(&self, uid: Uid) -> usize {
        let guard = self.inner.read().await;
        guard.by_uid.get(&uid).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of registered sessions across all uids
    pub async fn total_connections(&self) -> usize {
        let guard = self.inner.read().await;
        guard.by_session.len()
    }

    /// Number of running sessions, including unauthenticated ones
    pub async fn live_sessions(&self) -> usize {
        let guard = self.inner.read().await;
        guard.live.len()
    }

    /// Ask every live session to drain and close
    ///
    /// Covers sessions that never authenticated. Sessions unregister
    /// themselves as they exit. Returns how many were signalled.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<SessionHandle> = {
            let mut guard = self.inner.write().await;
            guard.closing = true;
            guard.live.values().cloned().collect()
        };

        for session in &sessions {
            session.shutdown();
        }

        sessions.len()
    }
}
