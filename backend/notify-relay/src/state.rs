use crate::auth::ChecksumAuthenticator;
use crate::broker::BrokerStatus;
use crate::websocket::{ConnectionRegistry, Session, SessionConfig};
use std::sync::Arc;
use tokio::sync::watch;

/// Built-in landing page, used when no template file is configured
pub const DEFAULT_INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub authenticator: Arc<ChecksumAuthenticator>,
    pub session_config: SessionConfig,
    pub broker_status: watch::Receiver<BrokerStatus>,
    /// Landing page with a `{{host}}` placeholder
    pub index_template: Arc<str>,
}

impl AppState {
    pub fn new(
        registry: ConnectionRegistry,
        authenticator: ChecksumAuthenticator,
        session_config: SessionConfig,
        broker_status: watch::Receiver<BrokerStatus>,
    ) -> Self {
        Self {
            registry,
            authenticator: Arc::new(authenticator),
            session_config,
            broker_status,
            index_template: Arc::from(DEFAULT_INDEX_TEMPLATE),
        }
    }

    pub fn with_index_template(mut self, template: impl Into<Arc<str>>) -> Self {
        self.index_template = template.into();
        self
    }

    /// A fresh, unauthenticated session bound to this process's registry
    pub fn new_session(&self) -> Session {
        Session::new(
            self.registry.clone(),
            self.authenticator.clone(),
            self.session_config,
        )
    }
}
