//! Dispatchlink Transport
//!
//! The push-connection seam. A [`PushTransport`] opens a [`Link`]: an
//! authenticated session that carries topic subscriptions, plus a signal that
//! resolves once the remote side drops it. Frame bodies are handed to the
//! subscriber verbatim; interpreting them is the caller's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

pub mod stomp_ws;

pub use stomp_ws::StompWsTransport;

/// Errors raised while establishing or running a push connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Broker rejected the connection: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("No signed-in identity")]
    MissingIdentity,

    #[error("Role has no push topic: {0}")]
    UnsupportedRole(String),

    #[error("Connection attempt abandoned by disconnect")]
    Abandoned,

    #[error("Connection manager stopped")]
    Stopped,
}

/// Callback receiving the raw body of every frame delivered to a subscription
pub type FrameHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Parameters for opening a push connection
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub token: Option<String>,
}

/// Opaque unsubscribe capability for one live subscription.
pub struct SubscriptionHandle {
    id: String,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(id: impl Into<String>, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: id.into(),
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Transport-level subscription id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tear the subscription down. Consumes the handle so it runs at most once.
    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish()
    }
}

/// A live, authenticated push session
pub trait PushSession: Send + Sync {
    /// Subscribe to `destination`; frames are handed to `on_frame` in arrival order.
    fn subscribe(&self, destination: &str, on_frame: FrameHandler) -> SubscriptionHandle;

    /// Close the session from our side. Idempotent.
    fn close(&self);
}

/// An opened connection
pub struct Link {
    pub session: Arc<dyn PushSession>,
    /// Resolves with a reason when the connection drops for any cause.
    pub closed: oneshot::Receiver<String>,
}

/// Opens push connections
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, request: ConnectRequest) -> Result<Link, TransportError>;
}
