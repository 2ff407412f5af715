//! Dispatchlink client
//!
//! Real-time notification and conversation client for the logistics console:
//! a single push connection per session, fan-out of normalized notifications
//! to in-process listeners, and per-conversation reconciliation against the
//! REST history endpoint.

pub mod api;
pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod identity;
pub mod normalizer;
pub mod notification_center;
pub mod paths;
pub mod registry;
pub mod surface;

#[cfg(test)]
mod test_support;

pub use api::{ConversationApi, FetchError, HttpConversationApi};
pub use bus::{ListenerBus, ListenerError, ListenerId};
pub use client::RealtimeClient;
pub use config::{ClientConfig, ConfigError, FileConfig, Overrides};
pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState};
pub use conversation::{ConversationController, ConversationEvent, ConversationSnapshot};
pub use identity::{Identity, IdentityProvider, SessionIdentity};
pub use normalizer::{manufacture, normalize, parse_notification, NotificationDraft, ParseError};
pub use notification_center::NotificationCenter;
pub use paths::DataDir;
pub use surface::{ChatSurface, SurfaceState, Transition};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
