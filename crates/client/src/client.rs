//! The realtime client context: one connection manager, one listener bus and
//! the conversation API, wired together and owned by the caller.

use std::sync::Arc;

use dispatchlink_protocol::{ConversationKey, Notification};
use dispatchlink_transport::{PushTransport, StompWsTransport, TransportError};
use tokio::sync::watch;
use tracing::debug;

use crate::api::{ConversationApi, HttpConversationApi};
use crate::bus::ListenerBus;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::conversation::ConversationController;
use crate::identity::IdentityProvider;
use crate::normalizer::{manufacture, NotificationDraft};
use crate::notification_center::NotificationCenter;
use crate::surface::SurfaceState;

pub struct RealtimeClient {
    connection: ConnectionManager,
    bus: ListenerBus,
    api: Arc<dyn ConversationApi>,
}

impl RealtimeClient {
    /// Production wiring: STOMP over WebSocket plus the REST conversation API.
    pub fn start(config: &ClientConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        let api = Arc::new(HttpConversationApi::new(
            config.api_url.clone(),
            identity.clone(),
        ));
        Self::with_parts(config, Arc::new(StompWsTransport::new()), api, identity)
    }

    pub fn with_parts(
        config: &ClientConfig,
        transport: Arc<dyn PushTransport>,
        api: Arc<dyn ConversationApi>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let bus = ListenerBus::new();
        let connection = ConnectionManager::spawn(
            transport,
            identity,
            bus.clone(),
            config.connection_options(),
        );
        Self {
            connection,
            bus,
            api,
        }
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn bus(&self) -> &ListenerBus {
        &self.bus
    }

    /// Manufacture a notification from a local draft and fan it out like a pushed one.
    pub fn push(&self, draft: NotificationDraft) -> Notification {
        let notification = manufacture(draft);
        let delivered = self.bus.dispatch(&notification);
        debug!(
            component = "client",
            event = "client.push.local",
            notification_id = %notification.id,
            delivered,
            "Local notification dispatched"
        );
        notification
    }

    pub fn open_conversation(
        &self,
        key: ConversationKey,
        initial: SurfaceState,
    ) -> ConversationController {
        ConversationController::mount(key, initial, &self.bus, self.api.clone())
    }

    pub fn notification_center(&self, capacity: usize) -> NotificationCenter {
        NotificationCenter::attach(&self.bus, capacity)
    }

    pub async fn shutdown(self) {
        self.connection.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, SessionIdentity};
    use crate::test_support::{message, FakeApi, FakeTransport};

    fn client(transport: &FakeTransport, api: &FakeApi) -> RealtimeClient {
        let identity = Arc::new(SessionIdentity::new(Some(Identity::new(
            "DISPATCHER",
            Some("tok".into()),
        ))));
        RealtimeClient::with_parts(
            &ClientConfig::default(),
            Arc::new(transport.clone()),
            Arc::new(api.clone()),
            identity,
        )
    }

    #[tokio::test]
    async fn trip_chat_push_reaches_minimized_conversation() {
        let transport = FakeTransport::new();
        let api = FakeApi::new();
        let key = ConversationKey::trip(42);
        api.set_history(key, vec![message(1, "Loaded at dock 4")]);
        let client = client(&transport, &api);

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        let session = transport.last_session();
        assert_eq!(
            session.live_destinations(),
            vec!["/topic/dispatcher-notifications"]
        );

        let conversation = client.open_conversation(key, SurfaceState::OpenMinimized);
        conversation.flush().await;
        assert_eq!(api.fetch_count(key), 1);

        api.set_history(
            key,
            vec![message(1, "Loaded at dock 4"), message(2, "Departed")],
        );
        let delivered = session.deliver(
            "/topic/dispatcher-notifications",
            r#"{"type":"TRIP_CHAT","title":"New message","metadata":{"tripId":42}}"#,
        );
        assert_eq!(delivered, 1);
        conversation.flush().await;

        let snapshot = conversation.snapshot();
        assert_eq!(api.fetch_count(key), 2);
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.surface.unread(), 1);
        assert_eq!(snapshot.surface.state(), SurfaceState::OpenMinimized);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn local_push_uses_the_same_bus() {
        let client = client(&FakeTransport::new(), &FakeApi::new());
        let center = client.notification_center(10);

        let pushed = client.push(NotificationDraft::system("Shift", "Handover at 18:00"));

        assert!(!pushed.id.is_empty());
        assert!(!pushed.is_read);
        assert_eq!(center.list(), vec![pushed]);
    }

    #[tokio::test]
    async fn local_chat_push_raises_conversation_badge() {
        let api = FakeApi::new();
        let client = client(&FakeTransport::new(), &api);
        let key = ConversationKey::order(8);
        let conversation = client.open_conversation(key, SurfaceState::Closed);

        client.push(NotificationDraft::order_chat(8));
        conversation.flush().await;

        assert_eq!(conversation.snapshot().surface.unread(), 1);
        assert_eq!(api.fetch_count(key), 2);
    }
}
