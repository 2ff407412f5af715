//! Conversation REST collaborator: history fetch and message send.

use std::sync::Arc;

use async_trait::async_trait;
use dispatchlink_protocol::{ChatMessage, ConversationKey, SendMessageRequest};
use thiserror::Error;
use tracing::debug;

use crate::identity::IdentityProvider;

/// History or send failure, surfaced as the controller's inline error state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Conversation is closed")]
    Closed,
}

#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Full history, ascending by `createdAt`. Side-effect free.
    async fn fetch_history(&self, key: ConversationKey) -> Result<Vec<ChatMessage>, FetchError>;

    async fn post_message(&self, key: ConversationKey, content: &str) -> Result<(), FetchError>;
}

/// `reqwest` client for `{base}/api/{trips|orders}/{id}/messages`
pub struct HttpConversationApi {
    client: reqwest::Client,
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
}

impl HttpConversationApi {
    pub fn new(base_url: impl Into<String>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            identity,
        }
    }

    fn messages_url(&self, key: ConversationKey) -> String {
        format!(
            "{}/api/{}/{}/messages",
            self.base_url.trim_end_matches('/'),
            key.kind.path_segment(),
            key.id
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.identity.current().and_then(|identity| identity.token) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn fetch_history(&self, key: ConversationKey) -> Result<Vec<ChatMessage>, FetchError> {
        let url = self.messages_url(key);
        debug!(
            component = "api",
            event = "api.history.fetch",
            conversation = %key,
            url = %url,
            "Fetching conversation history"
        );
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json::<Vec<ChatMessage>>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn post_message(&self, key: ConversationKey, content: &str) -> Result<(), FetchError> {
        let body = SendMessageRequest {
            conversation_id: key.id,
            content: content.to_string(),
        };
        let response = self
            .authorized(self.client.post(self.messages_url(key)))
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, SessionIdentity};
    use std::sync::Mutex;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};

    #[derive(Clone, Default)]
    struct Backend {
        messages: Arc<Mutex<Vec<ChatMessage>>>,
        auth_seen: Arc<Mutex<Vec<String>>>,
    }

    async fn list(
        State(backend): State<Backend>,
        Path(id): Path<i64>,
        headers: HeaderMap,
    ) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            backend.auth_seen.lock().unwrap().push(auth.to_string());
        }
        if id == 500 {
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        Ok(Json(backend.messages.lock().unwrap().clone()))
    }

    async fn create(
        State(backend): State<Backend>,
        Path(id): Path<i64>,
        Json(body): Json<SendMessageRequest>,
    ) -> StatusCode {
        assert_eq!(body.conversation_id, id);
        let mut messages = backend.messages.lock().unwrap();
        let next = messages.len() as i64 + 1;
        messages.push(ChatMessage {
            message_id: next,
            sender_role: "DISPATCHER".into(),
            sender_username: "dana".into(),
            content: body.content,
            created_at: format!("2024-05-01T08:00:0{next}Z"),
        });
        StatusCode::CREATED
    }

    async fn spawn_backend(backend: Backend) -> String {
        let app = Router::new()
            .route("/api/trips/{id}/messages", get(list).post(create))
            .with_state(backend);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn api(base: String) -> HttpConversationApi {
        let identity = SessionIdentity::new(Some(Identity::new(
            "DISPATCHER",
            Some("secret".to_string()),
        )));
        HttpConversationApi::new(base, Arc::new(identity))
    }

    #[tokio::test]
    async fn post_then_fetch_returns_authoritative_list() {
        let backend = Backend::default();
        let api = api(spawn_backend(backend.clone()).await);
        let key = ConversationKey::trip(42);

        assert!(api.fetch_history(key).await.unwrap().is_empty());
        api.post_message(key, "ETA 10 minutes").await.unwrap();

        let history = api.fetch_history(key).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "ETA 10 minutes");
        assert!(backend
            .auth_seen
            .lock()
            .unwrap()
            .iter()
            .all(|auth| auth == "Bearer secret"));
    }

    #[tokio::test]
    async fn server_errors_become_status_errors() {
        let api = api(spawn_backend(Backend::default()).await);
        let err = api
            .fetch_history(ConversationKey::trip(500))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn unknown_route_is_not_success() {
        let api = api(spawn_backend(Backend::default()).await);
        let err = api
            .fetch_history(ConversationKey::order(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }
}
