//! In-memory fakes for the push transport and the conversation API.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dispatchlink_protocol::{ChatMessage, ConversationKey};
use dispatchlink_transport::{
    ConnectRequest, FrameHandler, Link, PushSession, PushTransport, SubscriptionHandle,
    TransportError,
};
use tokio::sync::{oneshot, watch};

use crate::api::{ConversationApi, FetchError};

pub fn message(id: i64, content: &str) -> ChatMessage {
    ChatMessage {
        message_id: id,
        sender_role: "DISPATCHER".to_string(),
        sender_username: "dana".to_string(),
        content: content.to_string(),
        created_at: format!("2024-05-01T08:00:{id:02}Z"),
    }
}

// ---------------------------------------------------------------------------
// Push session / transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionState {
    next_id: u64,
    routes: HashMap<String, (String, FrameHandler)>,
    unsubscribes: usize,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct FakeSession {
    inner: Arc<Mutex<SessionState>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self
            .inner
            .lock()
            .unwrap()
            .routes
            .values()
            .map(|(destination, _)| destination.clone())
            .collect();
        destinations.sort();
        destinations
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.inner.lock().unwrap().unsubscribes
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Hand `body` to every live subscription on `destination`, as the broker would.
    pub fn deliver(&self, destination: &str, body: &str) -> usize {
        let handlers: Vec<FrameHandler> = self
            .inner
            .lock()
            .unwrap()
            .routes
            .values()
            .filter(|(d, _)| d == destination)
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in &handlers {
            handler(body);
        }
        handlers.len()
    }
}

impl PushSession for FakeSession {
    fn subscribe(&self, destination: &str, on_frame: FrameHandler) -> SubscriptionHandle {
        let mut state = self.inner.lock().unwrap();
        let id = format!("sub-{}", state.next_id);
        state.next_id += 1;
        state
            .routes
            .insert(id.clone(), (destination.to_string(), on_frame));

        let inner = self.inner.clone();
        let handle_id = id.clone();
        SubscriptionHandle::new(id, move || {
            let mut state = inner.lock().unwrap();
            if state.routes.remove(&handle_id).is_some() {
                state.unsubscribes += 1;
            }
        })
    }

    fn close(&self) {
        let mut state = self.inner.lock().unwrap();
        state.closed = true;
        state.routes.clear();
    }
}

/// What the next `open` call does
pub enum Outcome {
    Accept,
    Fail(TransportError),
    Hang,
}

struct OpenedLink {
    session: FakeSession,
    closed_tx: Option<oneshot::Sender<String>>,
}

#[derive(Default)]
struct TransportState {
    requests: Vec<ConnectRequest>,
    script: VecDeque<Outcome>,
    links: Vec<OpenedLink>,
    gate: Option<watch::Receiver<bool>>,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of a future `open`; unscripted opens accept.
    pub fn script(&self, outcome: Outcome) {
        self.inner.lock().unwrap().script.push_back(outcome);
    }

    /// Hold every handshake until the returned switch is set to true.
    pub fn hold_handshakes(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        self.inner.lock().unwrap().gate = Some(rx);
        tx
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.inner.lock().unwrap().requests.last().cloned()
    }

    pub fn session(&self, index: usize) -> FakeSession {
        self.inner.lock().unwrap().links[index].session.clone()
    }

    pub fn last_session(&self) -> FakeSession {
        let state = self.inner.lock().unwrap();
        state.links.last().expect("no link opened").session.clone()
    }

    /// Simulate the broker dropping the most recent link.
    pub fn drop_last_link(&self, reason: &str) {
        let mut state = self.inner.lock().unwrap();
        let link = state.links.last_mut().expect("no link opened");
        if let Some(tx) = link.closed_tx.take() {
            let _ = tx.send(reason.to_string());
        }
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn open(&self, request: ConnectRequest) -> Result<Link, TransportError> {
        let (outcome, gate) = {
            let mut state = self.inner.lock().unwrap();
            state.requests.push(request);
            (
                state.script.pop_front().unwrap_or(Outcome::Accept),
                state.gate.clone(),
            )
        };
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        match outcome {
            Outcome::Accept => {
                let session = FakeSession::new();
                let (closed_tx, closed_rx) = oneshot::channel();
                self.inner.lock().unwrap().links.push(OpenedLink {
                    session: session.clone(),
                    closed_tx: Some(closed_tx),
                });
                Ok(Link {
                    session: Arc::new(session),
                    closed: closed_rx,
                })
            }
            Outcome::Fail(error) => Err(error),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation API
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    histories: HashMap<ConversationKey, Vec<ChatMessage>>,
    fetches: Vec<ConversationKey>,
    posts: Vec<(ConversationKey, String)>,
    fail_fetches: bool,
    fail_posts: bool,
}

/// Behaves like the REST backend: posts append to the stored history.
#[derive(Clone, Default)]
pub struct FakeApi {
    inner: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_history(&self, key: ConversationKey, messages: Vec<ChatMessage>) {
        self.inner.lock().unwrap().histories.insert(key, messages);
    }

    pub fn fetch_count(&self, key: ConversationKey) -> usize {
        self.inner
            .lock()
            .unwrap()
            .fetches
            .iter()
            .filter(|k| **k == key)
            .count()
    }

    pub fn posts(&self) -> Vec<(ConversationKey, String)> {
        self.inner.lock().unwrap().posts.clone()
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.inner.lock().unwrap().fail_fetches = fail;
    }

    pub fn fail_posts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_posts = fail;
    }
}

#[async_trait]
impl ConversationApi for FakeApi {
    async fn fetch_history(&self, key: ConversationKey) -> Result<Vec<ChatMessage>, FetchError> {
        let mut state = self.inner.lock().unwrap();
        state.fetches.push(key);
        if state.fail_fetches {
            return Err(FetchError::Status {
                status: 503,
                body: "history unavailable".to_string(),
            });
        }
        Ok(state.histories.get(&key).cloned().unwrap_or_default())
    }

    async fn post_message(&self, key: ConversationKey, content: &str) -> Result<(), FetchError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_posts {
            return Err(FetchError::Request("connection refused".to_string()));
        }
        state.posts.push((key, content.to_string()));
        let history = state.histories.entry(key).or_default();
        let next = history.len() as i64 + 1;
        history.push(message(next, content));
        Ok(())
    }
}
