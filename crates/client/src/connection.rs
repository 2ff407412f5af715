//! Transport connection manager.
//!
//! Owns the single push connection. Runs as an actor: one tokio task holds
//! the connection state, the subscription registry and the live session, and
//! processes commands from [`ConnectionManager`] handles one at a time.
//! Handshakes run in spawned tasks that report back into the actor, so a
//! second `connect()` arriving mid-handshake simply joins the waiters of the
//! attempt already in flight.
//!
//! State is published through a `watch` channel; nothing outside the actor
//! can change it.

use std::sync::Arc;
use std::time::Duration;

use dispatchlink_protocol::{Role, Topic};
use dispatchlink_transport::{
    ConnectRequest, FrameHandler, Link, PushSession, PushTransport, TransportError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::bus::ListenerBus;
use crate::identity::IdentityProvider;
use crate::normalizer::normalize;
use crate::registry::SubscriptionRegistry;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            auto_reconnect: true,
        }
    }
}

type ConnectReply = oneshot::Sender<Result<(), TransportError>>;

enum ConnectionCommand {
    Connect { reply: ConnectReply },
    Disconnect { reply: oneshot::Sender<()> },
    Topics { reply: oneshot::Sender<Vec<Topic>> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Reports from tasks spawned by the actor
enum LinkEvent {
    Opened {
        attempt: u64,
        topic: Topic,
        result: Result<Link, TransportError>,
    },
    Dropped {
        generation: u64,
        reason: String,
    },
    ReconnectDue,
}

/// Handle to the connection actor (cheap to Clone).
#[derive(Clone)]
pub struct ConnectionManager {
    command_tx: mpsc::Sender<ConnectionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the actor in `Disconnected` state.
    pub fn spawn(
        transport: Arc<dyn PushTransport>,
        identity: Arc<dyn IdentityProvider>,
        bus: ListenerBus,
        options: ConnectionOptions,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = ConnectionActor {
            transport,
            identity,
            bus,
            options,
            registry: SubscriptionRegistry::new(),
            state_tx,
            event_tx,
            waiters: Vec::new(),
            attempt: 0,
            generation: 0,
            session: None,
            keep_alive: false,
            reconnect_pending: false,
        };
        tokio::spawn(actor.run(command_rx, event_rx));

        Self {
            command_tx,
            state_rx,
        }
    }

    /// Resolve once connected. Concurrent callers share one handshake.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ConnectionCommand::Connect { reply })
            .await
            .map_err(|_| TransportError::Stopped)?;
        rx.await.unwrap_or(Err(TransportError::Stopped))
    }

    /// Unsubscribe everything and drop the connection. Idempotent.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(ConnectionCommand::Disconnect { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Disconnect and stop the actor. Later calls on any handle fail with `Stopped`.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(ConnectionCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Topics with a live subscription right now
    pub async fn subscribed_topics(&self) -> Vec<Topic> {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(ConnectionCommand::Topics { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

struct ConnectionActor {
    transport: Arc<dyn PushTransport>,
    identity: Arc<dyn IdentityProvider>,
    bus: ListenerBus,
    options: ConnectionOptions,
    registry: SubscriptionRegistry,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    /// Callers waiting on the attempt in flight
    waiters: Vec<ConnectReply>,
    /// Bumped per handshake; results from older attempts are discarded.
    attempt: u64,
    /// Bumped per established or torn-down link; stale drop reports are discarded.
    generation: u64,
    session: Option<Arc<dyn PushSession>>,
    /// Set once a connection was established and until `disconnect()`.
    keep_alive: bool,
    reconnect_pending: bool,
}

impl ConnectionActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<ConnectionCommand>,
        mut event_rx: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.teardown(TransportError::Stopped);
                        break;
                    }
                },
                Some(event) = event_rx.recv() => self.handle_event(event),
            }
        }
        debug!(
            component = "connection",
            event = "connection.actor.stopped",
            "Connection actor stopped"
        );
    }

    /// Returns false once the actor should stop.
    fn handle_command(&mut self, command: ConnectionCommand) -> bool {
        match command {
            ConnectionCommand::Connect { reply } => match self.state() {
                ConnectionState::Connected => {
                    let _ = reply.send(Ok(()));
                }
                ConnectionState::Connecting => self.waiters.push(reply),
                ConnectionState::Disconnected => match self.begin_handshake() {
                    Ok(()) => self.waiters.push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
            },
            ConnectionCommand::Disconnect { reply } => {
                self.teardown(TransportError::Abandoned);
                let _ = reply.send(());
            }
            ConnectionCommand::Topics { reply } => {
                let _ = reply.send(self.registry.topics());
            }
            ConnectionCommand::Shutdown { reply } => {
                self.teardown(TransportError::Stopped);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened {
                attempt,
                topic,
                result,
            } => {
                if attempt != self.attempt || self.state() != ConnectionState::Connecting {
                    debug!(
                        component = "connection",
                        event = "connection.handshake.stale",
                        attempt,
                        "Discarding result of abandoned handshake"
                    );
                    if let Ok(link) = result {
                        link.session.close();
                    }
                    return;
                }
                match result {
                    Ok(link) => self.establish(link, topic),
                    Err(e) => {
                        warn!(
                            component = "connection",
                            event = "connection.handshake.failed",
                            attempt,
                            error = %e,
                            "Handshake failed"
                        );
                        self.set_state(ConnectionState::Disconnected);
                        self.resolve_waiters(Err(e));
                        self.schedule_reconnect();
                    }
                }
            }
            LinkEvent::Dropped { generation, reason } => {
                if generation != self.generation || self.session.is_none() {
                    return;
                }
                warn!(
                    component = "connection",
                    event = "connection.link.dropped",
                    reason = %reason,
                    "Push connection dropped by remote side"
                );
                self.registry.clear();
                if let Some(session) = self.session.take() {
                    session.close();
                }
                self.generation += 1;
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
            LinkEvent::ReconnectDue => {
                self.reconnect_pending = false;
                if !self.keep_alive || self.state() != ConnectionState::Disconnected {
                    return;
                }
                info!(
                    component = "connection",
                    event = "connection.reconnect.attempt",
                    "Reconnecting"
                );
                if let Err(e) = self.begin_handshake() {
                    warn!(
                        component = "connection",
                        event = "connection.reconnect.unavailable",
                        error = %e,
                        "Cannot reconnect yet"
                    );
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Derive the topic from the current identity and start a handshake task.
    fn begin_handshake(&mut self) -> Result<(), TransportError> {
        let identity = self
            .identity
            .current()
            .ok_or(TransportError::MissingIdentity)?;
        let role: Role = identity
            .role
            .parse()
            .map_err(TransportError::UnsupportedRole)?;
        let topic = role.topic();
        let request = ConnectRequest {
            url: self.options.url.clone(),
            token: identity.token,
        };

        self.attempt += 1;
        let attempt = self.attempt;
        self.set_state(ConnectionState::Connecting);

        let transport = self.transport.clone();
        let timeout = self.options.connect_timeout;
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.open(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };
            let _ = event_tx.send(LinkEvent::Opened {
                attempt,
                topic,
                result,
            });
        });
        Ok(())
    }

    fn establish(&mut self, link: Link, topic: Topic) {
        // Handles from a previous link are dead; start from an empty registry.
        self.registry.clear();
        self.generation += 1;

        let bus = self.bus.clone();
        let on_frame: FrameHandler = Arc::new(move |body: &str| {
            if let Some(notification) = normalize(body) {
                bus.dispatch(&notification);
            }
        });
        self.registry
            .subscribe(link.session.as_ref(), &topic, on_frame);

        let generation = self.generation;
        let event_tx = self.event_tx.clone();
        let closed = link.closed;
        tokio::spawn(async move {
            let reason = closed
                .await
                .unwrap_or_else(|_| "transport dropped the link".to_string());
            let _ = event_tx.send(LinkEvent::Dropped { generation, reason });
        });

        self.session = Some(link.session);
        self.keep_alive = true;
        self.set_state(ConnectionState::Connected);
        info!(
            component = "connection",
            event = "connection.established",
            topic = %topic,
            generation,
            "Push connection established"
        );
        self.resolve_waiters(Ok(()));
    }

    /// Drop everything; pending connect callers get `error`.
    fn teardown(&mut self, error: TransportError) {
        self.keep_alive = false;
        self.attempt += 1;
        self.generation += 1;
        self.registry.clear();
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.resolve_waiters(Err(error));
        self.set_state(ConnectionState::Disconnected);
    }

    fn schedule_reconnect(&mut self) {
        if !self.keep_alive || !self.options.auto_reconnect || self.reconnect_pending {
            return;
        }
        self.reconnect_pending = true;
        let delay = self.options.reconnect_delay;
        let event_tx = self.event_tx.clone();
        debug!(
            component = "connection",
            event = "connection.reconnect.scheduled",
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(LinkEvent::ReconnectDue);
        });
    }

    fn resolve_waiters(&mut self, result: Result<(), TransportError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(
                component = "connection",
                event = "connection.state.changed",
                from = ?previous,
                to = ?next,
                "Connection state changed"
            );
        }
    }
}
