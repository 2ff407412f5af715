//! Conversation reconciliation controller.
//!
//! One controller per open conversation. A bus listener filters chat
//! notifications for the controller's key and forwards a signal to the
//! controller's actor task; the push payload itself is never used as message
//! data. Every signal, every transition into the expanded surface and every
//! send ends in a full history fetch that replaces the local list.
//!
//! Dropping the [`ConversationController`] unmounts it: the listener is
//! unregistered and the actor stops, discarding any fetch still in flight.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dispatchlink_protocol::{ChatMessage, ConversationKey};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::api::{ConversationApi, FetchError};
use crate::bus::{ListenerBus, ListenerError, ListenerId};
use crate::surface::{ChatSurface, SurfaceState, Transition};

const EVENT_CAPACITY: usize = 64;

/// Point-in-time view of one conversation, replaced atomically by the actor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub key: ConversationKey,
    /// Last authoritative history, ascending by `createdAt`
    pub messages: Vec<ChatMessage>,
    pub surface: ChatSurface,
    /// Inline error from the most recent fetch or send; cleared by the next success.
    pub last_error: Option<FetchError>,
    /// Completed history fetches, successful or not
    pub fetch_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    MessagesReplaced { count: usize },
    UnreadChanged { unread: u32 },
    SurfaceChanged { state: SurfaceState },
    FetchFailed { error: FetchError },
}

enum ConversationCommand {
    Open {
        reply: oneshot::Sender<Transition>,
    },
    Minimize {
        reply: oneshot::Sender<Transition>,
    },
    Close {
        reply: oneshot::Sender<Transition>,
    },
    Send {
        content: String,
        reply: oneshot::Sender<Result<(), FetchError>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Mounted conversation. Not Clone: exactly one owner decides when it unmounts.
pub struct ConversationController {
    key: ConversationKey,
    command_tx: mpsc::Sender<ConversationCommand>,
    snapshot: Arc<ArcSwap<ConversationSnapshot>>,
    events_tx: broadcast::Sender<ConversationEvent>,
    bus: ListenerBus,
    listener_id: ListenerId,
    _shutdown_tx: oneshot::Sender<()>,
}

impl ConversationController {
    /// Register the bus listener, spawn the actor and start the initial fetch.
    pub fn mount(
        key: ConversationKey,
        initial: SurfaceState,
        bus: &ListenerBus,
        api: Arc<dyn ConversationApi>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let snapshot = Arc::new(ArcSwap::from_pointee(ConversationSnapshot {
            key,
            messages: Vec::new(),
            surface: ChatSurface::new(initial),
            last_error: None,
            fetch_count: 0,
        }));

        let listener_id = bus.add_listener(move |notification| {
            if !key.matches(notification) {
                return Ok(());
            }
            signal_tx.send(()).map_err(|_| ListenerError::Closed)
        });

        let actor = ConversationActor {
            key,
            api,
            snapshot: snapshot.clone(),
            events_tx: events_tx.clone(),
        };
        tokio::spawn(actor.run(command_rx, signal_rx, shutdown_rx));

        info!(
            component = "conversation",
            event = "conversation.mounted",
            conversation = %key,
            surface = ?initial,
            "Conversation mounted"
        );

        Self {
            key,
            command_tx,
            snapshot,
            events_tx,
            bus: bus.clone(),
            listener_id,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    pub fn snapshot(&self) -> Arc<ConversationSnapshot> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events_tx.subscribe()
    }

    /// Open or restore the surface. Resolves after the resulting fetch, if any.
    pub async fn open(&self) -> Transition {
        self.transition(|reply| ConversationCommand::Open { reply })
            .await
    }

    pub async fn minimize(&self) -> Transition {
        self.transition(|reply| ConversationCommand::Minimize { reply })
            .await
    }

    pub async fn close(&self) -> Transition {
        self.transition(|reply| ConversationCommand::Close { reply })
            .await
    }

    /// Post `content`, then refetch. The local list only changes through the refetch.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), FetchError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ConversationCommand::Send {
                content: content.into(),
                reply,
            })
            .await
            .map_err(|_| FetchError::Closed)?;
        rx.await.unwrap_or(Err(FetchError::Closed))
    }

    /// Resolves once every signal and command queued before it has been applied.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(ConversationCommand::Flush { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn unmount(self) {}

    async fn transition(
        &self,
        command: impl FnOnce(oneshot::Sender<Transition>) -> ConversationCommand,
    ) -> Transition {
        let (reply, rx) = oneshot::channel();
        if self.command_tx.send(command(reply)).await.is_err() {
            return Transition::default();
        }
        rx.await.unwrap_or_default()
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.bus.remove_listener(self.listener_id);
        debug!(
            component = "conversation",
            event = "conversation.unmounted",
            conversation = %self.key,
            "Conversation unmounted"
        );
    }
}

struct ConversationActor {
    key: ConversationKey,
    api: Arc<dyn ConversationApi>,
    snapshot: Arc<ArcSwap<ConversationSnapshot>>,
    events_tx: broadcast::Sender<ConversationEvent>,
}

/// The controller was dropped while the actor was waiting.
struct Unmounted;

impl ConversationActor {
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<ConversationCommand>,
        mut signal_rx: mpsc::UnboundedReceiver<()>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let _ = self.run_inner(&mut command_rx, &mut signal_rx, &mut shutdown_rx).await;
        debug!(
            component = "conversation",
            event = "conversation.actor.stopped",
            conversation = %self.key,
            "Conversation actor stopped"
        );
    }

    async fn run_inner(
        &self,
        command_rx: &mut mpsc::Receiver<ConversationCommand>,
        signal_rx: &mut mpsc::UnboundedReceiver<()>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Result<(), Unmounted> {
        self.refresh(shutdown).await?;

        loop {
            // Commands first; signals queued ahead of one are applied as a single batch.
            tokio::select! {
                biased;
                _ = &mut *shutdown => return Err(Unmounted),
                command = command_rx.recv() => match command {
                    Some(command) => {
                        let pending = drain_signals(signal_rx);
                        if pending > 0 {
                            self.on_signals(pending, shutdown).await?;
                        }
                        self.handle_command(command, shutdown).await?
                    }
                    None => return Ok(()),
                },
                Some(()) = signal_rx.recv() => {
                    let count = 1 + drain_signals(signal_rx);
                    self.on_signals(count, shutdown).await?
                }
            }
        }
    }

    /// One refetch for `count` relevant pushes; each still counts toward unread.
    async fn on_signals(
        &self,
        count: u32,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Result<(), Unmounted> {
        debug!(
            component = "conversation",
            event = "conversation.signal",
            conversation = %self.key,
            signals = count,
            "Relevant push received, refetching"
        );
        self.refresh(shutdown).await?;

        let mut next = (*self.snapshot.load_full()).clone();
        let mut changed = false;
        for _ in 0..count {
            changed |= next.surface.record_signal();
        }
        if changed {
            let unread = next.surface.unread();
            self.snapshot.store(Arc::new(next));
            let _ = self
                .events_tx
                .send(ConversationEvent::UnreadChanged { unread });
        }
        Ok(())
    }

    async fn handle_command(
        &self,
        command: ConversationCommand,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Result<(), Unmounted> {
        match command {
            ConversationCommand::Open { reply } => {
                let transition = self.apply_surface(ChatSurface::open);
                if transition.refetch {
                    self.refresh(shutdown).await?;
                }
                let _ = reply.send(transition);
            }
            ConversationCommand::Minimize { reply } => {
                let _ = reply.send(self.apply_surface(ChatSurface::minimize));
            }
            ConversationCommand::Close { reply } => {
                let _ = reply.send(self.apply_surface(ChatSurface::close));
            }
            ConversationCommand::Send { content, reply } => {
                let posted = tokio::select! {
                    biased;
                    _ = &mut *shutdown => return Err(Unmounted),
                    result = self.api.post_message(self.key, &content) => result,
                };
                match posted {
                    Ok(()) => {
                        let result = self.refresh(shutdown).await?;
                        let _ = reply.send(result);
                    }
                    Err(error) => {
                        warn!(
                            component = "conversation",
                            event = "conversation.send.failed",
                            conversation = %self.key,
                            error = %error,
                            "Sending message failed"
                        );
                        self.update(|snapshot| snapshot.last_error = Some(error.clone()));
                        let _ = reply.send(Err(error));
                    }
                }
            }
            ConversationCommand::Flush { reply } => {
                let _ = reply.send(());
            }
        }
        Ok(())
    }

    fn apply_surface(&self, action: fn(&mut ChatSurface) -> Transition) -> Transition {
        let mut next = (*self.snapshot.load_full()).clone();
        let before = next.surface.unread();
        let transition = action(&mut next.surface);
        if !transition.changed {
            return transition;
        }
        let state = next.surface.state();
        let unread = next.surface.unread();
        self.snapshot.store(Arc::new(next));

        let _ = self
            .events_tx
            .send(ConversationEvent::SurfaceChanged { state });
        if unread != before {
            let _ = self
                .events_tx
                .send(ConversationEvent::UnreadChanged { unread });
        }
        transition
    }

    /// Full fetch and wholesale replace. The outer `Err` means unmounted mid-fetch.
    async fn refresh(
        &self,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Result<Result<(), FetchError>, Unmounted> {
        let fetched = tokio::select! {
            biased;
            _ = &mut *shutdown => return Err(Unmounted),
            result = self.api.fetch_history(self.key) => result,
        };

        match fetched {
            Ok(messages) => {
                let count = messages.len();
                self.update(|snapshot| {
                    snapshot.messages = messages;
                    snapshot.last_error = None;
                    snapshot.fetch_count += 1;
                });
                let _ = self
                    .events_tx
                    .send(ConversationEvent::MessagesReplaced { count });
                Ok(Ok(()))
            }
            Err(error) => {
                warn!(
                    component = "conversation",
                    event = "conversation.fetch.failed",
                    conversation = %self.key,
                    error = %error,
                    "History fetch failed"
                );
                self.update(|snapshot| {
                    snapshot.last_error = Some(error.clone());
                    snapshot.fetch_count += 1;
                });
                let _ = self.events_tx.send(ConversationEvent::FetchFailed {
                    error: error.clone(),
                });
                Ok(Err(error))
            }
        }
    }

    fn update(&self, change: impl FnOnce(&mut ConversationSnapshot)) {
        let mut next = (*self.snapshot.load_full()).clone();
        change(&mut next);
        self.snapshot.store(Arc::new(next));
    }
}

/// Take every signal already queued without waiting.
fn drain_signals(signal_rx: &mut mpsc::UnboundedReceiver<()>) -> u32 {
    let mut count = 0;
    while signal_rx.try_recv().is_ok() {
        count += 1;
    }
    count
}
