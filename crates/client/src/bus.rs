//! Listener fan-out bus.
//!
//! Every normalized notification is handed to every registered listener.
//! Isolation contract: a listener that returns an error or panics is logged
//! and skipped; the remaining listeners still run, and so do later dispatches.
//! Listeners get no ordering guarantee relative to each other.
//!
//! Dispatch works on a snapshot of the listener list taken when it starts, so
//! a listener may add or remove listeners (itself included) while running;
//! the change applies from the next dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use dispatchlink_protocol::Notification;
use thiserror::Error;
use tracing::warn;

/// Failure reported by (or caught around) a listener
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("Listener failed: {0}")]
    Failed(String),

    #[error("Listener panicked: {0}")]
    Panicked(String),

    #[error("Listener target is gone")]
    Closed,
}

pub type Listener = Arc<dyn Fn(&Notification) -> Result<(), ListenerError> + Send + Sync>;

/// Registration token returned by [`ListenerBus::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registrations {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Cheap to clone; all clones share one listener list.
#[derive(Clone, Default)]
pub struct ListenerBus {
    inner: Arc<Mutex<Registrations>>,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Returns false when `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(existing, _)| *existing != id);
        inner.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `notification` to every listener. Returns how many succeeded.
    pub fn dispatch(&self, notification: &Notification) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = self.lock().listeners.clone();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(notification)))
                .unwrap_or_else(|panic| {
                    Err(ListenerError::Panicked(panic_message(panic.as_ref())))
                });
            match outcome {
                Ok(()) => delivered += 1,
                Err(error) => warn!(
                    component = "bus",
                    event = "bus.listener.failed",
                    listener_id = id.0,
                    notification_id = %notification.id,
                    error = %error,
                    "Listener failed, continuing fan-out"
                ),
            }
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registrations> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
