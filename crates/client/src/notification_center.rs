//! Notification center: the console-wide consumer of the listener bus.
//!
//! Keeps the newest notifications (bounded), tracks read state and never
//! mutates a dispatched notification; marking read stores a new copy.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dispatchlink_protocol::Notification;
use tracing::debug;

use crate::bus::{ListenerBus, ListenerId};

pub const DEFAULT_CAPACITY: usize = 100;

struct Inbox {
    capacity: usize,
    /// Newest first
    items: VecDeque<Notification>,
}

impl Inbox {
    fn insert(&mut self, notification: &Notification) -> bool {
        if self.items.iter().any(|n| n.id == notification.id) {
            return false;
        }
        self.items.push_front(notification.clone());
        self.items.truncate(self.capacity);
        true
    }
}

/// Detaches from the bus when dropped.
pub struct NotificationCenter {
    inbox: Arc<Mutex<Inbox>>,
    bus: ListenerBus,
    listener_id: ListenerId,
}

impl NotificationCenter {
    pub fn attach(bus: &ListenerBus, capacity: usize) -> Self {
        let inbox = Arc::new(Mutex::new(Inbox {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }));
        let sink = inbox.clone();
        let listener_id = bus.add_listener(move |notification| {
            let stored = sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(notification);
            if !stored {
                debug!(
                    component = "notification_center",
                    event = "notification_center.duplicate",
                    notification_id = %notification.id,
                    "Duplicate notification ignored"
                );
            }
            Ok(())
        });
        Self {
            inbox,
            bus: bus.clone(),
            listener_id,
        }
    }

    /// Newest first
    pub fn list(&self) -> Vec<Notification> {
        self.lock().items.iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.lock().items.iter().find(|n| n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_count(&self) -> usize {
        self.lock().items.iter().filter(|n| !n.is_read).count()
    }

    /// Returns false when `id` is unknown.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut inbox = self.lock();
        match inbox.items.iter_mut().find(|n| n.id == id) {
            Some(slot) => {
                if !slot.is_read {
                    *slot = slot.marked_read();
                }
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) {
        let mut inbox = self.lock();
        for slot in inbox.items.iter_mut().filter(|n| !n.is_read) {
            *slot = slot.marked_read();
        }
    }

    pub fn clear(&self) {
        self.lock().items.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.bus.remove_listener(self.listener_id);
    }
}
