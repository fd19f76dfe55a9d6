//! Ordered, thread-safe notification buffer drained by the owning engine.

use std::collections::VecDeque;
use std::sync::Mutex;

use spbridge_core::Notification;

/// FIFO sink for store notifications. Producers append from any thread or
/// task; `drain` returns everything queued at call time. Appends racing a
/// drain stay queued for the next call, so each notification is delivered
/// exactly once.
#[derive(Default)]
pub struct NotificationSink {
    queue: Mutex<VecDeque<Notification>>,
}

impl NotificationSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, notification: Notification) {
        self.queue.lock().unwrap().push_back(notification);
    }

    /// Remove and return all currently queued notifications in FIFO order.
    #[must_use]
    pub fn drain(&self) -> Vec<Notification> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
