//! Registry of open event-stream connections.
//!
//! Each subscriber is a bounded queue drained by its own connection task.
//! The push tick only ever `try_send`s, so one slow viewer costs itself
//! frames and never delays the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

/// One encoded event-stream frame, shared by every subscriber of a tick.
pub type Frame = Arc<[u8]>;

/// Frames a subscriber may have queued before it starts skipping.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 8;

/// What one [`SubscriberRegistry::push`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOutcome {
    pub delivered: usize,
    pub skipped: usize,
    pub removed: usize,
}

pub struct SubscriberRegistry {
    queue_capacity: usize,
    inner: Mutex<HashMap<Uuid, mpsc::Sender<Frame>>>,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Frame>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a subscriber and returns its id and frame queue.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        self.lock().insert(id, tx);
        (id, rx)
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Offers `frame` to every subscriber.
    ///
    /// A full queue skips this frame for that subscriber only.  A closed
    /// queue means the connection is gone and the subscriber is removed.
    pub fn push(&self, frame: &Frame) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        let mut subscribers = self.lock();
        subscribers.retain(|id, tx| match tx.try_send(Arc::clone(frame)) {
            Ok(()) => {
                outcome.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                outcome.skipped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("subscriber {id} gone");
                outcome.removed += 1;
                false
            }
        });
        outcome
    }

    /// Drops every subscriber.  Their connection tasks see the queue close
    /// and end the stream.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_QUEUE)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::from(text.as_bytes())
    }

    #[test]
    fn test_push_with_no_subscribers_is_noop() {
        let registry = SubscriberRegistry::default();
        assert_eq!(registry.push(&frame("x")), PushOutcome::default());
    }

    #[test]
    fn test_every_subscriber_gets_the_same_frame() {
        // Arrange
        let registry = SubscriberRegistry::default();
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        // Act
        let outcome = registry.push(&frame("data: 1\r\n\r\n"));

        // Assert
        assert_eq!(outcome.delivered, 2);
        let got_a = rx_a.try_recv().unwrap();
        let got_b = rx_b.try_recv().unwrap();
        assert_eq!(&*got_a, &*got_b);
        assert!(Arc::ptr_eq(&got_a, &got_b));
    }

    #[test]
    fn test_closed_subscriber_is_removed_others_kept() {
        // Arrange
        let registry = SubscriberRegistry::default();
        let (_a, rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        drop(rx_a);

        // Act
        let outcome = registry.push(&frame("x"));

        // Assert
        assert_eq!(outcome, PushOutcome { delivered: 1, skipped: 0, removed: 1 });
        assert_eq!(registry.len(), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_full_subscriber_skips_but_stays() {
        let registry = SubscriberRegistry::new(1);
        let (_id, _rx) = registry.register();

        registry.push(&frame("1"));
        let outcome = registry.push(&frame("2"));

        assert_eq!(outcome.skipped, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear_closes_queues() {
        let registry = SubscriberRegistry::default();
        let (_id, mut rx) = registry.register();

        registry.clear();

        assert!(registry.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_remove_by_id() {
        let registry = SubscriberRegistry::default();
        let (id, _rx) = registry.register();
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
    }
}
