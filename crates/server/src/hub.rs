//! Fan-out hub: live subscriber registry plus the bounded replay history.
//!
//! Registry and history share one lock. `join` registers the subscriber and
//! snapshots the history in the same critical section `broadcast` uses, so a
//! subscriber joining concurrently with a broadcast sees each batch exactly
//! once: in its replay snapshot or live, never both, never neither.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Most recent broadcasts replayed to late joiners.
pub const HISTORY_CAP: usize = 300;
/// Per-subscriber mailbox depth before drop-and-disconnect kicks in.
pub const MAILBOX_CAP: usize = 64;

struct Subscriber {
    id: u64,
    mailbox: mpsc::Sender<Bytes>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Vec<Subscriber>,
    history: VecDeque<Bytes>,
}

pub struct Hub {
    inner: Mutex<HubInner>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Hub {
            inner: Mutex::new(HubInner::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a subscriber mailbox and returns its deregistration guard
    /// together with a replay snapshot of the current history.
    pub fn join(self: &Arc<Self>, mailbox: mpsc::Sender<Bytes>) -> (SubscriberGuard, Vec<Bytes>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.push(Subscriber { id, mailbox });
        let history = inner.history.iter().cloned().collect();
        drop(inner);

        debug!(subscriber = id, "subscriber joined");
        (
            SubscriberGuard {
                hub: Arc::clone(self),
                id,
            },
            history,
        )
    }

    /// Appends the batch to history and enqueues it into every live
    /// mailbox. Never blocks: a full mailbox means the subscriber is too
    /// slow and gets dropped on the spot, as does one whose mailbox closed.
    pub fn broadcast(&self, batch: Bytes) {
        let mut inner = self.inner.lock().unwrap();

        if inner.history.len() == HISTORY_CAP {
            inner.history.pop_front();
        }
        inner.history.push_back(batch.clone());

        inner.subscribers.retain(|sub| {
            match sub.mailbox.try_send(batch.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = sub.id, "mailbox full, dropping slow subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = sub.id, "mailbox closed, dropping subscriber");
                    false
                }
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|sub| sub.id != id);
    }
}

/// One-shot deregistration capability. Dropping it removes the subscriber
/// from the registry; that drops the hub's clone of the mailbox sender,
/// which closes the mailbox and lets the delivery task terminate.
pub struct SubscriberGuard {
    hub: Arc<Hub>,
    id: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u32) -> Bytes {
        Bytes::copy_from_slice(&n.to_le_bytes())
    }

    fn value(batch: &Bytes) -> u32 {
        u32::from_le_bytes(batch[..4].try_into().unwrap())
    }

    #[tokio::test]
    async fn replay_is_empty_before_any_broadcast() {
        let hub = Arc::new(Hub::new());
        let (tx, _rx) = mpsc::channel(8);
        let (_guard, history) = hub.join(tx);
        assert!(history.is_empty());
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn live_batches_arrive_in_broadcast_order() {
        let hub = Arc::new(Hub::new());
        let (tx, mut rx) = mpsc::channel(8);
        let (_guard, _) = hub.join(tx);

        for n in 0..3 {
            hub.broadcast(payload(n));
        }
        for n in 0..3 {
            assert_eq!(value(&rx.recv().await.unwrap()), n);
        }
    }

    #[tokio::test]
    async fn history_keeps_exactly_the_most_recent_300() {
        let hub = Arc::new(Hub::new());
        for n in 0..=300u32 {
            hub.broadcast(payload(n));
        }

        let (tx, _rx) = mpsc::channel(8);
        let (_guard, history) = hub.join(tx);
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(value(&history[0]), 1);
        assert_eq!(value(&history[HISTORY_CAP - 1]), 300);
    }

    #[tokio::test]
    async fn full_mailbox_drops_the_subscriber_without_blocking() {
        let hub = Arc::new(Hub::new());
        let (tx, mut rx) = mpsc::channel(1);
        let (_guard, _) = hub.join(tx);

        hub.broadcast(payload(1));
        hub.broadcast(payload(2));
        assert_eq!(hub.subscriber_count(), 0);

        // The batch accepted before the overflow is still deliverable.
        assert_eq!(value(&rx.recv().await.unwrap()), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_guard_deregisters_and_closes_the_mailbox() {
        let hub = Arc::new(Hub::new());
        let (tx, mut rx) = mpsc::channel(8);
        let (guard, _) = hub.join(tx);

        drop(guard);
        assert_eq!(hub.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());

        // Broadcasts after deregistration reach nobody but still land in
        // history.
        hub.broadcast(payload(7));
        let (_guard, history) = hub.join(mpsc::channel(8).0);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_join_sees_each_batch_exactly_once() {
        const TOTAL: u32 = 600;
        let hub = Arc::new(Hub::new());

        let broadcaster = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for n in 0..TOTAL {
                    hub.broadcast(payload(n));
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let (tx, mut rx) = mpsc::channel(TOTAL as usize);
        let (_guard, history) = hub.join(tx);
        broadcaster.await.unwrap();

        let mut seen: Vec<u32> = history.iter().map(value).collect();
        // Every broadcast after the join went through try_send before the
        // broadcaster task finished, so the mailbox is fully populated.
        while let Ok(batch) = rx.try_recv() {
            seen.push(value(&batch));
        }

        // No duplicate and no gap across the replay/live boundary.
        for pair in seen.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
        assert_eq!(*seen.last().unwrap(), TOTAL - 1);
    }
}
