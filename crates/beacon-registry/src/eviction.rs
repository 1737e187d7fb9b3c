//! Eviction queue
//!
//! Time-ordered pending-removal queue absorbing abrupt channel disconnects.
//! Producers (channels) append; exactly one consumer drains due items under
//! credit-based flow control, so the self-preservation gate can suspend and
//! resume eviction without busy-waiting.
//!
//! TigerStyle: Explicit expiry per item, bounded reschedule interval,
//! single-subscriber enforced.

use crate::error::{RegistryError, RegistryResult};
use beacon_core::constants::EVICTION_RESCHEDULE_MS_MIN;
use beacon_core::instance::InstanceInfo;
use beacon_core::io::TimeProvider;
use beacon_core::metrics;
use beacon_core::source::Source;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

/// One pending removal
#[derive(Debug, Clone)]
pub struct EvictionItem {
    /// Last known record of the instance
    pub instance: InstanceInfo,
    /// Source whose copy is to be removed
    pub source: Source,
    /// Epoch milliseconds after which the item is due
    pub expiry_ms: u64,
}

/// What the drain loop found at the front of the queue
enum DrainWait {
    /// The front item is due
    Due,
    /// Nothing due before this deadline
    Until(u64),
    /// Queue is empty
    Empty,
}

/// Delayed-removal buffer with a single credit-controlled consumer
#[derive(Debug)]
pub struct EvictionQueue {
    eviction_timeout_ms: u64,
    time: Arc<dyn TimeProvider>,
    items: Mutex<VecDeque<EvictionItem>>,
    quota: AtomicU64,
    wakeup: Notify,
    subscribed: AtomicBool,
    shut_down: AtomicBool,
}

impl EvictionQueue {
    /// Create a queue whose items become due `eviction_timeout_ms` after
    /// they are added
    pub fn new(eviction_timeout_ms: u64, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            eviction_timeout_ms,
            time,
            items: Mutex::new(VecDeque::new()),
            quota: AtomicU64::new(0),
            wakeup: Notify::new(),
            subscribed: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Append an instance for delayed removal.
    ///
    /// Items expire in insertion order because the timeout is fixed.
    pub async fn add(&self, instance: InstanceInfo, source: Source) {
        let expiry_ms = self.time.now_ms().saturating_add(self.eviction_timeout_ms);
        debug!(id = %instance.id(), %source, expiry_ms, "queueing instance for eviction");
        self.items.lock().await.push_back(EvictionItem {
            instance,
            source,
            expiry_ms,
        });
        self.wakeup.notify_waiters();
    }

    /// Number of pending items
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Whether the queue has no pending items
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Attach the single allowed consumer.
    ///
    /// Errors if a subscription is already active; drop it to re-subscribe.
    pub fn pending_evictions(self: &Arc<Self>) -> RegistryResult<EvictionSubscription> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::EvictionQueueSubscribed);
        }
        Ok(EvictionSubscription {
            queue: Arc::clone(self),
        })
    }

    /// Stop the queue; the consumer's `next()` returns `None`
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    fn try_take_quota(&self) -> bool {
        let mut current = self.quota.load(Ordering::SeqCst);
        while current > 0 {
            match self.quota.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

/// Grants eviction quota to the queue's consumer loop
///
/// Each granted unit permits exactly one delivered eviction.
#[derive(Debug, Clone)]
pub struct EvictionQuota {
    queue: Arc<EvictionQueue>,
}

impl EvictionQuota {
    /// Permit `n` further evictions
    pub fn grant(&self, n: u64) {
        self.queue.quota.fetch_add(n, Ordering::SeqCst);
        self.queue.wakeup.notify_waiters();
    }
}

/// The single consumer of an [`EvictionQueue`]
#[derive(Debug)]
pub struct EvictionSubscription {
    queue: Arc<EvictionQueue>,
}

impl EvictionSubscription {
    /// Handle for granting quota from elsewhere (the preservation gate)
    pub fn granter(&self) -> EvictionQuota {
        EvictionQuota {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Permit `n` further evictions
    pub fn grant(&self, n: u64) {
        self.granter().grant(n);
    }

    /// Wait for the next due item, honoring quota.
    ///
    /// Returns `None` once the queue is shut down. When quota is exhausted
    /// but items are due, the loop re-checks no more often than
    /// [`EVICTION_RESCHEDULE_MS_MIN`].
    pub async fn next(&mut self) -> Option<EvictionItem> {
        loop {
            if self.queue.shut_down.load(Ordering::SeqCst) {
                return None;
            }

            // Register for wakeups before inspecting state so a concurrent
            // add/grant/shutdown is not missed.
            let notified = self.queue.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = self.queue.time.now_ms();
            let wait = {
                let items = self.queue.items.lock().await;
                match items.front() {
                    Some(item) if item.expiry_ms <= now => DrainWait::Due,
                    Some(item) => DrainWait::Until(item.expiry_ms),
                    None => DrainWait::Empty,
                }
            };

            match wait {
                DrainWait::Due => {
                    if self.queue.try_take_quota() {
                        // Only this consumer pops, so the due item is still
                        // at the front after re-locking.
                        if let Some(item) = self.queue.items.lock().await.pop_front() {
                            metrics::record_eviction();
                            info!(
                                id = %item.instance.id(),
                                source = %item.source,
                                "eviction item due"
                            );
                            return Some(item);
                        }
                        continue;
                    }
                    // Quota exhausted while items are due: re-check no more
                    // often than the reschedule floor.
                    tokio::select! {
                        _ = self.queue.time.sleep_ms(EVICTION_RESCHEDULE_MS_MIN) => {}
                        _ = &mut notified => {}
                    }
                }
                DrainWait::Until(expiry_ms) => {
                    let delay_ms = expiry_ms
                        .saturating_sub(now)
                        .max(EVICTION_RESCHEDULE_MS_MIN);
                    tokio::select! {
                        _ = self.queue.time.sleep_ms(delay_ms) => {}
                        _ = &mut notified => {}
                    }
                }
                DrainWait::Empty => {
                    notified.await;
                }
            }
        }
    }
}

impl Drop for EvictionSubscription {
    fn drop(&mut self) {
        self.queue.subscribed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::instance::{InstanceInfoBuilder, InstanceStatus};
    use beacon_core::io::SimClock;
    use std::time::Duration;

    fn instance(id: &str) -> InstanceInfo {
        InstanceInfoBuilder::new(id)
            .with_status(InstanceStatus::Up)
            .with_version(1)
            .build()
            .unwrap()
    }

    fn queue_with_clock(timeout_ms: u64) -> (Arc<EvictionQueue>, SimClock) {
        let clock = SimClock::from_millis(1_000);
        let queue = Arc::new(EvictionQueue::new(timeout_ms, Arc::new(clock.clone())));
        (queue, clock)
    }

    #[tokio::test]
    async fn test_single_subscriber_enforced() {
        let (queue, _clock) = queue_with_clock(1_000);

        let first = queue.pending_evictions().unwrap();
        assert!(matches!(
            queue.pending_evictions(),
            Err(RegistryError::EvictionQueueSubscribed)
        ));

        // Dropping the subscription frees the slot.
        drop(first);
        assert!(queue.pending_evictions().is_ok());
    }

    #[tokio::test]
    async fn test_item_not_delivered_before_timeout() {
        let (queue, clock) = queue_with_clock(5_000);
        let mut sub = queue.pending_evictions().unwrap();
        sub.grant(10);

        queue.add(instance("i-1"), Source::new_local()).await;

        // Not yet due: the simulated clock has not advanced.
        let early = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(early.is_err(), "item delivered before its expiry");

        clock.advance_ms(5_000);
        let item = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("item not delivered after expiry")
            .unwrap();
        assert_eq!(item.instance.id(), "i-1");
        assert_eq!(item.expiry_ms, 6_000);
    }

    #[tokio::test]
    async fn test_quota_gates_delivery() {
        let (queue, clock) = queue_with_clock(1_000);
        let mut sub = queue.pending_evictions().unwrap();

        queue.add(instance("i-1"), Source::new_local()).await;
        queue.add(instance("i-2"), Source::new_local()).await;
        clock.advance_ms(2_000);

        // Due, but no quota granted.
        let starved = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(starved.is_err(), "item delivered without quota");

        sub.grant(1);
        let first = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.instance.id(), "i-1");

        // One credit bought exactly one item.
        let starved = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(starved.is_err(), "second item delivered on spent quota");

        sub.grant(1);
        let second = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.instance.id(), "i-2");
    }

    #[tokio::test]
    async fn test_items_drain_in_insertion_order() {
        let (queue, clock) = queue_with_clock(1_000);
        let mut sub = queue.pending_evictions().unwrap();
        sub.grant(3);

        for id in ["a", "b", "c"] {
            queue.add(instance(id), Source::new_local()).await;
        }
        assert_eq!(queue.len().await, 3);

        clock.advance_ms(1_500);
        for expected in ["a", "b", "c"] {
            let item = tokio::time::timeout(Duration::from_secs(1), sub.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(item.instance.id(), expected);
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscription() {
        let (queue, _clock) = queue_with_clock(1_000);
        let mut sub = queue.pending_evictions().unwrap();

        queue.shutdown();
        assert!(sub.next().await.is_none());
    }
}
