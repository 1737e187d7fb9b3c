//! I/O abstraction for time
//!
//! TigerStyle: All time reads and sleeps go through an abstraction trait.
//!
//! Registry behaviors that depend on time (eviction expiry, replication
//! back-off, version stamping) take a [`TimeProvider`] so the same code runs
//! against the wall clock in production and against a manually advanced
//! [`SimClock`] in tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// All code that needs current time or sleep MUST use this trait; never
/// `std::time::SystemTime::now()` directly.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Get current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    ///
    /// In production: actual tokio::time::sleep.
    /// In tests: waits for the simulated clock to be advanced.
    async fn sleep_ms(&self, ms: u64);
}

/// Production time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClock;

impl WallClock {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

// ============================================================================
// Simulated Clock
// ============================================================================

/// Deterministic simulation clock
///
/// Time only advances when explicitly told to, enabling reproducible timing
/// tests.
#[derive(Debug, Clone)]
pub struct SimClock {
    /// Current time in milliseconds since epoch
    current_time_ms: Arc<AtomicU64>,
    /// Notify waiters when time advances
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a new SimClock starting at a specific millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Advance time by the given number of milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if a deadline (in ms) has passed
    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::from_millis(0)
    }
}

#[async_trait]
impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        let target_ms = self.now_ms().saturating_add(ms);
        while self.now_ms() < target_ms {
            // Register interest before re-checking so an advance between the
            // check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.now_ms() >= target_ms {
                break;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_advance() {
        let clock = SimClock::from_millis(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);
        assert!(clock.is_past_ms(1_200));
        assert!(!clock.is_past_ms(2_000));
    }

    #[tokio::test]
    async fn test_sim_clock_sleep_wakes_on_advance() {
        let clock = SimClock::from_millis(0);
        let sleeper = clock.clone();

        let handle = tokio::spawn(async move {
            sleeper.sleep_ms(1_000).await;
            sleeper.now_ms()
        });

        tokio::task::yield_now().await;
        clock.advance_ms(1_000);

        let woke_at = handle.await.unwrap();
        assert!(woke_at >= 1_000);
    }

    #[tokio::test]
    async fn test_wall_clock_monotonicish() {
        let clock = WallClock::new();
        let a = clock.now_ms();
        clock.sleep_ms(1).await;
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
