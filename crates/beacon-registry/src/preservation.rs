//! Self-preservation
//!
//! Watches expected-vs-actual registry size and gates eviction quota. When
//! too many instances expire at once (the signature of a network partition,
//! not of mass deregistration) eviction is suspended until the size ratio
//! recovers.

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::eviction::{EvictionQueue, EvictionQuota, EvictionSubscription};
use crate::holder::HolderStatus;
use crate::index::ChangeNotificationStream;
use crate::store::{RegistryStore, SourcedRegistry};
use async_trait::async_trait;
use beacon_core::constants::{
    EVICTION_UNREGISTER_ATTEMPTS_MAX, SELF_PRESERVATION_FLOOR_RATIO_DEFAULT,
};
use beacon_core::delta::Delta;
use beacon_core::instance::InstanceInfo;
use beacon_core::interest::Interest;
use beacon_core::metrics;
use beacon_core::source::{Source, SourceMatcher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

// =============================================================================
// Allowance strategy
// =============================================================================

/// Decides whether eviction may proceed given expected and actual registry
/// sizes
pub trait EvictionAllowance: Send + Sync + std::fmt::Debug {
    /// True when evicting one more instance is acceptable
    fn allowed_to_evict(&self, expected_size: usize, actual_size: usize) -> bool;
}

/// Allow eviction while actual-size / expected-size stays at or above a
/// configured floor ratio
#[derive(Debug, Clone)]
pub struct PercentageDropAllowance {
    floor_ratio: f64,
}

impl PercentageDropAllowance {
    /// Create an allowance with the given floor ratio, clamped to [0, 1]
    pub fn new(floor_ratio: f64) -> Self {
        Self {
            floor_ratio: floor_ratio.clamp(0.0, 1.0),
        }
    }
}

impl Default for PercentageDropAllowance {
    fn default() -> Self {
        Self::new(SELF_PRESERVATION_FLOOR_RATIO_DEFAULT)
    }
}

impl EvictionAllowance for PercentageDropAllowance {
    fn allowed_to_evict(&self, expected_size: usize, actual_size: usize) -> bool {
        if expected_size == 0 {
            return true;
        }
        (actual_size as f64) / (expected_size as f64) >= self.floor_ratio
    }
}

// =============================================================================
// Preservable registry
// =============================================================================

/// Registry wrapper that cooperates with the eviction queue to control
/// expiry of abruptly disconnected channels
///
/// Tracks the expected registry size as a high-water mark (raised on every
/// first-add, lowered on every client-driven last-remove). Eviction-driven
/// removals bypass the wrapper, so a mass expiry drops the actual size below
/// the expected size and trips the allowance check.
#[derive(Debug)]
pub struct PreservableRegistry {
    inner: Arc<RegistryStore>,
    queue: Arc<EvictionQueue>,
    allowance: Arc<dyn EvictionAllowance>,
    quota: EvictionQuota,
    expected_size: AtomicUsize,
    self_preservation: AtomicBool,
}

impl PreservableRegistry {
    /// Wrap `inner`, consuming the queue's single eviction subscription.
    ///
    /// Fails if the queue already has a subscriber.
    pub fn new(
        inner: Arc<RegistryStore>,
        queue: Arc<EvictionQueue>,
        allowance: Arc<dyn EvictionAllowance>,
    ) -> RegistryResult<Arc<Self>> {
        let subscription = queue.pending_evictions()?;
        let quota = subscription.granter();

        let registry = Arc::new(Self {
            inner,
            queue,
            allowance,
            quota,
            expected_size: AtomicUsize::new(0),
            self_preservation: AtomicBool::new(false),
        });

        // One credit outstanding; each drained item decides whether to grant
        // the next.
        registry.quota.grant(1);
        tokio::spawn(Self::drain_loop(Arc::clone(&registry), subscription));

        Ok(registry)
    }

    /// Assemble a preservable registry from a configuration: a fresh
    /// eviction queue plus a percentage-drop allowance
    pub fn with_config(
        inner: Arc<RegistryStore>,
        config: &RegistryConfig,
        time: Arc<dyn beacon_core::io::TimeProvider>,
    ) -> RegistryResult<Arc<Self>> {
        let queue = Arc::new(EvictionQueue::new(config.eviction_timeout_ms, time));
        let allowance = Arc::new(PercentageDropAllowance::new(
            config.self_preservation_floor_ratio,
        ));
        Self::new(inner, queue, allowance)
    }

    /// Whether eviction is currently suspended
    pub fn in_self_preservation(&self) -> bool {
        self.self_preservation.load(Ordering::SeqCst)
    }

    /// Current expected-size high-water mark
    pub fn expected_size(&self) -> usize {
        self.expected_size.load(Ordering::SeqCst)
    }

    /// The eviction queue feeding this registry
    pub fn eviction_queue(&self) -> &Arc<EvictionQueue> {
        &self.queue
    }

    /// Move every copy not retained by `matcher` into the eviction queue.
    ///
    /// Used when a node wants to drop everything a disappeared peer ever
    /// sent without removing it abruptly.
    pub async fn evict_all_except(&self, retain: &SourceMatcher) -> usize {
        let mut queued = 0;
        for (source, instance) in self.inner.all_copies().await {
            if !retain.matches(&source) {
                self.queue.add(instance, source).await;
                queued += 1;
            }
        }
        info!(queued, "bulk-queued copies for eviction");
        queued
    }

    async fn drain_loop(registry: Arc<Self>, mut subscription: EvictionSubscription) {
        while let Some(item) = subscription.next().await {
            // Unregister directly against the inner store: eviction must not
            // lower the expected-size high-water mark.
            let mut attempts = 0;
            loop {
                attempts += 1;
                match registry
                    .inner
                    .unregister(item.instance.clone(), item.source.clone())
                    .await
                {
                    Ok(status) => {
                        info!(
                            id = %item.instance.id(),
                            source = %item.source,
                            ?status,
                            "evicted registry entry"
                        );
                        break;
                    }
                    Err(error) if attempts < EVICTION_UNREGISTER_ATTEMPTS_MAX => {
                        warn!(%error, id = %item.instance.id(), "eviction unregister failed, retrying");
                    }
                    Err(error) => {
                        warn!(%error, id = %item.instance.id(), "eviction unregister abandoned");
                        break;
                    }
                }
            }

            let expected = registry.expected_size();
            let actual = registry.inner.size().await;
            if registry.allowance.allowed_to_evict(expected, actual) {
                subscription.grant(1);
            } else if !registry.self_preservation.swap(true, Ordering::SeqCst) {
                metrics::record_self_preservation(true);
                info!(expected, actual, "entering self preservation mode");
            }
        }
    }

    /// Re-evaluate the allowance after a registry event and resume eviction
    /// if the size ratio recovered
    async fn maybe_resume_eviction(&self) {
        if !self.self_preservation.load(Ordering::SeqCst) {
            return;
        }
        let expected = self.expected_size();
        let actual = self.inner.size().await;
        if self.allowance.allowed_to_evict(expected, actual)
            && self.self_preservation.swap(false, Ordering::SeqCst)
        {
            metrics::record_self_preservation(false);
            info!(expected, actual, "coming out of self preservation mode");
            self.quota.grant(1);
        }
    }
}

#[async_trait]
impl SourcedRegistry for PreservableRegistry {
    async fn register(
        &self,
        instance: InstanceInfo,
        source: Source,
    ) -> RegistryResult<HolderStatus> {
        let status = self.inner.register(instance, source).await?;
        if status.is_first_add() {
            let size = self.inner.size().await;
            self.expected_size.fetch_max(size, Ordering::SeqCst);
        }
        self.maybe_resume_eviction().await;
        Ok(status)
    }

    async fn unregister(
        &self,
        instance: InstanceInfo,
        source: Source,
    ) -> RegistryResult<HolderStatus> {
        let status = self.inner.unregister(instance, source).await?;
        if status.is_last_remove() {
            let _ = self
                .expected_size
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                    Some(size.saturating_sub(1))
                });
        }
        self.maybe_resume_eviction().await;
        Ok(status)
    }

    async fn update(
        &self,
        instance: InstanceInfo,
        deltas: Vec<Delta>,
        source: Source,
    ) -> RegistryResult<HolderStatus> {
        let status = self.inner.update(instance, deltas, source).await?;
        self.maybe_resume_eviction().await;
        Ok(status)
    }

    async fn size(&self) -> usize {
        self.inner.size().await
    }

    async fn for_snapshot(&self, interest: &Interest) -> Vec<InstanceInfo> {
        self.inner.for_snapshot(interest).await
    }

    async fn for_snapshot_filtered(
        &self,
        interest: &Interest,
        matcher: &SourceMatcher,
    ) -> Vec<InstanceInfo> {
        self.inner.for_snapshot_filtered(interest, matcher).await
    }

    async fn for_interest(&self, interest: &Interest) -> ChangeNotificationStream {
        self.inner.for_interest(interest).await
    }

    async fn for_interest_filtered(
        &self,
        interest: &Interest,
        matcher: SourceMatcher,
    ) -> ChangeNotificationStream {
        self.inner.for_interest_filtered(interest, matcher).await
    }

    async fn shutdown(&self) {
        info!("shutting down the preservable registry");
        self.queue.shutdown();
        self.inner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_allowance() {
        let allowance = PercentageDropAllowance::new(0.85);

        // Empty registry: nothing to preserve.
        assert!(allowance.allowed_to_evict(0, 0));
        // Equal sizes may still hold stale copies.
        assert!(allowance.allowed_to_evict(100, 100));
        assert!(allowance.allowed_to_evict(100, 85));
        assert!(!allowance.allowed_to_evict(100, 84));
        assert!(!allowance.allowed_to_evict(100, 50));
    }

    #[test]
    fn test_allowance_ratio_clamped() {
        let allowance = PercentageDropAllowance::new(7.5);
        // Clamped to 1.0: only a full registry allows eviction.
        assert!(allowance.allowed_to_evict(10, 10));
        assert!(!allowance.allowed_to_evict(10, 9));
    }
}
