//! Registry store
//!
//! Concurrent map from instance id to its multi-sourced holder. Exposes the
//! write operations, point and filtered snapshot queries, and the continuous
//! notification stream backed by the interest index.
//!
//! TigerStyle: the id-to-holder map is the only broadly shared mutable
//! structure; it permits concurrent reads and per-key-exclusive writes
//! through each holder's own lock.

use crate::error::{RegistryError, RegistryResult};
use crate::holder::{HolderStatus, HolderWrite, InstanceHolder};
use crate::index::{merge_with_dedup, ChangeNotificationStream, IndexHandle};
use crate::subject::{NotificationSubject, SequencedNotification};
use async_trait::async_trait;
use beacon_core::delta::Delta;
use beacon_core::instance::InstanceInfo;
use beacon_core::interest::Interest;
use beacon_core::metrics;
use beacon_core::notification::{ChangeNotification, SourcedChangeNotification};
use beacon_core::source::{Source, SourceMatcher};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

// =============================================================================
// Registry trait
// =============================================================================

/// The registry surface shared by the plain store and its preservation
/// wrapper
///
/// # Guarantees
/// - Writes to one instance id never interleave; different ids proceed in
///   parallel
/// - Notifications for one id are emitted in write-acceptance order
/// - `for_interest` streams are gap-free and duplicate-free across the
///   snapshot/live seam
#[async_trait]
pub trait SourcedRegistry: Send + Sync {
    /// Store or replace the copy of `instance` written by `source`
    async fn register(
        &self,
        instance: InstanceInfo,
        source: Source,
    ) -> RegistryResult<HolderStatus>;

    /// Remove the copy of `instance` written by `source`
    async fn unregister(
        &self,
        instance: InstanceInfo,
        source: Source,
    ) -> RegistryResult<HolderStatus>;

    /// Same write path as register, used when only specific fields changed
    async fn update(
        &self,
        instance: InstanceInfo,
        deltas: Vec<Delta>,
        source: Source,
    ) -> RegistryResult<HolderStatus>;

    /// Number of instance ids currently held
    async fn size(&self) -> usize;

    /// One-shot, eventually consistent view of the instances matching
    /// `interest`
    async fn for_snapshot(&self, interest: &Interest) -> Vec<InstanceInfo>;

    /// Snapshot restricted to instances whose authoritative copy came from a
    /// matching source
    async fn for_snapshot_filtered(
        &self,
        interest: &Interest,
        matcher: &SourceMatcher,
    ) -> Vec<InstanceInfo>;

    /// Continuous stream: current state first, then every subsequent change
    /// matching `interest`
    async fn for_interest(&self, interest: &Interest) -> ChangeNotificationStream;

    /// Interest stream restricted to changes caused by matching sources
    async fn for_interest_filtered(
        &self,
        interest: &Interest,
        matcher: SourceMatcher,
    ) -> ChangeNotificationStream;

    /// Tear down streams and drop all state
    async fn shutdown(&self);
}

// =============================================================================
// Store
// =============================================================================

/// In-memory registry store
#[derive(Debug)]
pub struct RegistryStore {
    holders: RwLock<HashMap<String, Arc<InstanceHolder>>>,
    subject: NotificationSubject,
    indexes: Mutex<HashMap<Interest, IndexHandle>>,
    shut_down: AtomicBool,
}

impl RegistryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            holders: RwLock::new(HashMap::new()),
            subject: NotificationSubject::new(),
            indexes: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    async fn holder_or_create(&self, id: &str) -> Arc<InstanceHolder> {
        if let Some(holder) = self.holders.read().await.get(id) {
            return Arc::clone(holder);
        }
        let mut holders = self.holders.write().await;
        Arc::clone(
            holders
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(InstanceHolder::new(id))),
        )
    }

    /// Drop `holder` from the map if it is still the mapped entry for its id
    async fn collect_holder(&self, holder: &Arc<InstanceHolder>) {
        let mut holders = self.holders.write().await;
        if let Some(current) = holders.get(holder.id()) {
            if Arc::ptr_eq(current, holder) {
                holders.remove(holder.id());
            }
        }
    }

    async fn live_holders(&self) -> Vec<Arc<InstanceHolder>> {
        self.holders.read().await.values().cloned().collect()
    }

    fn check_open(&self) -> RegistryResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }
        Ok(())
    }

    async fn do_register(
        &self,
        instance: InstanceInfo,
        source: &Source,
    ) -> RegistryResult<HolderStatus> {
        self.check_open()?;
        loop {
            let holder = self.holder_or_create(instance.id()).await;
            match holder.update(&self.subject, source, instance.clone()).await {
                HolderWrite::Applied(status) => {
                    if status.is_first_add() {
                        metrics::record_registration(&source.origin().to_string());
                    }
                    return Ok(status);
                }
                // Lost the race against a concurrent last-remove: the mapped
                // holder was retired. Collect it and retry on a fresh one.
                HolderWrite::Retired => self.collect_holder(&holder).await,
            }
        }
    }

    async fn do_unregister(
        &self,
        instance: &InstanceInfo,
        source: &Source,
    ) -> RegistryResult<HolderStatus> {
        self.check_open()?;
        let holder = match self.holders.read().await.get(instance.id()) {
            Some(holder) => Arc::clone(holder),
            None => return Ok(HolderStatus::RemoveExpired),
        };

        match holder.remove(&self.subject, source, instance).await {
            HolderWrite::Applied(status) => {
                if status.is_last_remove() {
                    self.collect_holder(&holder).await;
                    metrics::record_unregistration(&source.origin().to_string());
                }
                Ok(status)
            }
            HolderWrite::Retired => {
                self.collect_holder(&holder).await;
                Ok(HolderStatus::RemoveExpired)
            }
        }
    }

    /// Every (source, copy) pair across all holders; used by the
    /// preservation wrapper for bulk eviction
    pub(crate) async fn all_copies(&self) -> Vec<(Source, InstanceInfo)> {
        let mut out = Vec::new();
        for holder in self.live_holders().await {
            out.extend(holder.copies().await);
        }
        out
    }

    /// Current views matching `interest`, as Add-form notifications paired
    /// with the sequence number that produced each view
    async fn snapshot_for_index(&self, interest: &Interest) -> Vec<SequencedNotification> {
        let mut out = Vec::new();
        for holder in self.live_holders().await {
            if let Some(view) = holder.view().await {
                if interest.matches(&view.instance) {
                    out.push(SequencedNotification {
                        seq: view.seq,
                        sourced: SourcedChangeNotification::new(
                            view.source,
                            ChangeNotification::add(view.instance),
                        ),
                    });
                }
            }
        }
        out
    }

    /// Raw index subscription for a non-composite interest
    async fn index_stream(
        &self,
        interest: &Interest,
    ) -> tokio::sync::mpsc::UnboundedReceiver<SequencedNotification> {
        let mut indexes = self.indexes.lock().await;
        if let Some(handle) = indexes.get(interest) {
            if let Some(rx) = handle.subscribe() {
                return rx;
            }
        }
        if self.shut_down.load(Ordering::SeqCst) {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            drop(tx);
            return rx;
        }

        // Attach the live sink before reading the snapshot: a write is then
        // either visible in the snapshot or delivered on the sink, and the
        // per-id sequence numbers collapse the overlap.
        let raw = self.subject.subscribe().await;
        let seed = self.snapshot_for_index(interest).await;
        let handle = IndexHandle::spawn(interest.clone(), raw, seed);
        let rx = handle.subscribe();
        indexes.insert(interest.clone(), handle);
        match rx {
            Some(rx) => rx,
            None => {
                let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
                drop(tx);
                rx
            }
        }
    }

    async fn interest_stream(
        &self,
        interest: &Interest,
        matcher: Option<SourceMatcher>,
    ) -> ChangeNotificationStream {
        match interest {
            Interest::Multiple(parts) => {
                let mut inputs = Vec::with_capacity(parts.len());
                for part in parts {
                    inputs.push(self.index_stream(part).await);
                }
                ChangeNotificationStream::new(merge_with_dedup(inputs), matcher)
            }
            single => ChangeNotificationStream::new(self.index_stream(single).await, matcher),
        }
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourcedRegistry for RegistryStore {
    async fn register(
        &self,
        instance: InstanceInfo,
        source: Source,
    ) -> RegistryResult<HolderStatus> {
        debug!(id = %instance.id(), %source, "register");
        self.do_register(instance, &source).await
    }

    async fn unregister(
        &self,
        instance: InstanceInfo,
        source: Source,
    ) -> RegistryResult<HolderStatus> {
        debug!(id = %instance.id(), %source, "unregister");
        self.do_unregister(&instance, &source).await
    }

    async fn update(
        &self,
        instance: InstanceInfo,
        deltas: Vec<Delta>,
        source: Source,
    ) -> RegistryResult<HolderStatus> {
        debug!(
            id = %instance.id(),
            %source,
            changed_fields = deltas.len(),
            "update"
        );
        let status = self.do_register(instance, &source).await?;
        if !status.is_expired() {
            metrics::record_update(&source.origin().to_string());
        }
        Ok(status)
    }

    async fn size(&self) -> usize {
        self.holders.read().await.len()
    }

    async fn for_snapshot(&self, interest: &Interest) -> Vec<InstanceInfo> {
        self.for_snapshot_filtered(interest, &SourceMatcher::Any)
            .await
    }

    async fn for_snapshot_filtered(
        &self,
        interest: &Interest,
        matcher: &SourceMatcher,
    ) -> Vec<InstanceInfo> {
        let mut out = Vec::new();
        for holder in self.live_holders().await {
            if let Some(view) = holder.view().await {
                if interest.matches(&view.instance) && matcher.matches(&view.source) {
                    out.push(view.instance);
                }
            }
        }
        out
    }

    async fn for_interest(&self, interest: &Interest) -> ChangeNotificationStream {
        self.interest_stream(interest, None).await
    }

    async fn for_interest_filtered(
        &self,
        interest: &Interest,
        matcher: SourceMatcher,
    ) -> ChangeNotificationStream {
        self.interest_stream(interest, Some(matcher)).await
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.subject.close().await;
        self.indexes.lock().await.clear();
        self.holders.write().await.clear();
    }
}
