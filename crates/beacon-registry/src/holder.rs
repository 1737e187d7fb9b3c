//! Multi-sourced instance holder
//!
//! One holder per instance id. It keeps the data copies written by each
//! source in insertion order (first writer holds the head position) and
//! maintains the authoritative view: always the oldest live copy. Writes to
//! the head emit notifications; writes behind the head are stored silently.
//!
//! TigerStyle: All mutations of one id are serialized through the holder's
//! lock; head promotion and delta computation are not safe to interleave.

use crate::subject::NotificationSubject;
use beacon_core::instance::InstanceInfo;
use beacon_core::notification::ChangeNotification;
use beacon_core::source::Source;
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of a holder write, as seen by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderStatus {
    /// First copy for this id; an Add notification was emitted
    AddedFirst,
    /// Copy stored or replaced without creating the holder
    AddedChange,
    /// Write rejected: version not newer than the stored copy
    AddExpired,
    /// A copy was removed but others remain (or a non-head copy was removed)
    RemovedFragment,
    /// The last copy was removed; a Delete notification was emitted and the
    /// holder is ready for garbage collection
    RemovedLast,
    /// Removal rejected: no copy for the source, or the stored copy is newer
    RemoveExpired,
}

impl HolderStatus {
    /// True when the write created the first visible copy of the instance
    pub fn is_first_add(&self) -> bool {
        matches!(self, Self::AddedFirst)
    }

    /// True when the write removed the last copy of the instance
    pub fn is_last_remove(&self) -> bool {
        matches!(self, Self::RemovedLast)
    }

    /// True when the write was rejected as stale
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::AddExpired | Self::RemoveExpired)
    }
}

/// Result of a holder mutation
///
/// `Retired` means the holder was already emptied and garbage collected
/// concurrently; the caller must fetch or create a fresh holder and retry.
#[derive(Debug)]
pub(crate) enum HolderWrite {
    Applied(HolderStatus),
    Retired,
}

/// The authoritative (source, data) pair currently visible for an id
#[derive(Debug, Clone)]
pub(crate) struct HolderView {
    pub(crate) source: Source,
    pub(crate) instance: InstanceInfo,
    /// Sequence number of the notification that produced this view
    pub(crate) seq: u64,
}

#[derive(Debug)]
struct HolderState {
    /// Copies in insertion order; index 0 is the head
    copies: Vec<(Source, InstanceInfo)>,
    /// Sequence number of the last head-visible notification
    view_seq: u64,
    /// Set when the last copy is removed; the holder must not be written again
    retired: bool,
}

/// Per-id container reconciling copies from multiple sources
#[derive(Debug)]
pub(crate) struct InstanceHolder {
    id: String,
    state: Mutex<HolderState>,
}

impl InstanceHolder {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(HolderState {
                copies: Vec::new(),
                view_seq: 0,
                retired: false,
            }),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Store or replace the copy for `source`.
    ///
    /// Emits an Add when the holder was empty, a Modify when the head copy
    /// changed, and nothing for a non-head write.
    pub(crate) async fn update(
        &self,
        subject: &NotificationSubject,
        source: &Source,
        data: InstanceInfo,
    ) -> HolderWrite {
        debug_assert_eq!(self.id, data.id(), "holder write for foreign id");

        let mut state = self.state.lock().await;
        if state.retired {
            return HolderWrite::Retired;
        }

        let position = state.copies.iter().position(|(s, _)| s == source);
        let status = match position {
            None => {
                state.copies.push((source.clone(), data.clone()));
                if state.copies.len() == 1 {
                    state.view_seq = subject
                        .publish(source, ChangeNotification::add(data))
                        .await;
                    HolderStatus::AddedFirst
                } else {
                    // Stored behind the head; nothing visible changed.
                    HolderStatus::AddedChange
                }
            }
            Some(index) => {
                let stored_version = state.copies[index].1.version();
                if data.version() <= stored_version {
                    debug!(
                        id = %self.id,
                        %source,
                        incoming = data.version(),
                        stored = stored_version,
                        "rejecting stale write"
                    );
                    return HolderWrite::Applied(HolderStatus::AddExpired);
                }

                let previous = std::mem::replace(&mut state.copies[index].1, data.clone());
                if index == 0 {
                    let deltas = data.diff_older(&previous);
                    if deltas.is_empty() {
                        debug!(id = %self.id, %source, "no-change update for head copy");
                    } else {
                        state.view_seq = subject
                            .publish(source, ChangeNotification::modify(data, deltas))
                            .await;
                    }
                }
                HolderStatus::AddedChange
            }
        };

        HolderWrite::Applied(status)
    }

    /// Remove the copy for `source`, provided the stored copy is not newer
    /// than `data`.
    ///
    /// Emits a Modify when a surviving copy is promoted to head, a Delete
    /// when the last copy goes away, and nothing for a non-head removal.
    pub(crate) async fn remove(
        &self,
        subject: &NotificationSubject,
        source: &Source,
        data: &InstanceInfo,
    ) -> HolderWrite {
        let mut state = self.state.lock().await;
        if state.retired {
            return HolderWrite::Retired;
        }

        let position = match state.copies.iter().position(|(s, _)| s == source) {
            Some(index) => index,
            None => {
                debug!(id = %self.id, %source, "removal for unknown source, no-op");
                return HolderWrite::Applied(HolderStatus::RemoveExpired);
            }
        };

        let stored_version = state.copies[position].1.version();
        if stored_version > data.version() {
            // A newer registration superseded whatever this removal refers
            // to; typically a late eviction racing a fresh register.
            debug!(
                id = %self.id,
                %source,
                removing = data.version(),
                stored = stored_version,
                "rejecting stale removal"
            );
            return HolderWrite::Applied(HolderStatus::RemoveExpired);
        }

        let (_, removed) = state.copies.remove(position);
        if position != 0 {
            return HolderWrite::Applied(HolderStatus::RemovedFragment);
        }

        match state.copies.first().cloned() {
            Some((new_source, new_head)) => {
                let deltas = new_head.diff_older(&removed);
                if deltas.is_empty() {
                    debug!(id = %self.id, "promoted identical head copy");
                } else {
                    state.view_seq = subject
                        .publish(&new_source, ChangeNotification::modify(new_head, deltas))
                        .await;
                }
                HolderWrite::Applied(HolderStatus::RemovedFragment)
            }
            None => {
                state.retired = true;
                subject
                    .publish(source, ChangeNotification::delete(removed))
                    .await;
                HolderWrite::Applied(HolderStatus::RemovedLast)
            }
        }
    }

    /// The currently authoritative view, if any copy is live
    pub(crate) async fn view(&self) -> Option<HolderView> {
        let state = self.state.lock().await;
        state.copies.first().map(|(source, instance)| HolderView {
            source: source.clone(),
            instance: instance.clone(),
            seq: state.view_seq,
        })
    }

    /// Every (source, copy) pair currently stored
    pub(crate) async fn copies(&self) -> Vec<(Source, InstanceInfo)> {
        self.state.lock().await.copies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::instance::{InstanceInfoBuilder, InstanceStatus};
    use beacon_core::notification::ChangeKind;
    use beacon_core::source::Origin;
    use tokio::sync::mpsc;

    fn instance(id: &str, status: InstanceStatus, version: u64) -> InstanceInfo {
        InstanceInfoBuilder::new(id)
            .with_app("shop")
            .with_status(status)
            .with_version(version)
            .build()
            .unwrap()
    }

    fn source(name: &str) -> Source {
        Source::new(Origin::Replicated, name)
    }

    async fn subject_with_sink() -> (
        NotificationSubject,
        mpsc::UnboundedReceiver<crate::subject::SequencedNotification>,
    ) {
        let subject = NotificationSubject::new();
        let rx = subject.subscribe().await;
        (subject, rx)
    }

    fn applied(write: HolderWrite) -> HolderStatus {
        match write {
            HolderWrite::Applied(status) => status,
            HolderWrite::Retired => panic!("unexpected retired holder"),
        }
    }

    #[tokio::test]
    async fn test_first_add_emits_add() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        let status = applied(
            holder
                .update(&subject, &source("a"), instance("i-1", InstanceStatus::Up, 1))
                .await,
        );
        assert_eq!(status, HolderStatus::AddedFirst);

        let note = rx.recv().await.unwrap();
        assert_eq!(note.sourced.change.kind(), ChangeKind::Add);
        assert_eq!(note.sourced.source, source("a"));
    }

    #[tokio::test]
    async fn test_non_head_write_is_silent() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        holder
            .update(&subject, &source("a"), instance("i-1", InstanceStatus::Up, 1))
            .await;
        let status = applied(
            holder
                .update(
                    &subject,
                    &source("b"),
                    instance("i-1", InstanceStatus::Down, 2),
                )
                .await,
        );
        assert_eq!(status, HolderStatus::AddedChange);

        // Only the Add from source a is visible.
        let note = rx.recv().await.unwrap();
        assert_eq!(note.sourced.change.kind(), ChangeKind::Add);
        assert!(rx.try_recv().is_err());

        // The view still belongs to the first writer.
        let view = holder.view().await.unwrap();
        assert_eq!(view.source, source("a"));
        assert_eq!(view.instance.status(), InstanceStatus::Up);
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        holder
            .update(&subject, &source("a"), instance("i-1", InstanceStatus::Up, 5))
            .await;
        rx.recv().await.unwrap();

        for version in [5, 4] {
            let status = applied(
                holder
                    .update(
                        &subject,
                        &source("a"),
                        instance("i-1", InstanceStatus::Down, version),
                    )
                    .await,
            );
            assert_eq!(status, HolderStatus::AddExpired);
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(
            holder.view().await.unwrap().instance.status(),
            InstanceStatus::Up
        );
    }

    #[tokio::test]
    async fn test_head_update_emits_modify_with_delta() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        holder
            .update(&subject, &source("a"), instance("i-1", InstanceStatus::Up, 1))
            .await;
        rx.recv().await.unwrap();

        let status = applied(
            holder
                .update(
                    &subject,
                    &source("a"),
                    instance("i-1", InstanceStatus::Down, 2),
                )
                .await,
        );
        assert_eq!(status, HolderStatus::AddedChange);

        let note = rx.recv().await.unwrap();
        match &note.sourced.change {
            ChangeNotification::Modify { instance, deltas } => {
                assert_eq!(instance.status(), InstanceStatus::Down);
                assert_eq!(deltas.len(), 1);
            }
            other => panic!("expected modify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_change_head_update_is_silent() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        holder
            .update(&subject, &source("a"), instance("i-1", InstanceStatus::Up, 1))
            .await;
        rx.recv().await.unwrap();

        // Same data at a newer version: stored, nothing emitted.
        let status = applied(
            holder
                .update(&subject, &source("a"), instance("i-1", InstanceStatus::Up, 2))
                .await,
        );
        assert_eq!(status, HolderStatus::AddedChange);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_head_removal_promotes_next_copy() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        let head = instance("i-1", InstanceStatus::Up, 1);
        let second = instance("i-1", InstanceStatus::Down, 2);
        holder.update(&subject, &source("a"), head.clone()).await;
        holder.update(&subject, &source("b"), second.clone()).await;
        rx.recv().await.unwrap(); // Add from a

        let status = applied(holder.remove(&subject, &source("a"), &head).await);
        assert_eq!(status, HolderStatus::RemovedFragment);

        let note = rx.recv().await.unwrap();
        assert_eq!(note.sourced.change.kind(), ChangeKind::Modify);
        assert_eq!(note.sourced.source, source("b"));

        let view = holder.view().await.unwrap();
        assert_eq!(view.source, source("b"));
        assert_eq!(view.instance.status(), InstanceStatus::Down);
    }

    #[tokio::test]
    async fn test_last_removal_emits_delete_and_retires() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        let data = instance("i-1", InstanceStatus::Up, 1);
        holder.update(&subject, &source("a"), data.clone()).await;
        rx.recv().await.unwrap();

        let status = applied(holder.remove(&subject, &source("a"), &data).await);
        assert_eq!(status, HolderStatus::RemovedLast);

        let note = rx.recv().await.unwrap();
        assert_eq!(note.sourced.change.kind(), ChangeKind::Delete);

        // Any further write must signal the caller to recreate the holder.
        assert!(matches!(
            holder.update(&subject, &source("a"), data.clone()).await,
            HolderWrite::Retired
        ));
        assert!(matches!(
            holder.remove(&subject, &source("a"), &data).await,
            HolderWrite::Retired
        ));
    }

    #[tokio::test]
    async fn test_removal_of_newer_copy_rejected() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        let old = instance("i-1", InstanceStatus::Up, 1);
        let fresh = instance("i-1", InstanceStatus::Up, 5);
        holder.update(&subject, &source("a"), fresh).await;
        rx.recv().await.unwrap();

        // A late eviction carrying the old record must not unregister the
        // fresh registration.
        let status = applied(holder.remove(&subject, &source("a"), &old).await);
        assert_eq!(status, HolderStatus::RemoveExpired);
        assert_eq!(holder.copies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_source_is_noop() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        let data = instance("i-1", InstanceStatus::Up, 1);
        holder.update(&subject, &source("a"), data.clone()).await;
        rx.recv().await.unwrap();

        let status = applied(holder.remove(&subject, &source("b"), &data).await);
        assert_eq!(status, HolderStatus::RemoveExpired);
        assert_eq!(holder.copies().await.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_head_removal_is_silent() {
        let (subject, mut rx) = subject_with_sink().await;
        let holder = InstanceHolder::new("i-1");

        let head = instance("i-1", InstanceStatus::Up, 1);
        let second = instance("i-1", InstanceStatus::Down, 2);
        holder.update(&subject, &source("a"), head).await;
        holder.update(&subject, &source("b"), second.clone()).await;
        rx.recv().await.unwrap();

        let status = applied(holder.remove(&subject, &source("b"), &second).await);
        assert_eq!(status, HolderStatus::RemovedFragment);
        assert!(rx.try_recv().is_err());
        assert_eq!(holder.view().await.unwrap().source, source("a"));
    }
}
