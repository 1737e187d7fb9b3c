//! Shared change-notification fan-out
//!
//! Every accepted registry write publishes exactly one notification here.
//! The subject stamps a process-wide monotonic sequence number on each
//! notification and delivers it to all registered sinks over unbounded
//! channels, so a slow subscriber can never block a writer.
//!
//! Publication for one instance id always happens under that id's holder
//! lock, which makes sequence numbers strictly increasing per id. Interest
//! indexes rely on this to stitch a snapshot and the live stream together
//! without gaps or duplicates.

use beacon_core::notification::{ChangeNotification, SourcedChangeNotification};
use beacon_core::source::Source;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

/// A change notification stamped with its global sequence number
#[derive(Debug, Clone)]
pub(crate) struct SequencedNotification {
    pub(crate) seq: u64,
    pub(crate) sourced: SourcedChangeNotification,
}

/// Process-shared notification fan-out point
#[derive(Debug)]
pub(crate) struct NotificationSubject {
    next_seq: AtomicU64,
    /// `None` once the subject is closed
    sinks: RwLock<Option<Vec<mpsc::UnboundedSender<SequencedNotification>>>>,
}

impl NotificationSubject {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            sinks: RwLock::new(Some(Vec::new())),
        }
    }

    /// Publish a notification to every sink, returning its sequence number.
    ///
    /// Callers must hold the holder lock of the instance the notification is
    /// about, so that per-id sequence numbers reflect write order.
    pub(crate) async fn publish(&self, source: &Source, change: ChangeNotification) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self.sinks.write().await;
        if let Some(sinks) = guard.as_mut() {
            let item = SequencedNotification {
                seq,
                sourced: SourcedChangeNotification::new(source.clone(), change),
            };
            sinks.retain(|sink| sink.send(item.clone()).is_ok());
        }
        seq
    }

    /// Attach a new sink receiving every notification published from now on.
    ///
    /// After close the returned receiver is already terminated.
    pub(crate) async fn subscribe(&self) -> mpsc::UnboundedReceiver<SequencedNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.sinks.write().await;
        match guard.as_mut() {
            Some(sinks) => sinks.push(tx),
            None => drop(tx),
        }
        rx
    }

    /// Drop all sinks and reject future subscriptions
    pub(crate) async fn close(&self) {
        *self.sinks.write().await = None;
    }
}
