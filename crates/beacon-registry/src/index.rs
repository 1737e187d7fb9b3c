//! Per-interest index materializations
//!
//! An index gives every subscriber of one interest a gap-free,
//! duplicate-free view: first everything that already matched when the
//! subscription started, then every subsequent live change. Indexes are
//! interned per distinct interest value so repeated subscriptions share one
//! upstream computation.
//!
//! Each index runs as a task owning a compacted init-state map (Modify
//! rewritten as Add, Delete removes the entry) seeded from a registry
//! snapshot taken after the live sink was attached. Per-id sequence numbers
//! disambiguate the seam: a live notification whose sequence is not newer
//! than the seeded entry is already reflected in the snapshot and is
//! dropped. Subscribers attach inside the task loop, so replaying the
//! compacted state and switching to live flow is atomic with respect to the
//! index's stream.

use crate::subject::SequencedNotification;
use beacon_core::instance::InstanceInfo;
use beacon_core::interest::Interest;
use beacon_core::notification::{ChangeKind, ChangeNotification, SourcedChangeNotification};
use beacon_core::source::{Source, SourceMatcher};
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

// =============================================================================
// Subscriber stream
// =============================================================================

/// Continuous, non-terminating stream of registry changes for one interest
///
/// Terminates only when the registry shuts down. The optional source matcher
/// drops notifications whose causing write came from a non-matching source.
#[derive(Debug)]
pub struct ChangeNotificationStream {
    rx: mpsc::UnboundedReceiver<SequencedNotification>,
    matcher: Option<SourceMatcher>,
}

impl ChangeNotificationStream {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<SequencedNotification>,
        matcher: Option<SourceMatcher>,
    ) -> Self {
        Self { rx, matcher }
    }

    /// A stream that is already terminated
    pub(crate) fn terminated() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);
        Self { rx, matcher: None }
    }

    fn passes(&self, item: &SequencedNotification) -> bool {
        self.matcher
            .as_ref()
            .map_or(true, |matcher| matcher.matches(&item.sourced.source))
    }

    /// Receive the next matching notification, or `None` once the registry
    /// has shut down
    pub async fn recv(&mut self) -> Option<SourcedChangeNotification> {
        loop {
            let item = self.rx.recv().await?;
            if self.passes(&item) {
                return Some(item.sourced);
            }
        }
    }
}

impl futures::Stream for ChangeNotificationStream {
    type Item = SourcedChangeNotification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(item)) => {
                    if this.passes(&item) {
                        return Poll::Ready(Some(item.sourced));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// =============================================================================
// Index actor
// =============================================================================

pub(crate) enum IndexCommand {
    Subscribe {
        sink: mpsc::UnboundedSender<SequencedNotification>,
    },
}

/// Handle to one spawned index task
#[derive(Debug, Clone)]
pub(crate) struct IndexHandle {
    control: mpsc::UnboundedSender<IndexCommand>,
}

impl IndexHandle {
    /// Spawn an index for `interest`.
    ///
    /// `raw` must have been attached to the notification subject before
    /// `seed` was captured, otherwise changes between the two are lost.
    pub(crate) fn spawn(
        interest: Interest,
        raw: mpsc::UnboundedReceiver<SequencedNotification>,
        seed: Vec<SequencedNotification>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_index(interest, raw, seed, control_rx));
        Self {
            control: control_tx,
        }
    }

    /// Attach a new subscriber; returns `None` if the index already ended
    pub(crate) fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SequencedNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.control
            .send(IndexCommand::Subscribe { sink: tx })
            .ok()
            .map(|_| rx)
    }
}

/// Compacted, Add-form record of the last visible state of one instance
struct IndexEntry {
    seq: u64,
    source: Source,
    instance: InstanceInfo,
}

impl IndexEntry {
    fn to_notification(&self) -> SequencedNotification {
        SequencedNotification {
            seq: self.seq,
            sourced: SourcedChangeNotification::new(
                self.source.clone(),
                ChangeNotification::add(self.instance.clone()),
            ),
        }
    }
}

async fn run_index(
    interest: Interest,
    mut raw: mpsc::UnboundedReceiver<SequencedNotification>,
    seed: Vec<SequencedNotification>,
    mut control: mpsc::UnboundedReceiver<IndexCommand>,
) {
    let mut entries: HashMap<String, IndexEntry> = HashMap::new();
    for item in seed {
        entries.insert(
            item.sourced.change.instance().id().to_string(),
            IndexEntry {
                seq: item.seq,
                source: item.sourced.source,
                instance: item.sourced.change.into_instance(),
            },
        );
    }

    let mut sinks: Vec<mpsc::UnboundedSender<SequencedNotification>> = Vec::new();

    loop {
        tokio::select! {
            command = control.recv() => match command {
                Some(IndexCommand::Subscribe { sink }) => {
                    // Replay-then-attach happens atomically inside this loop:
                    // no live notification can interleave.
                    let mut alive = true;
                    for entry in entries.values() {
                        if sink.send(entry.to_notification()).is_err() {
                            alive = false;
                            break;
                        }
                    }
                    if alive {
                        sinks.push(sink);
                    }
                }
                None => break,
            },
            item = raw.recv() => match item {
                Some(item) => handle_notification(&interest, &mut entries, &mut sinks, item),
                // Subject closed: registry shutdown.
                None => break,
            },
        }
    }

    debug!(?interest, "index task terminated");
}

fn handle_notification(
    interest: &Interest,
    entries: &mut HashMap<String, IndexEntry>,
    sinks: &mut Vec<mpsc::UnboundedSender<SequencedNotification>>,
    item: SequencedNotification,
) {
    let instance = item.sourced.change.instance();
    if !interest.matches(instance) {
        return;
    }

    let id = instance.id().to_string();
    if let Some(entry) = entries.get(&id) {
        if item.seq <= entry.seq {
            // Already reflected in the snapshot this index was seeded from.
            return;
        }
    }

    match item.sourced.change.kind() {
        ChangeKind::Add | ChangeKind::Modify => {
            entries.insert(
                id,
                IndexEntry {
                    seq: item.seq,
                    source: item.sourced.source.clone(),
                    instance: instance.clone(),
                },
            );
        }
        ChangeKind::Delete => {
            if entries.remove(&id).is_none() {
                // Residue of a copy that was already gone when the snapshot
                // was taken; subscribers never saw it.
                warn!(id = %id, "delete for instance unknown to index, dropping");
                return;
            }
        }
    }

    sinks.retain(|sink| sink.send(item.clone()).is_ok());
}

// =============================================================================
// Composite merge
// =============================================================================

/// Merge per-component index streams into one, delivering each (id, seq) at
/// most once. An instance matching several sub-interests is delivered once
/// per logical change.
pub(crate) fn merge_with_dedup(
    inputs: Vec<mpsc::UnboundedReceiver<SequencedNotification>>,
) -> mpsc::UnboundedReceiver<SequencedNotification> {
    let (merged_tx, mut merged_rx) = mpsc::unbounded_channel();
    for mut input in inputs {
        let tx = merged_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = input.recv().await {
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
    }
    drop(merged_tx);

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        // Per-id watermark of the last delivered sequence number. Component
        // streams deliver each id's changes in sequence order, so equal or
        // older sequences are duplicates from sibling components.
        let mut delivered: HashMap<String, u64> = HashMap::new();
        while let Some(item) = merged_rx.recv().await {
            let id = item.sourced.change.instance().id();
            if let Some(&seen) = delivered.get(id) {
                if item.seq <= seen {
                    continue;
                }
            }
            delivered.insert(id.to_string(), item.seq);
            if out_tx.send(item).is_err() {
                break;
            }
        }
    });
    out_rx
}
