//! End-to-end registry behavior tests
//!
//! Exercises ordering, snapshot/live stitching, eviction timing and
//! self-preservation against the public registry surface.

use beacon_core::instance::{InstanceInfo, InstanceInfoBuilder, InstanceStatus};
use beacon_core::interest::Interest;
use beacon_core::io::SimClock;
use beacon_core::notification::ChangeKind;
use beacon_core::source::Source;
use beacon_registry::{
    EvictionQueue, HolderStatus, PercentageDropAllowance, PreservableRegistry, RegistryStore,
    SourcedRegistry,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn instance(id: &str, version: u64) -> InstanceInfo {
    InstanceInfoBuilder::new(id)
        .with_app("shop")
        .with_status(InstanceStatus::Up)
        .with_metadata_entry("revision", version.to_string())
        .with_version(version)
        .build()
        .unwrap()
}

async fn poll_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn concurrent_same_source_writes_are_totally_ordered() {
    init_tracing();
    let store = Arc::new(RegistryStore::new());
    let source = Source::new_local();

    store
        .register(instance("i-1", 1), source.clone())
        .await
        .unwrap();
    let mut stream = store.for_interest(&Interest::All).await;

    // Replayed initial add.
    let first = stream.recv().await.unwrap();
    assert_eq!(first.change.kind(), ChangeKind::Add);

    // Two writers race 100 versions of the same instance through the store.
    // Writes that lose the version race are rejected and must stay silent.
    let mut handles = Vec::new();
    for offset in 0..2u64 {
        let store = Arc::clone(&store);
        let source = source.clone();
        handles.push(tokio::spawn(async move {
            for step in 0..50u64 {
                let version = 2 + step * 2 + offset;
                let _ = store.register(instance("i-1", version), source.clone()).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every notification for the id carries a strictly larger version than
    // the one before it, and the newest version is eventually visible.
    let mut last_version = 1;
    loop {
        let note = stream.recv().await.unwrap();
        assert_eq!(note.change.kind(), ChangeKind::Modify);
        let version = note.change.instance().version();
        assert!(
            version > last_version,
            "notification out of order: {version} after {last_version}"
        );
        last_version = version;
        if version == 101 {
            break;
        }
    }
}

#[tokio::test]
async fn head_promotion_emits_add_modify_delete() {
    init_tracing();
    let store = RegistryStore::new();
    let source_a = Source::replicated("peer-a");
    let source_b = Source::replicated("peer-b");

    let mut stream = store.for_interest(&Interest::All).await;

    let from_a = InstanceInfoBuilder::new("i-1")
        .with_app("shop")
        .with_status(InstanceStatus::Up)
        .with_version(1)
        .build()
        .unwrap();
    let from_b = InstanceInfoBuilder::new("i-1")
        .with_app("shop")
        .with_status(InstanceStatus::Down)
        .with_version(2)
        .build()
        .unwrap();

    assert_eq!(
        store
            .register(from_a.clone(), source_a.clone())
            .await
            .unwrap(),
        HolderStatus::AddedFirst
    );
    // Second source differs but is not the head: stored silently.
    assert_eq!(
        store
            .register(from_b.clone(), source_b.clone())
            .await
            .unwrap(),
        HolderStatus::AddedChange
    );
    // Removing the head promotes the copy from b.
    assert_eq!(
        store.unregister(from_a, source_a).await.unwrap(),
        HolderStatus::RemovedFragment
    );
    // Removing the promoted copy empties the holder.
    assert_eq!(
        store.unregister(from_b, source_b).await.unwrap(),
        HolderStatus::RemovedLast
    );

    let kinds = [
        stream.recv().await.unwrap().change.kind(),
        stream.recv().await.unwrap().change.kind(),
        stream.recv().await.unwrap().change.kind(),
    ];
    assert_eq!(kinds, [ChangeKind::Add, ChangeKind::Modify, ChangeKind::Delete]);

    // Exactly three notifications: nothing else is pending.
    store.shutdown().await;
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn subscription_during_writes_is_gap_free_and_duplicate_free() {
    init_tracing();
    let store = Arc::new(RegistryStore::new());
    let source = Source::new_local();

    let writer = {
        let store = Arc::clone(&store);
        let source = source.clone();
        tokio::spawn(async move {
            for n in 0..50u32 {
                store
                    .register(instance(&format!("w-{n}"), 1), source.clone())
                    .await
                    .unwrap();
                if n % 8 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    // Subscribe while the writer is mid-flight: part of the data arrives as
    // snapshot replay, the rest as live adds.
    tokio::task::yield_now().await;
    let mut stream = store.for_interest(&Interest::All).await;

    let mut seen: HashSet<String> = HashSet::new();
    let mut delivered: HashSet<(String, u64)> = HashSet::new();
    while seen.len() < 50 {
        let note = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("stream stalled before all instances were seen")
            .expect("stream ended early");
        let instance = note.change.instance();
        let key = (instance.id().to_string(), instance.version());
        assert!(
            delivered.insert(key.clone()),
            "duplicate delivery of {key:?}"
        );
        seen.insert(instance.id().to_string());
    }

    writer.await.unwrap();
}

#[tokio::test]
async fn eviction_respects_timeout_and_quota() {
    init_tracing();
    let clock = SimClock::from_millis(10_000);
    let queue = Arc::new(EvictionQueue::new(2_000, Arc::new(clock.clone())));
    let mut subscription = queue.pending_evictions().unwrap();
    subscription.grant(5);

    queue.add(instance("i-1", 1), Source::new_local()).await;

    // Before the timeout nothing is due.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), subscription.next())
            .await
            .is_err()
    );

    clock.advance_ms(2_000);
    let item = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .expect("due item was not delivered")
        .unwrap();
    assert_eq!(item.instance.id(), "i-1");
    assert_eq!(item.expiry_ms, 12_000);
}

#[tokio::test]
async fn self_preservation_suspends_and_resumes_eviction() {
    init_tracing();
    let clock = SimClock::from_millis(0);
    let store = Arc::new(RegistryStore::new());
    let queue = Arc::new(EvictionQueue::new(1_000, Arc::new(clock.clone())));
    let registry = PreservableRegistry::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::new(PercentageDropAllowance::new(0.85)),
    )
    .unwrap();

    let source = Source::new_local();
    for n in 0..100u32 {
        registry
            .register(instance(&format!("i-{n}"), 1), source.clone())
            .await
            .unwrap();
    }
    assert_eq!(registry.expected_size(), 100);

    // 40 instances lose their channel abruptly.
    for n in 0..40u32 {
        queue
            .add(instance(&format!("i-{n}"), 1), source.clone())
            .await;
    }
    clock.advance_ms(1_500);

    // Draining proceeds until one eviction pushes the ratio below the floor
    // (84/100 < 0.85), then halts with everything else still queued.
    poll_until("self preservation to engage", || {
        let registry = Arc::clone(&registry);
        async move { registry.in_self_preservation() }
    })
    .await;
    assert_eq!(registry.size().await, 84);
    assert_eq!(queue.len().await, 24);

    // The stall is stable: nothing further drains while the ratio is low.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.len().await, 24);
    assert_eq!(registry.size().await, 84);

    // Fresh registrations raise the actual size back over the floor and
    // draining resumes until the ratio is spent again.
    for n in 0..16u32 {
        registry
            .register(instance(&format!("fresh-{n}"), 1), source.clone())
            .await
            .unwrap();
    }

    poll_until("draining to resume and stall again", || {
        let queue = Arc::clone(&queue);
        async move { queue.len().await == 8 }
    })
    .await;
    assert_eq!(registry.size().await, 84);
    assert!(registry.in_self_preservation());
}

#[tokio::test]
async fn eviction_race_with_fresh_registration_is_harmless() {
    init_tracing();
    let clock = SimClock::from_millis(0);
    let store = Arc::new(RegistryStore::new());
    let queue = Arc::new(EvictionQueue::new(1_000, Arc::new(clock.clone())));
    let registry = PreservableRegistry::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::new(PercentageDropAllowance::new(0.0)),
    )
    .unwrap();

    let source = Source::new_local();
    registry
        .register(instance("i-1", 1), source.clone())
        .await
        .unwrap();

    // The channel drops (old record queued), then the client re-registers
    // with a newer version before the eviction fires.
    queue.add(instance("i-1", 1), source.clone()).await;
    registry
        .register(instance("i-1", 5), source.clone())
        .await
        .unwrap();

    clock.advance_ms(1_500);
    poll_until("eviction queue to drain", || {
        let queue = Arc::clone(&queue);
        async move { queue.is_empty().await }
    })
    .await;

    // The stale eviction was rejected by the version check.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.size().await, 1);
    let snapshot = registry.for_snapshot(&Interest::All).await;
    assert_eq!(snapshot[0].version(), 5);
}
