//! Metrics collection for Beacon
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! This module provides high-level functions for recording registry metrics
//! using OpenTelemetry when the `otel` feature is enabled. Without the
//! feature every function is a no-op; the registry is functionally correct
//! with no sink attached.

#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::Counter;
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
const METRIC_NAME_REGISTRATIONS_TOTAL: &str = "beacon_registrations_total";
#[cfg(feature = "otel")]
const METRIC_NAME_UNREGISTRATIONS_TOTAL: &str = "beacon_unregistrations_total";
#[cfg(feature = "otel")]
const METRIC_NAME_UPDATES_TOTAL: &str = "beacon_updates_total";
#[cfg(feature = "otel")]
const METRIC_NAME_EVICTIONS_TOTAL: &str = "beacon_evictions_total";
#[cfg(feature = "otel")]
const METRIC_NAME_SELF_PRESERVATION_TRANSITIONS_TOTAL: &str =
    "beacon_self_preservation_transitions_total";
#[cfg(feature = "otel")]
const METRIC_NAME_CHANNEL_STATE_TRANSITIONS_TOTAL: &str = "beacon_channel_state_transitions_total";

// Cached instruments (created once, reused for all recordings)
#[cfg(feature = "otel")]
static REGISTRATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("beacon")
        .u64_counter(METRIC_NAME_REGISTRATIONS_TOTAL)
        .with_description("Total instance registrations accepted as a first add")
        .init()
});

#[cfg(feature = "otel")]
static UNREGISTRATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("beacon")
        .u64_counter(METRIC_NAME_UNREGISTRATIONS_TOTAL)
        .with_description("Total instance unregistrations that removed the last copy")
        .init()
});

#[cfg(feature = "otel")]
static UPDATES_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("beacon")
        .u64_counter(METRIC_NAME_UPDATES_TOTAL)
        .with_description("Total accepted instance updates")
        .init()
});

#[cfg(feature = "otel")]
static EVICTIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("beacon")
        .u64_counter(METRIC_NAME_EVICTIONS_TOTAL)
        .with_description("Total instances drained from the eviction queue")
        .init()
});

#[cfg(feature = "otel")]
static SELF_PRESERVATION_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("beacon")
        .u64_counter(METRIC_NAME_SELF_PRESERVATION_TRANSITIONS_TOTAL)
        .with_description("Self-preservation mode transitions")
        .init()
});

#[cfg(feature = "otel")]
static CHANNEL_STATE_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("beacon")
        .u64_counter(METRIC_NAME_CHANNEL_STATE_TRANSITIONS_TOTAL)
        .with_description("Channel state machine transitions")
        .init()
});

/// Record an accepted first-add registration
///
/// # Arguments
/// * `origin` - Source origin: "local", "replicated" or "interested"
#[cfg(feature = "otel")]
pub fn record_registration(origin: &str) {
    REGISTRATIONS_COUNTER.add(1, &[KeyValue::new("origin", origin.to_string())]);
}

/// Record a last-copy unregistration
#[cfg(feature = "otel")]
pub fn record_unregistration(origin: &str) {
    UNREGISTRATIONS_COUNTER.add(1, &[KeyValue::new("origin", origin.to_string())]);
}

/// Record an accepted update
#[cfg(feature = "otel")]
pub fn record_update(origin: &str) {
    UPDATES_COUNTER.add(1, &[KeyValue::new("origin", origin.to_string())]);
}

/// Record an instance drained from the eviction queue
#[cfg(feature = "otel")]
pub fn record_eviction() {
    EVICTIONS_COUNTER.add(1, &[]);
}

/// Record a self-preservation mode transition
///
/// # Arguments
/// * `engaged` - true when entering self-preservation, false when leaving
#[cfg(feature = "otel")]
pub fn record_self_preservation(engaged: bool) {
    let direction = if engaged { "entered" } else { "exited" };
    SELF_PRESERVATION_COUNTER.add(1, &[KeyValue::new("direction", direction)]);
}

/// Record a channel state transition
///
/// # Arguments
/// * `channel` - Channel kind: "registration", "replication_receiver", ...
/// * `from` / `to` - State names
#[cfg(feature = "otel")]
pub fn record_channel_state(channel: &str, from: &str, to: &str) {
    CHANNEL_STATE_COUNTER.add(
        1,
        &[
            KeyValue::new("channel", channel.to_string()),
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

// No-op implementations when the otel feature is disabled
#[cfg(not(feature = "otel"))]
pub fn record_registration(_origin: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_unregistration(_origin: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_update(_origin: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_eviction() {}

#[cfg(not(feature = "otel"))]
pub fn record_self_preservation(_engaged: bool) {}

#[cfg(not(feature = "otel"))]
pub fn record_channel_state(_channel: &str, _from: &str, _to: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_functions_dont_panic() {
        // These should not panic even without the otel feature
        record_registration("local");
        record_unregistration("replicated");
        record_update("local");
        record_eviction();
        record_self_preservation(true);
        record_self_preservation(false);
        record_channel_state("registration", "idle", "registered");
    }
}
