//! TigerStyle constants for Beacon
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Instance Limits
// =============================================================================

/// Maximum length of an instance ID in bytes
pub const INSTANCE_ID_LENGTH_BYTES_MAX: usize = 256;

// =============================================================================
// Eviction
// =============================================================================

/// Default time an instance spends in the eviction queue before removal
pub const EVICTION_TIMEOUT_MS_DEFAULT: u64 = 30_000;

/// Lower bound on the eviction drain reschedule interval.
///
/// When quota is exhausted but items are due, the drain loop never wakes up
/// more often than this.
pub const EVICTION_RESCHEDULE_MS_MIN: u64 = 100;

/// Maximum attempts for the eviction-driven unregister of a single item
pub const EVICTION_UNREGISTER_ATTEMPTS_MAX: u32 = 3;

// =============================================================================
// Self-Preservation
// =============================================================================

/// Default floor on actual-size / expected-size below which eviction is
/// suspended
pub const SELF_PRESERVATION_FLOOR_RATIO_DEFAULT: f64 = 0.80;

// =============================================================================
// Replication
// =============================================================================

/// Default initial delay before a failed sender replication channel reconnects
pub const REPLICATION_RECONNECT_DELAY_MS_DEFAULT: u64 = 5_000;

/// Maximum exponential back-off multiplier applied to the reconnect delay
pub const REPLICATION_BACKOFF_MULTIPLIER_MAX: u64 = 10;
