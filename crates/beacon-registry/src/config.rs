//! Registry configuration
//!
//! TigerStyle: Explicit configuration with bounded values.

use beacon_core::constants::{
    EVICTION_RESCHEDULE_MS_MIN, EVICTION_TIMEOUT_MS_DEFAULT, SELF_PRESERVATION_FLOOR_RATIO_DEFAULT,
};
use serde::{Deserialize, Serialize};

/// Configuration for the preservable registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Time an instance spends in the eviction queue before removal
    pub eviction_timeout_ms: u64,
    /// Floor on actual-size / expected-size below which eviction suspends
    pub self_preservation_floor_ratio: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            eviction_timeout_ms: EVICTION_TIMEOUT_MS_DEFAULT,
            self_preservation_floor_ratio: SELF_PRESERVATION_FLOOR_RATIO_DEFAULT,
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the eviction timeout.
    ///
    /// Values below the reschedule floor are clamped up; a timeout tighter
    /// than the drain granularity cannot be honored.
    pub fn with_eviction_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.eviction_timeout_ms = timeout_ms.max(EVICTION_RESCHEDULE_MS_MIN);
        self
    }

    /// Set the self-preservation floor ratio, clamped to [0, 1]
    pub fn with_self_preservation_floor_ratio(mut self, ratio: f64) -> Self {
        self.self_preservation_floor_ratio = ratio.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = RegistryConfig::default();
        assert_eq!(config.eviction_timeout_ms, EVICTION_TIMEOUT_MS_DEFAULT);
        assert!(config.self_preservation_floor_ratio > 0.0);
    }

    #[test]
    fn test_bounds_clamped() {
        let config = RegistryConfig::new()
            .with_eviction_timeout_ms(1)
            .with_self_preservation_floor_ratio(3.0);
        assert_eq!(config.eviction_timeout_ms, EVICTION_RESCHEDULE_MS_MIN);
        assert_eq!(config.self_preservation_floor_ratio, 1.0);
    }
}
