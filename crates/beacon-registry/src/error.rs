//! Registry error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The eviction queue allows exactly one subscriber
    #[error("eviction queue already has a subscriber")]
    EvictionQueueSubscribed,

    /// Write attempted after shutdown
    #[error("registry is shut down")]
    ShutDown,
}

impl RegistryError {
    /// Check if this error indicates a retriable condition
    pub fn is_retriable(&self) -> bool {
        false
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
