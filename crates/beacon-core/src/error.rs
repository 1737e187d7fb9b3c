//! Error types for Beacon core
//!
//! TigerStyle: Explicit error variants with context, using thiserror.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core model errors
#[derive(Error, Debug)]
pub enum Error {
    /// Instance ID failed validation
    #[error("invalid instance ID: {id}, reason: {reason}")]
    InvalidInstanceId { id: String, reason: String },

    /// Instance ID exceeds the configured limit
    #[error("instance ID too long: {length} bytes exceeds limit of {limit} bytes")]
    InstanceIdTooLong { length: usize, limit: usize },

    /// A delta was applied to an instance with a different ID
    #[error("delta for instance {delta_id} cannot be applied to instance {instance_id}")]
    DeltaIdMismatch {
        delta_id: String,
        instance_id: String,
    },
}

impl Error {
    /// Create an invalid instance ID error
    pub fn invalid_instance_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInstanceId {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_instance_id("", "empty");
        assert!(err.to_string().contains("empty"));

        let err = Error::DeltaIdMismatch {
            delta_id: "a".into(),
            instance_id: "b".into(),
        };
        assert!(err.to_string().contains('a'));
        assert!(err.to_string().contains('b'));
    }
}
