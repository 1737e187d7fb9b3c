//! Channel error types
//!
//! TigerStyle: Explicit error variants with context. "Closed" and "not yet
//! connected" are distinguishable: callers must not retry a closed channel
//! instance, they must obtain a new one.

use beacon_registry::RegistryError;
use thiserror::Error;

/// Channel-specific errors
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Operation attempted on a closed channel
    #[error("channel is closed")]
    ChannelClosed,

    /// Operation attempted before the handshake finished
    #[error("channel in idle state, handshake not finished")]
    NotConnected,

    /// A second handshake was attempted
    #[error("handshake already done")]
    HandshakeAlready,

    /// The peer is this node replicating to itself
    #[error("replication loop: peer resolves to this node")]
    ReplicationLoop,

    /// A second registration was attempted on a registration channel
    #[error("an instance is already registered, update it instead")]
    AlreadyRegistered,

    /// Update or unregister without a prior registration
    #[error("no instance is registered on this channel")]
    NotRegistered,

    /// Peer violated the channel protocol
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// The underlying connection failed
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// Registry rejected the write
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Instance record failed validation
    #[error("core error: {0}")]
    Core(#[from] beacon_core::Error),
}

impl ChannelError {
    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Check if reconnecting with a fresh channel may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::ChannelClosed)
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
