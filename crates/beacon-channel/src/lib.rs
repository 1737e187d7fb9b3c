//! Beacon Channel
//!
//! Registration and replication channels for the Beacon service registry.
//!
//! # Overview
//!
//! - [`transport`]: the connection seam and typed channel messages, with an
//!   in-memory implementation for tests and embedded setups
//! - [`RegistrationChannel`]: server-side endpoint of one client's
//!   registration session, feeding the eviction queue on abrupt disconnect
//! - [`ReceiverReplicationChannel`] / [`SenderReplicationChannel`]: the
//!   peer-to-peer replication protocol (hello handshake, copy propagation,
//!   loop detection)
//! - [`RetryableSenderReplicationChannel`]: reconnect-with-back-off
//!   decorator around the sender
//! - [`ReplicationService`]: one retryable sender per replication peer

pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod receiver;
pub mod registration;
pub mod replication;
pub mod retryable;
pub mod sender;
pub mod transport;

pub use error::{ChannelError, ChannelResult};
pub use identity::{FixedSelfIdentityResolver, SelfIdentityResolver};
pub use lifecycle::ChannelState;
pub use receiver::ReceiverReplicationChannel;
pub use registration::{RegistrationChannel, RegistrationState};
pub use replication::ReplicationService;
pub use retryable::{ReplicationRetryConfig, RetryableSenderReplicationChannel};
pub use sender::SenderReplicationChannel;
pub use transport::{
    mem_transport, ChannelMessage, Connection, MemAcceptor, MemConnection, MemTransportClient,
    TransportClient,
};
