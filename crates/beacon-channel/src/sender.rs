//! Sender side of the replication protocol
//!
//! Connects to a peer, performs the hello handshake, then forwards every
//! locally sourced registry change in emission order: Add and Modify as
//! RegisterCopy (full-state update copies), Delete as UnregisterCopy. The
//! initial interest subscription replays the current registry state, so a
//! fresh channel always brings the peer up to date before streaming live
//! changes.

use crate::error::{ChannelError, ChannelResult};
use crate::lifecycle::{ChannelState, StateCell};
use crate::transport::{ChannelMessage, Connection, TransportClient};
use beacon_core::interest::Interest;
use beacon_core::notification::ChangeNotification;
use beacon_core::source::{Origin, SourceMatcher};
use beacon_registry::SourcedRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outbound replication channel to one peer
pub struct SenderReplicationChannel {
    connection: Arc<dyn Connection>,
    state: StateCell,
}

impl SenderReplicationChannel {
    /// Connect and complete the hello handshake.
    ///
    /// `own_id` is this node's instance id, announced to the peer for loop
    /// detection.
    pub async fn handshake(
        client: &dyn TransportClient,
        own_id: &str,
    ) -> ChannelResult<SenderReplicationChannel> {
        let connection = client.connect().await?;
        let state = StateCell::new("replication_sender");
        state.move_to(ChannelState::Idle, ChannelState::Handshake);

        connection
            .send(ChannelMessage::Hello {
                source_id: own_id.to_string(),
            })
            .await?;

        match connection.recv().await {
            Some(ChannelMessage::HelloReply { receiver_id }) => {
                debug!(%receiver_id, "replication handshake complete");
            }
            Some(ChannelMessage::ProtocolError { reason }) => {
                return Err(ChannelError::Protocol { reason });
            }
            Some(other) => {
                return Err(ChannelError::protocol(format!(
                    "unexpected {} during handshake",
                    other.kind()
                )));
            }
            None => {
                return Err(ChannelError::transport("connection lost during handshake"));
            }
        }

        state.move_to(ChannelState::Handshake, ChannelState::Connected);
        Ok(Self { connection, state })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Forward local registry changes until the channel fails.
    ///
    /// Returns the error that ended the channel; the caller owns the
    /// reconnect policy.
    pub async fn run(&self, registry: &dyn SourcedRegistry) -> ChannelError {
        let mut changes = registry
            .for_interest_filtered(&Interest::All, SourceMatcher::ForOrigin(Origin::Local))
            .await;

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(sourced) => {
                        let message = match sourced.change {
                            ChangeNotification::Add { instance }
                            | ChangeNotification::Modify { instance, .. } => {
                                ChannelMessage::RegisterCopy { instance }
                            }
                            ChangeNotification::Delete { instance } => {
                                ChannelMessage::UnregisterCopy {
                                    id: instance.id().to_string(),
                                }
                            }
                        };
                        if let Err(error) = self.connection.send(message).await {
                            self.state.close();
                            return error;
                        }
                    }
                    // The registry shut down; nothing left to replicate.
                    None => {
                        self.close().await;
                        return ChannelError::ChannelClosed;
                    }
                },
                incoming = self.connection.recv() => match incoming {
                    Some(ChannelMessage::ProtocolError { reason }) => {
                        warn!(%reason, "peer rejected replication traffic");
                        self.state.close();
                        return ChannelError::Protocol { reason };
                    }
                    Some(other) => {
                        debug!(kind = other.kind(), "ignoring message on sender channel");
                    }
                    None => {
                        self.state.close();
                        return ChannelError::transport("connection lost");
                    }
                },
            }
        }
    }

    /// Close the channel and its connection
    pub async fn close(&self) {
        if !self.state.close().is_closed() {
            self.connection.close().await;
        }
    }
}
