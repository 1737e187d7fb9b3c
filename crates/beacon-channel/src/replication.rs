//! Replication peer supervisor
//!
//! Owns one retryable sender channel per replication peer. Peer discovery
//! is the caller's concern: peers are added and removed by id with their
//! transport client.

use crate::retryable::{ReplicationRetryConfig, RetryableSenderReplicationChannel};
use crate::transport::TransportClient;
use beacon_core::io::TimeProvider;
use beacon_registry::SourcedRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Maintains outbound replication to a mutable set of peers
pub struct ReplicationService {
    registry: Arc<dyn SourcedRegistry>,
    own_id: String,
    config: ReplicationRetryConfig,
    time: Arc<dyn TimeProvider>,
    peers: Mutex<HashMap<String, RetryableSenderReplicationChannel>>,
    shut_down: AtomicBool,
}

impl ReplicationService {
    /// Create a supervisor replicating `registry`'s local writes
    pub fn new(
        registry: Arc<dyn SourcedRegistry>,
        own_id: impl Into<String>,
        config: ReplicationRetryConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            registry,
            own_id: own_id.into(),
            config,
            time,
            peers: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Start replicating to a peer; a known peer id is left untouched
    pub async fn add_peer(&self, peer_id: impl Into<String>, client: Arc<dyn TransportClient>) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let peer_id = peer_id.into();
        let mut peers = self.peers.lock().await;
        if peers.contains_key(&peer_id) {
            debug!(%peer_id, "replication peer already known");
            return;
        }
        info!(%peer_id, "adding replication peer");
        let channel = RetryableSenderReplicationChannel::start(
            client,
            Arc::clone(&self.registry),
            self.own_id.clone(),
            self.config.clone(),
            Arc::clone(&self.time),
        );
        peers.insert(peer_id, channel);
    }

    /// Stop replicating to a peer and close its channel
    pub async fn remove_peer(&self, peer_id: &str) {
        let removed = self.peers.lock().await.remove(peer_id);
        if let Some(channel) = removed {
            info!(%peer_id, "removing replication peer");
            channel.close().await;
        }
    }

    /// Number of peers currently supervised
    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Close every peer channel and reject further additions
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        info!("shutting down replication service");
        let peers: Vec<_> = self.peers.lock().await.drain().collect();
        for (_, channel) in peers {
            channel.close().await;
        }
    }
}
