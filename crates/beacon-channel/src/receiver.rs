//! Receiver side of the replication protocol
//!
//! Accepts a peer's hello handshake, then applies RegisterCopy and
//! UnregisterCopy messages to the local registry under a per-channel
//! replicated source. A hello whose source id resolves to this node marks
//! the channel as a replication loop: the handshake completes but every
//! subsequent copy is rejected without touching the registry.
//!
//! Cleanup invariants:
//! - graceful close unregisters every id this channel introduced; ids whose
//!   unregister fails fall back to the eviction queue
//! - abrupt transport termination queues every introduced id for eviction,
//!   bounding staleness to the eviction timeout

use crate::error::{ChannelError, ChannelResult};
use crate::identity::SelfIdentityResolver;
use crate::lifecycle::{ChannelState, StateCell};
use crate::transport::{ChannelMessage, Connection};
use beacon_core::instance::{InstanceInfo, InstanceInfoBuilder};
use beacon_core::io::TimeProvider;
use beacon_core::source::Source;
use beacon_registry::{EvictionQueue, SourcedRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Server-side replication channel fed by one peer connection
pub struct ReceiverReplicationChannel {
    connection: Arc<dyn Connection>,
    resolver: Arc<dyn SelfIdentityResolver>,
    registry: Arc<dyn SourcedRegistry>,
    eviction_queue: Arc<EvictionQueue>,
    state: StateCell,
    /// Source tagging every write from this channel; set by the handshake
    replication_source: Mutex<Option<Source>>,
    /// Detected by comparing the hello source id with this node's own id
    replication_loop: AtomicBool,
    /// Instance ids introduced by this channel, for cleanup on close
    introduced: Mutex<HashMap<String, InstanceInfo>>,
    /// Logical clock stamping replicated copies; seeded from wall time so
    /// versions stay monotonic across channel reconnects
    version_clock: AtomicU64,
}

impl ReceiverReplicationChannel {
    /// Create a channel over an accepted peer connection
    pub fn new(
        connection: Arc<dyn Connection>,
        resolver: Arc<dyn SelfIdentityResolver>,
        registry: Arc<dyn SourcedRegistry>,
        eviction_queue: Arc<EvictionQueue>,
        time: &dyn TimeProvider,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            resolver,
            registry,
            eviction_queue,
            state: StateCell::new("replication_receiver"),
            replication_source: Mutex::new(None),
            replication_loop: AtomicBool::new(false),
            introduced: Mutex::new(HashMap::new()),
            version_clock: AtomicU64::new(time.now_ms()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// The peer's replication source, once the handshake happened
    pub async fn source(&self) -> Option<Source> {
        self.replication_source.lock().await.clone()
    }

    /// Pump the connection until it terminates or the channel closes.
    ///
    /// Dispatch failures are answered with a protocol error on the
    /// transport, never dropped silently.
    pub async fn run(self: Arc<Self>) {
        while let Some(message) = self.connection.recv().await {
            if self.state.get().is_closed() {
                break;
            }
            if let Err(error) = self.dispatch(message).await {
                warn!(%error, "replication message rejected");
                let _ = self
                    .connection
                    .send(ChannelMessage::ProtocolError {
                        reason: error.to_string(),
                    })
                    .await;
            }
        }
        self.handle_disconnect().await;
    }

    async fn dispatch(&self, message: ChannelMessage) -> ChannelResult<()> {
        match message {
            ChannelMessage::Hello { source_id } => self.hello(source_id).await,
            ChannelMessage::RegisterCopy { instance } => self.register_copy(instance).await,
            ChannelMessage::UnregisterCopy { id } => self.unregister_copy(&id).await,
            other => Err(ChannelError::protocol(format!(
                "unexpected {} on a replication channel",
                other.kind()
            ))),
        }
    }

    /// Handle the peer's hello: resolve own identity, detect loops, reply
    async fn hello(&self, source_id: String) -> ChannelResult<()> {
        debug!(%source_id, "replication hello");
        if !self.state.move_to(ChannelState::Idle, ChannelState::Handshake) {
            return Err(if self.state.get().is_closed() {
                ChannelError::ChannelClosed
            } else {
                ChannelError::HandshakeAlready
            });
        }

        *self.replication_source.lock().await = Some(Source::replicated(&source_id));

        let own = self.resolver.resolve().await?;
        let is_loop = own.id() == source_id;
        self.replication_loop.store(is_loop, Ordering::SeqCst);
        if is_loop {
            warn!(%source_id, "replication loop detected, rejecting all copies from this channel");
        }

        self.connection
            .send(ChannelMessage::HelloReply {
                receiver_id: own.id().to_string(),
            })
            .await?;
        self.state
            .move_to(ChannelState::Handshake, ChannelState::Connected);
        Ok(())
    }

    fn check_writable(&self) -> ChannelResult<()> {
        match self.state.get() {
            ChannelState::Connected => {
                if self.replication_loop.load(Ordering::SeqCst) {
                    Err(ChannelError::ReplicationLoop)
                } else {
                    Ok(())
                }
            }
            ChannelState::Closed => Err(ChannelError::ChannelClosed),
            ChannelState::Idle | ChannelState::Handshake => Err(ChannelError::NotConnected),
        }
    }

    async fn channel_source(&self) -> ChannelResult<Source> {
        self.replication_source
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NotConnected)
    }

    async fn register_copy(&self, instance: InstanceInfo) -> ChannelResult<()> {
        self.check_writable()?;
        let source = self.channel_source().await?;

        let version = self.version_clock.fetch_add(1, Ordering::SeqCst) + 1;
        let stamped = InstanceInfoBuilder::from_instance(&instance)
            .with_version(version)
            .build()?;

        let mut introduced = self.introduced.lock().await;
        if introduced.contains_key(stamped.id()) {
            debug!(id = %stamped.id(), "updating an existing replicated copy");
        }
        self.registry.register(stamped.clone(), source).await?;
        introduced.insert(stamped.id().to_string(), stamped);
        Ok(())
    }

    async fn unregister_copy(&self, id: &str) -> ChannelResult<()> {
        self.check_writable()?;
        let source = self.channel_source().await?;

        let mut introduced = self.introduced.lock().await;
        let known = match introduced.get(id) {
            Some(info) => info.clone(),
            None => {
                info!(%id, "replicated unregister for unknown instance, ignoring");
                return Ok(());
            }
        };
        self.registry.unregister(known, source).await?;
        introduced.remove(id);
        Ok(())
    }

    /// Gracefully close: unregister everything this channel introduced.
    ///
    /// Ids whose unregister fails are handed to the eviction queue so
    /// staleness stays bounded.
    pub async fn close(&self) {
        if self.state.close().is_closed() {
            return;
        }

        let drained: Vec<InstanceInfo> = self.introduced.lock().await.drain().map(|(_, v)| v).collect();
        if !self.replication_loop.load(Ordering::SeqCst) {
            if let Some(source) = self.replication_source.lock().await.clone() {
                for info in drained {
                    match self.registry.unregister(info.clone(), source.clone()).await {
                        Ok(_) => {}
                        Err(error) => {
                            warn!(
                                %error,
                                id = %info.id(),
                                "unregister on channel close failed, falling back to eviction"
                            );
                            self.eviction_queue.add(info, source.clone()).await;
                        }
                    }
                }
            }
        }
        self.connection.close().await;
    }

    /// Abrupt termination: enroll everything this channel introduced into
    /// the eviction queue
    async fn handle_disconnect(&self) {
        if self.state.close().is_closed() {
            // close() already cleaned up.
            return;
        }
        if self.replication_loop.load(Ordering::SeqCst) {
            return;
        }
        let source = match self.replication_source.lock().await.clone() {
            Some(source) => source,
            None => return,
        };

        let drained: Vec<InstanceInfo> = self.introduced.lock().await.drain().map(|(_, v)| v).collect();
        if !drained.is_empty() {
            info!(
                count = drained.len(),
                %source,
                "replication channel disconnected, queueing its registrations for eviction"
            );
        }
        for info in drained {
            self.eviction_queue.add(info, source.clone()).await;
        }
    }
}
