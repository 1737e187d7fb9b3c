//! Client-facing registration channel
//!
//! Server-side endpoint of one client's registration session. The client
//! registers once, then renews through updates, and either unregisters
//! gracefully or vanishes, in which case the last known record is pushed
//! into the eviction queue exactly once.
//!
//! All writes carry the process-local source: a registration channel never
//! competes with replication copies of other nodes for head position of a
//! foreign instance.

use crate::error::{ChannelError, ChannelResult};
use crate::transport::{ChannelMessage, Connection};
use beacon_core::instance::{InstanceInfo, InstanceInfoBuilder};
use beacon_core::io::TimeProvider;
use beacon_core::metrics;
use beacon_core::source::Source;
use beacon_registry::{EvictionQueue, SourcedRegistry};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle of a registration channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// No instance registered yet
    Idle,
    /// An instance is registered and may be updated
    Registered,
    /// Terminal
    Closed,
}

impl RegistrationState {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Registered => 1,
            Self::Closed => 2,
        }
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::Idle,
            1 => Self::Registered,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Registered => write!(f, "registered"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Server-side channel handling one client's registration lifecycle
pub struct RegistrationChannel {
    connection: Arc<dyn Connection>,
    registry: Arc<dyn SourcedRegistry>,
    eviction_queue: Arc<EvictionQueue>,
    local_source: Source,
    state: AtomicU8,
    current: Mutex<Option<InstanceInfo>>,
    /// Logical clock stamping registration versions, seeded from wall time
    version_clock: AtomicU64,
}

impl RegistrationChannel {
    /// Create a channel over an accepted client connection
    pub fn new(
        connection: Arc<dyn Connection>,
        registry: Arc<dyn SourcedRegistry>,
        eviction_queue: Arc<EvictionQueue>,
        local_source: Source,
        time: &dyn TimeProvider,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            registry,
            eviction_queue,
            local_source,
            state: AtomicU8::new(RegistrationState::Idle.rank()),
            current: Mutex::new(None),
            version_clock: AtomicU64::new(time.now_ms()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> RegistrationState {
        RegistrationState::from_rank(self.state.load(Ordering::SeqCst))
    }

    fn move_state(&self, from: RegistrationState, to: RegistrationState) -> bool {
        let moved = self
            .state
            .compare_exchange(from.rank(), to.rank(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            debug!(%from, %to, "registration channel state transition");
            metrics::record_channel_state("registration", &from.to_string(), &to.to_string());
        }
        moved
    }

    /// Pump the connection until the client leaves or the channel closes
    pub async fn run(self: Arc<Self>) {
        while let Some(message) = self.connection.recv().await {
            if self.state() == RegistrationState::Closed {
                break;
            }
            match self.dispatch(message).await {
                Ok(()) => {
                    if self.connection.send(ChannelMessage::Ack).await.is_err() {
                        break;
                    }
                    if self.state() == RegistrationState::Closed {
                        // Graceful unregister ends the session.
                        self.connection.close().await;
                        break;
                    }
                }
                Err(error) => {
                    warn!(%error, "registration message rejected");
                    let sent = self
                        .connection
                        .send(ChannelMessage::ProtocolError {
                            reason: error.to_string(),
                        })
                        .await;
                    let structural = matches!(
                        error,
                        ChannelError::Registry(_)
                            | ChannelError::Transport { .. }
                            | ChannelError::ChannelClosed
                    );
                    if structural || sent.is_err() {
                        break;
                    }
                }
            }
        }
        self.handle_disconnect().await;
    }

    async fn dispatch(&self, message: ChannelMessage) -> ChannelResult<()> {
        match message {
            ChannelMessage::Register { instance } => self.register(instance).await,
            ChannelMessage::Update { instance } => self.update(instance).await,
            ChannelMessage::Unregister => self.unregister().await,
            other => Err(ChannelError::protocol(format!(
                "unexpected {} on a registration channel",
                other.kind()
            ))),
        }
    }

    fn next_version(&self) -> u64 {
        self.version_clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn register(&self, instance: InstanceInfo) -> ChannelResult<()> {
        debug!(id = %instance.id(), "registering instance");
        if !self.move_state(RegistrationState::Idle, RegistrationState::Registered) {
            return Err(match self.state() {
                RegistrationState::Closed => ChannelError::ChannelClosed,
                _ => ChannelError::AlreadyRegistered,
            });
        }

        let stamped = InstanceInfoBuilder::from_instance(&instance)
            .with_version(self.next_version())
            .build()?;
        self.registry
            .register(stamped.clone(), self.local_source.clone())
            .await?;
        *self.current.lock().await = Some(stamped);
        Ok(())
    }

    async fn update(&self, instance: InstanceInfo) -> ChannelResult<()> {
        debug!(id = %instance.id(), "updating instance");
        match self.state() {
            RegistrationState::Registered => {}
            RegistrationState::Closed => return Err(ChannelError::ChannelClosed),
            RegistrationState::Idle => return Err(ChannelError::NotRegistered),
        }

        let mut current = self.current.lock().await;
        let previous = current.clone().ok_or(ChannelError::NotRegistered)?;
        if instance.id() != previous.id() {
            return Err(ChannelError::protocol(format!(
                "update for instance {} on a channel registered as {}",
                instance.id(),
                previous.id()
            )));
        }

        let stamped = InstanceInfoBuilder::from_instance(&instance)
            .with_version(self.next_version())
            .build()?;
        let deltas = stamped.diff_older(&previous);
        self.registry
            .update(stamped.clone(), deltas, self.local_source.clone())
            .await?;
        *current = Some(stamped);
        Ok(())
    }

    async fn unregister(&self) -> ChannelResult<()> {
        if !self.move_state(RegistrationState::Registered, RegistrationState::Closed) {
            return Err(match self.state() {
                RegistrationState::Closed => ChannelError::ChannelClosed,
                _ => ChannelError::NotRegistered,
            });
        }

        let current = self.current.lock().await.take();
        let info = current.ok_or(ChannelError::NotRegistered)?;
        debug!(id = %info.id(), "unregistering instance");
        self.registry
            .unregister(info, self.local_source.clone())
            .await?;
        Ok(())
    }

    /// Connection ended: a still-registered instance goes to the eviction
    /// queue, exactly once
    async fn handle_disconnect(&self) {
        if !self.move_state(RegistrationState::Registered, RegistrationState::Closed) {
            self.move_state(RegistrationState::Idle, RegistrationState::Closed);
            return;
        }
        if let Some(info) = self.current.lock().await.take() {
            info!(
                id = %info.id(),
                "connection terminated without unregister, queueing instance for eviction"
            );
            self.eviction_queue
                .add(info, self.local_source.clone())
                .await;
        }
    }
}
