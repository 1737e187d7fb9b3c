//! Retrying sender replication channel
//!
//! Decorates the sender channel with reconnect capabilities. On channel
//! failure a fresh connection is established with exponential back-off, and
//! the new channel's interest subscription replays the full current registry
//! state to the peer. Callers see one long-lived channel and are unaware of
//! reconnection churn.
//!
//! Back-off doubles from the initial delay up to `initial * 10` and resets
//! once a connection stays up longer than the maximum delay.

use crate::sender::SenderReplicationChannel;
use crate::transport::TransportClient;
use beacon_core::constants::{
    REPLICATION_BACKOFF_MULTIPLIER_MAX, REPLICATION_RECONNECT_DELAY_MS_DEFAULT,
};
use beacon_core::io::TimeProvider;
use beacon_registry::SourcedRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// Reconnect policy for a retryable sender channel
#[derive(Debug, Clone)]
pub struct ReplicationRetryConfig {
    /// First reconnect delay
    pub initial_delay_ms: u64,
    /// Upper bound the doubling back-off saturates at
    pub max_delay_ms: u64,
}

impl ReplicationRetryConfig {
    /// Create a config with the given initial delay and the default
    /// back-off ceiling
    pub fn new(initial_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms: initial_delay_ms * REPLICATION_BACKOFF_MULTIPLIER_MAX,
        }
    }
}

impl Default for ReplicationRetryConfig {
    fn default() -> Self {
        Self::new(REPLICATION_RECONNECT_DELAY_MS_DEFAULT)
    }
}

/// Sender replication channel that survives transport failures
pub struct RetryableSenderReplicationChannel {
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    current: Arc<Mutex<Option<Arc<SenderReplicationChannel>>>>,
}

impl RetryableSenderReplicationChannel {
    /// Start replicating to the peer behind `client`.
    ///
    /// The supervision task connects, streams, and reconnects until
    /// [`close`](Self::close) is called.
    pub fn start(
        client: Arc<dyn TransportClient>,
        registry: Arc<dyn SourcedRegistry>,
        own_id: String,
        config: ReplicationRetryConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());
        let current: Arc<Mutex<Option<Arc<SenderReplicationChannel>>>> =
            Arc::new(Mutex::new(None));

        tokio::spawn(supervise(
            client,
            registry,
            own_id,
            config,
            time,
            Arc::clone(&closed),
            Arc::clone(&shutdown),
            Arc::clone(&current),
        ));

        Self {
            closed,
            shutdown,
            current,
        }
    }

    /// Whether the channel was closed by the caller
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop all retries and close the current delegate channel
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        if let Some(channel) = self.current.lock().await.take() {
            channel.close().await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    client: Arc<dyn TransportClient>,
    registry: Arc<dyn SourcedRegistry>,
    own_id: String,
    config: ReplicationRetryConfig,
    time: Arc<dyn TimeProvider>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    current: Arc<Mutex<Option<Arc<SenderReplicationChannel>>>>,
) {
    let mut delay_ms = config.initial_delay_ms;

    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }

        let connected_at_ms = time.now_ms();
        match SenderReplicationChannel::handshake(client.as_ref(), &own_id).await {
            Ok(channel) => {
                info!("replication sender connected");
                let channel = Arc::new(channel);
                *current.lock().await = Some(Arc::clone(&channel));

                tokio::select! {
                    error = channel.run(registry.as_ref()) => {
                        warn!(%error, "replication channel ended");
                    }
                    _ = shutdown.notified() => {
                        channel.close().await;
                        return;
                    }
                }
                current.lock().await.take();

                // A connection that outlived the back-off ceiling counts as
                // stable: start the next cycle from the initial delay.
                if time.now_ms().saturating_sub(connected_at_ms) >= config.max_delay_ms {
                    delay_ms = config.initial_delay_ms;
                }
            }
            Err(error) => {
                warn!(%error, "replication connect failed");
            }
        }

        if closed.load(Ordering::SeqCst) {
            return;
        }
        info!(delay_ms, "scheduling replication reconnect");
        tokio::select! {
            _ = time.sleep_ms(delay_ms) => {}
            _ = shutdown.notified() => return,
        }
        delay_ms = (delay_ms.saturating_mul(2)).min(config.max_delay_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::transport::Connection;
    use async_trait::async_trait;
    use beacon_core::io::SimClock;
    use beacon_registry::RegistryStore;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[test]
    fn test_retry_config_defaults() {
        let config = ReplicationRetryConfig::default();
        assert_eq!(
            config.max_delay_ms,
            config.initial_delay_ms * REPLICATION_BACKOFF_MULTIPLIER_MAX
        );
    }

    /// Transport that refuses every connection and counts the attempts
    #[derive(Debug, Default)]
    struct RefusingClient {
        attempts: AtomicU64,
    }

    #[async_trait]
    impl TransportClient for RefusingClient {
        async fn connect(&self) -> crate::error::ChannelResult<Arc<dyn Connection>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ChannelError::transport("connection refused"))
        }
    }

    async fn wait_for_attempts(client: &RefusingClient, expected: u64) {
        for _ in 0..200 {
            if client.attempts.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!(
            "expected {expected} connect attempts, saw {}",
            client.attempts.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_reconnect_backoff_doubles() {
        let clock = SimClock::from_millis(0);
        let client = Arc::new(RefusingClient::default());
        let registry: Arc<dyn SourcedRegistry> = Arc::new(RegistryStore::new());

        let channel = RetryableSenderReplicationChannel::start(
            Arc::clone(&client) as Arc<dyn TransportClient>,
            registry,
            "node-a".to_string(),
            ReplicationRetryConfig::new(100),
            Arc::new(clock.clone()),
        );

        // First attempt fires immediately.
        wait_for_attempts(&client, 1).await;
        // Let the supervisor reach its back-off sleep before moving time.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Second after the initial delay.
        clock.advance_ms(100);
        wait_for_attempts(&client, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The delay doubled: half of it is not enough.
        clock.advance_ms(100);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.attempts.load(Ordering::SeqCst), 2);

        clock.advance_ms(100);
        wait_for_attempts(&client, 3).await;

        channel.close().await;
    }
}
