//! Transport abstraction and channel messages
//!
//! TigerStyle: Explicit message types; the wire codec is the transport's
//! concern, channels exchange typed values.
//!
//! The [`Connection`] trait is the seam between the channel state machines
//! and whatever carries bytes between nodes. An in-memory implementation is
//! provided for tests and embedded setups.

use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use beacon_core::instance::InstanceInfo;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

// =============================================================================
// Messages
// =============================================================================

/// Messages exchanged on registration and replication channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    // =========================================================================
    // Replication handshake
    // =========================================================================
    /// Sender announces itself with its own instance id
    Hello { source_id: String },

    /// Receiver answers with its own instance id
    HelloReply { receiver_id: String },

    // =========================================================================
    // Replication steady state
    // =========================================================================
    /// Propagate a registration or update of one instance copy
    RegisterCopy { instance: InstanceInfo },

    /// Propagate the removal of one instance copy
    UnregisterCopy { id: String },

    // =========================================================================
    // Client registration
    // =========================================================================
    /// Register the client's instance
    Register { instance: InstanceInfo },

    /// Replace specific fields of the registered instance
    Update { instance: InstanceInfo },

    /// Remove the registered instance and end the channel
    Unregister,

    /// Positive acknowledgement of the previous client message
    Ack,

    /// The peer violated the protocol or a write was rejected
    ProtocolError { reason: String },
}

impl ChannelMessage {
    /// Short name of the message variant, for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::HelloReply { .. } => "hello_reply",
            Self::RegisterCopy { .. } => "register_copy",
            Self::UnregisterCopy { .. } => "unregister_copy",
            Self::Register { .. } => "register",
            Self::Update { .. } => "update",
            Self::Unregister => "unregister",
            Self::Ack => "ack",
            Self::ProtocolError { .. } => "protocol_error",
        }
    }
}

// =============================================================================
// Transport traits
// =============================================================================

/// One established, bidirectional message connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a message to the peer
    async fn send(&self, message: ChannelMessage) -> ChannelResult<()>;

    /// Receive the next message; `None` once the connection terminated
    async fn recv(&self) -> Option<ChannelMessage>;

    /// Close the connection; the peer observes end of stream
    async fn close(&self);
}

/// Connects to one peer, producing fresh connections on demand
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> ChannelResult<Arc<dyn Connection>>;
}

// =============================================================================
// In-memory transport
// =============================================================================

/// State shared by both endpoints: either side closing downs the pair
#[derive(Debug)]
struct PairState {
    closed: AtomicBool,
    closed_notify: Notify,
}

/// In-process connection endpoint backed by a channel pair
#[derive(Debug)]
pub struct MemConnection {
    peer_tx: mpsc::UnboundedSender<ChannelMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<ChannelMessage>>,
    pair: Arc<PairState>,
}

impl MemConnection {
    /// Create both endpoints of a connection
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PairState {
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        });
        let a = Arc::new(Self {
            peer_tx: b_tx,
            rx: Mutex::new(a_rx),
            pair: Arc::clone(&shared),
        });
        let b = Arc::new(Self {
            peer_tx: a_tx,
            rx: Mutex::new(b_rx),
            pair: shared,
        });
        (a, b)
    }
}

#[async_trait]
impl Connection for MemConnection {
    async fn send(&self, message: ChannelMessage) -> ChannelResult<()> {
        if self.pair.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::transport("connection is closed"));
        }
        self.peer_tx
            .send(message)
            .map_err(|_| ChannelError::transport("peer disconnected"))
    }

    async fn recv(&self) -> Option<ChannelMessage> {
        let mut rx = self.rx.lock().await;
        // Deliver anything already in flight before honoring the close
        // flag, so a message sent just before close is not lost.
        if let Ok(message) = rx.try_recv() {
            return Some(message);
        }
        // Register for the close signal before checking the flag, so a
        // concurrent close is not missed.
        let notified = self.pair.closed_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.pair.closed.load(Ordering::SeqCst) {
            return None;
        }
        tokio::select! {
            message = rx.recv() => message,
            _ = notified => None,
        }
    }

    async fn close(&self) {
        self.pair.closed.store(true, Ordering::SeqCst);
        self.pair.closed_notify.notify_waiters();
    }
}

/// Client half of the in-memory transport: every connect hands the server
/// endpoint to the acceptor
#[derive(Debug, Clone)]
pub struct MemTransportClient {
    accept_tx: mpsc::UnboundedSender<Arc<MemConnection>>,
}

/// Server half of the in-memory transport
#[derive(Debug)]
pub struct MemAcceptor {
    accept_rx: mpsc::UnboundedReceiver<Arc<MemConnection>>,
}

impl MemAcceptor {
    /// Wait for the next inbound connection
    pub async fn accept(&mut self) -> Option<Arc<MemConnection>> {
        self.accept_rx.recv().await
    }
}

/// Create a connected in-memory transport client/acceptor pair
pub fn mem_transport() -> (MemTransportClient, MemAcceptor) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (MemTransportClient { accept_tx }, MemAcceptor { accept_rx })
}

#[async_trait]
impl TransportClient for MemTransportClient {
    async fn connect(&self) -> ChannelResult<Arc<dyn Connection>> {
        let (client_end, server_end) = MemConnection::pair();
        self.accept_tx
            .send(server_end)
            .map_err(|_| ChannelError::transport("acceptor is gone"))?;
        Ok(client_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::instance::{InstanceInfoBuilder, InstanceStatus};

    fn instance(id: &str) -> InstanceInfo {
        InstanceInfoBuilder::new(id)
            .with_status(InstanceStatus::Up)
            .with_version(1)
            .build()
            .unwrap()
    }

    #[test]
    fn test_message_serde_round_trip() {
        let messages = vec![
            ChannelMessage::Hello {
                source_id: "node-1".into(),
            },
            ChannelMessage::RegisterCopy {
                instance: instance("i-1"),
            },
            ChannelMessage::Unregister,
            ChannelMessage::ProtocolError {
                reason: "boom".into(),
            },
        ];
        for message in messages {
            let json = serde_json::to_string(&message).unwrap();
            let back: ChannelMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(message.kind(), back.kind());
        }
    }

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let (a, b) = MemConnection::pair();

        a.send(ChannelMessage::Hello {
            source_id: "node-a".into(),
        })
        .await
        .unwrap();
        let received = b.recv().await.unwrap();
        assert_eq!(received.kind(), "hello");

        b.send(ChannelMessage::Ack).await.unwrap();
        assert_eq!(a.recv().await.unwrap().kind(), "ack");
    }

    #[tokio::test]
    async fn test_close_ends_both_sides() {
        let (a, b) = MemConnection::pair();
        a.close().await;

        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert!(a.send(ChannelMessage::Ack).await.is_err());
        assert!(b.send(ChannelMessage::Ack).await.is_err());
    }

    #[tokio::test]
    async fn test_transport_client_reaches_acceptor() {
        let (client, mut acceptor) = mem_transport();

        let connection = client.connect().await.unwrap();
        let server_end = acceptor.accept().await.unwrap();

        connection
            .send(ChannelMessage::Hello {
                source_id: "node-a".into(),
            })
            .await
            .unwrap();
        assert_eq!(server_end.recv().await.unwrap().kind(), "hello");
    }
}
