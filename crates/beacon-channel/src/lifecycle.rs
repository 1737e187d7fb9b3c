//! Channel lifecycle state machine
//!
//! TigerStyle: Monotonic transitions only. A channel moves
//! Idle -> Handshake -> Connected -> Closed and never regresses; Closed is
//! terminal.

use beacon_core::metrics;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::debug;

/// Lifecycle state of a replication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, no handshake yet
    Idle,
    /// Hello received or sent, identity being resolved
    Handshake,
    /// Handshake complete, copies flow
    Connected,
    /// Terminal
    Closed,
}

impl ChannelState {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Handshake => 1,
            Self::Connected => 2,
            Self::Closed => 3,
        }
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::Idle,
            1 => Self::Handshake,
            2 => Self::Connected,
            _ => Self::Closed,
        }
    }

    /// Whether the channel reached its terminal state
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Handshake => write!(f, "handshake"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Atomic holder for a channel's lifecycle state
#[derive(Debug)]
pub(crate) struct StateCell {
    state: AtomicU8,
    channel_kind: &'static str,
}

impl StateCell {
    pub(crate) fn new(channel_kind: &'static str) -> Self {
        Self {
            state: AtomicU8::new(ChannelState::Idle.rank()),
            channel_kind,
        }
    }

    pub(crate) fn get(&self) -> ChannelState {
        ChannelState::from_rank(self.state.load(Ordering::SeqCst))
    }

    /// Transition `from -> to`; false when the current state is not `from`
    pub(crate) fn move_to(&self, from: ChannelState, to: ChannelState) -> bool {
        debug_assert!(from.rank() < to.rank(), "channel states never regress");
        let moved = self
            .state
            .compare_exchange(from.rank(), to.rank(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            debug!(channel = self.channel_kind, %from, %to, "channel state transition");
            metrics::record_channel_state(self.channel_kind, &from.to_string(), &to.to_string());
        }
        moved
    }

    /// Force the terminal state, returning the state before the call
    pub(crate) fn close(&self) -> ChannelState {
        let previous =
            ChannelState::from_rank(self.state.swap(ChannelState::Closed.rank(), Ordering::SeqCst));
        if !previous.is_closed() {
            debug!(channel = self.channel_kind, from = %previous, "channel closed");
            metrics::record_channel_state(self.channel_kind, &previous.to_string(), "closed");
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let cell = StateCell::new("test");
        assert_eq!(cell.get(), ChannelState::Idle);

        assert!(cell.move_to(ChannelState::Idle, ChannelState::Handshake));
        assert!(cell.move_to(ChannelState::Handshake, ChannelState::Connected));
        assert_eq!(cell.get(), ChannelState::Connected);
    }

    #[test]
    fn test_wrong_from_state_is_rejected() {
        let cell = StateCell::new("test");
        assert!(!cell.move_to(ChannelState::Handshake, ChannelState::Connected));
        assert_eq!(cell.get(), ChannelState::Idle);

        // Double handshake: second Idle -> Handshake fails.
        assert!(cell.move_to(ChannelState::Idle, ChannelState::Handshake));
        assert!(!cell.move_to(ChannelState::Idle, ChannelState::Handshake));
    }

    #[test]
    fn test_close_is_terminal() {
        let cell = StateCell::new("test");
        assert_eq!(cell.close(), ChannelState::Idle);
        assert_eq!(cell.close(), ChannelState::Closed);
        assert!(!cell.move_to(ChannelState::Idle, ChannelState::Handshake));
        assert!(cell.get().is_closed());
    }
}
