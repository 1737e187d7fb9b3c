//! Data-copy origins
//!
//! Every write into the registry is tagged with the [`Source`] it came from,
//! so one instance can hold independent copies from the local client, from
//! each replication peer, and from interest-driven sync. Copies from
//! different sources never overwrite each other; the holder reconciles them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a data copy originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Written by a client connected directly to this node
    Local,
    /// Written by a peer registry node through a replication channel
    Replicated,
    /// Written by an interest-subscription sync
    Interested,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Replicated => write!(f, "replicated"),
            Self::Interested => write!(f, "interested"),
        }
    }
}

/// Identity of a data-copy origin
///
/// Equality and hashing are by (origin, id). Exactly one `Local` source
/// exists per process lifetime; replication channels carry one `Replicated`
/// source per peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    origin: Origin,
    id: String,
}

impl Source {
    /// Create a source with an explicit origin and id
    pub fn new(origin: Origin, id: impl Into<String>) -> Self {
        Self {
            origin,
            id: id.into(),
        }
    }

    /// Generate the process-local source. Called once at process start.
    pub fn new_local() -> Self {
        Self::new(Origin::Local, Uuid::new_v4().to_string())
    }

    /// Create a replication source for the given peer id
    pub fn replicated(peer_id: impl Into<String>) -> Self {
        Self::new(Origin::Replicated, peer_id)
    }

    /// The origin of this source
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The opaque id of this source
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.origin, self.id)
    }
}

/// Predicate over sources, used to filter streams and snapshots by where
/// their data came from (e.g. replication forwards only locally sourced
/// changes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMatcher {
    /// Match any source
    Any,
    /// Match sources with the given origin, regardless of id
    ForOrigin(Origin),
    /// Match exactly one source
    ForSource(Source),
}

impl SourceMatcher {
    /// Check whether the given source matches
    pub fn matches(&self, source: &Source) -> bool {
        match self {
            Self::Any => true,
            Self::ForOrigin(origin) => source.origin() == *origin,
            Self::ForSource(expected) => source == expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_equality_by_origin_and_id() {
        let a = Source::new(Origin::Replicated, "peer-1");
        let b = Source::replicated("peer-1");
        let c = Source::new(Origin::Local, "peer-1");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_local_sources_are_unique() {
        let a = Source::new_local();
        let b = Source::new_local();

        assert_eq!(a.origin(), Origin::Local);
        assert_ne!(a, b);
    }

    #[test]
    fn test_source_matcher() {
        let local = Source::new_local();
        let peer = Source::replicated("peer-1");

        assert!(SourceMatcher::Any.matches(&peer));
        assert!(SourceMatcher::ForOrigin(Origin::Local).matches(&local));
        assert!(!SourceMatcher::ForOrigin(Origin::Local).matches(&peer));
        assert!(SourceMatcher::ForSource(peer.clone()).matches(&peer));
        assert!(!SourceMatcher::ForSource(peer).matches(&Source::replicated("peer-2")));
    }
}
