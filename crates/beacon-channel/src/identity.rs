//! Self-identity resolution
//!
//! Answers "who am I" for handshake replies and replication loop detection.
//! Resolution may be asynchronous (the node's own registration can settle
//! late), so channels resolve once per handshake instead of caching.

use crate::error::ChannelResult;
use async_trait::async_trait;
use beacon_core::instance::InstanceInfo;

/// Resolves this node's own instance record
#[async_trait]
pub trait SelfIdentityResolver: Send + Sync {
    /// Resolve the node's own record
    async fn resolve(&self) -> ChannelResult<InstanceInfo>;
}

/// Resolver backed by a fixed, configuration-provided record
#[derive(Debug, Clone)]
pub struct FixedSelfIdentityResolver {
    info: InstanceInfo,
}

impl FixedSelfIdentityResolver {
    /// Create a resolver that always answers with `info`
    pub fn new(info: InstanceInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl SelfIdentityResolver for FixedSelfIdentityResolver {
    async fn resolve(&self) -> ChannelResult<InstanceInfo> {
        Ok(self.info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::instance::{InstanceInfoBuilder, InstanceStatus};

    #[tokio::test]
    async fn test_fixed_resolver() {
        let info = InstanceInfoBuilder::new("node-1")
            .with_app("registry")
            .with_status(InstanceStatus::Up)
            .with_version(1)
            .build()
            .unwrap();
        let resolver = FixedSelfIdentityResolver::new(info);

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.id(), "node-1");
    }
}
