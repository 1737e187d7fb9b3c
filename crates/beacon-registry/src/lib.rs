//! Beacon Registry
//!
//! Multi-sourced, eviction-aware in-memory service registry.
//!
//! # Overview
//!
//! - [`RegistryStore`]: concurrent id-to-holder map with register,
//!   unregister and update operations, snapshot queries and continuous
//!   interest streams
//! - Per-id holders reconciling copies from independent sources into one
//!   authoritative view
//! - Interest indexes delivering gap-free, duplicate-free snapshot + live
//!   streams, interned per distinct interest
//! - [`EvictionQueue`]: delayed-removal buffer for abruptly disconnected
//!   channels, drained under credit-based flow control
//! - [`PreservableRegistry`]: self-preservation gate suspending eviction
//!   when too much of the registry would expire at once

pub mod config;
pub mod error;
pub mod eviction;
pub mod holder;
pub mod index;
pub mod preservation;
pub mod store;

mod subject;

pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use eviction::{EvictionItem, EvictionQueue, EvictionQuota, EvictionSubscription};
pub use holder::HolderStatus;
pub use index::ChangeNotificationStream;
pub use preservation::{EvictionAllowance, PercentageDropAllowance, PreservableRegistry};
pub use store::{RegistryStore, SourcedRegistry};
