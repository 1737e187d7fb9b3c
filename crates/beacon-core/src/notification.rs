//! Change notifications
//!
//! The unit of propagation on every registry stream. Ordering within one
//! instance id's stream always reflects the order the causing writes were
//! accepted.

use crate::delta::Delta;
use crate::instance::InstanceInfo;
use crate::source::Source;
use serde::{Deserialize, Serialize};

/// Kind of change a notification carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One observed change to the registry's authoritative view of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeNotification {
    /// An instance became visible
    Add { instance: InstanceInfo },
    /// The visible copy of an instance changed; `deltas` is the field-level
    /// difference against the previously visible copy
    Modify {
        instance: InstanceInfo,
        deltas: Vec<Delta>,
    },
    /// An instance is no longer present
    Delete { instance: InstanceInfo },
}

impl ChangeNotification {
    /// Create an add notification
    pub fn add(instance: InstanceInfo) -> Self {
        Self::Add { instance }
    }

    /// Create a modify notification
    pub fn modify(instance: InstanceInfo, deltas: Vec<Delta>) -> Self {
        Self::Modify { instance, deltas }
    }

    /// Create a delete notification
    pub fn delete(instance: InstanceInfo) -> Self {
        Self::Delete { instance }
    }

    /// The kind of this notification
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Modify { .. } => ChangeKind::Modify,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The instance record carried by this notification
    pub fn instance(&self) -> &InstanceInfo {
        match self {
            Self::Add { instance } => instance,
            Self::Modify { instance, .. } => instance,
            Self::Delete { instance } => instance,
        }
    }

    /// Consume the notification, returning the carried record
    pub fn into_instance(self) -> InstanceInfo {
        match self {
            Self::Add { instance } => instance,
            Self::Modify { instance, .. } => instance,
            Self::Delete { instance } => instance,
        }
    }
}

/// A change notification together with the source whose write caused it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedChangeNotification {
    /// The source of the causing write
    pub source: Source,
    /// The change itself
    pub change: ChangeNotification,
}

impl SourcedChangeNotification {
    /// Create a sourced notification
    pub fn new(source: Source, change: ChangeNotification) -> Self {
        Self { source, change }
    }
}
