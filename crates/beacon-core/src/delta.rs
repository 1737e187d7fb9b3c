//! Field-level deltas between instance record versions
//!
//! A [`Delta`] names exactly one changed field and its new value, stamped
//! with the version that introduced the change. Sets of deltas are produced
//! by [`InstanceInfo::diff_older`](crate::instance::InstanceInfo::diff_older)
//! and carried on modify notifications.

use crate::instance::{InstanceStatus, ServicePort};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// New value for one changed instance field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum DeltaValue {
    AppGroup(Option<String>),
    App(Option<String>),
    Asg(Option<String>),
    VipAddress(Option<String>),
    SecureVipAddress(Option<String>),
    Ports(BTreeSet<ServicePort>),
    Status(InstanceStatus),
    HomePageUrl(Option<String>),
    StatusPageUrl(Option<String>),
    HealthCheckUrls(BTreeSet<String>),
    Metadata(BTreeMap<String, String>),
}

impl DeltaValue {
    /// Name of the field this delta changes
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::AppGroup(_) => "app_group",
            Self::App(_) => "app",
            Self::Asg(_) => "asg",
            Self::VipAddress(_) => "vip_address",
            Self::SecureVipAddress(_) => "secure_vip_address",
            Self::Ports(_) => "ports",
            Self::Status(_) => "status",
            Self::HomePageUrl(_) => "home_page_url",
            Self::StatusPageUrl(_) => "status_page_url",
            Self::HealthCheckUrls(_) => "health_check_urls",
            Self::Metadata(_) => "metadata",
        }
    }
}

/// One field-level change to an instance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    id: String,
    version: u64,
    value: DeltaValue,
}

impl Delta {
    /// Create a delta for the given instance id and version
    pub fn new(id: String, version: u64, value: DeltaValue) -> Self {
        Self { id, version, value }
    }

    /// Id of the instance this delta applies to
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Version that introduced this change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The changed field and its new value
    pub fn value(&self) -> &DeltaValue {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names() {
        let delta = Delta::new("i-1".into(), 3, DeltaValue::App(Some("shop".into())));
        assert_eq!(delta.value().field_name(), "app");
        assert_eq!(delta.id(), "i-1");
        assert_eq!(delta.version(), 3);
    }

    #[test]
    fn test_delta_serde_round_trip() {
        let delta = Delta::new(
            "i-1".into(),
            7,
            DeltaValue::Status(InstanceStatus::OutOfService),
        );
        let json = serde_json::to_string(&delta).unwrap();
        let back: Delta = serde_json::from_str(&json).unwrap();
        assert_eq!(delta, back);
    }
}
