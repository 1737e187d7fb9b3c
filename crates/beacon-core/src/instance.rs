//! Service instance records
//!
//! TigerStyle: Immutable values; an update is a new record, never an in-place
//! mutation. Records carry a monotonically increasing version used by the
//! registry to reject out-of-order and duplicate writes.

use crate::constants::INSTANCE_ID_LENGTH_BYTES_MAX;
use crate::delta::{Delta, DeltaValue};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Instance Status
// =============================================================================

/// Lifecycle status reported by a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Ready to receive traffic
    Up,
    /// Not serving traffic
    Down,
    /// Initializing, not yet ready
    Starting,
    /// Administratively removed from rotation
    OutOfService,
    /// Status not reported
    Unknown,
}

impl InstanceStatus {
    /// Whether the instance should be considered routable
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Starting => write!(f, "starting"),
            Self::OutOfService => write!(f, "out_of_service"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Service Port
// =============================================================================

/// One port a service instance accepts requests on
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServicePort {
    /// Optional logical name (e.g. "admin")
    pub name: Option<String>,
    /// Port number
    pub port: u16,
    /// Whether the port serves TLS traffic
    pub secure: bool,
}

impl ServicePort {
    /// Create an unnamed port
    pub fn new(port: u16, secure: bool) -> Self {
        Self {
            name: None,
            port,
            secure,
        }
    }

    /// Create a named port
    pub fn named(name: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            name: Some(name.into()),
            port,
            secure,
        }
    }
}

// =============================================================================
// InstanceInfo
// =============================================================================

/// Identity and metadata of one service instance
///
/// Treated as immutable; updates are produced through
/// [`InstanceInfoBuilder::from_instance`] and replace the whole value in the
/// registry under the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    id: String,
    app_group: Option<String>,
    app: Option<String>,
    asg: Option<String>,
    vip_address: Option<String>,
    secure_vip_address: Option<String>,
    ports: BTreeSet<ServicePort>,
    status: InstanceStatus,
    home_page_url: Option<String>,
    status_page_url: Option<String>,
    health_check_urls: BTreeSet<String>,
    metadata: BTreeMap<String, String>,
    version: u64,
}

impl InstanceInfo {
    /// Unique identifier of this instance
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The application group this instance belongs to
    pub fn app_group(&self) -> Option<&str> {
        self.app_group.as_deref()
    }

    /// The application this instance belongs to
    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }

    /// The autoscaling group this instance belongs to
    pub fn asg(&self) -> Option<&str> {
        self.asg.as_deref()
    }

    /// The VIP address of this instance
    pub fn vip_address(&self) -> Option<&str> {
        self.vip_address.as_deref()
    }

    /// The secure VIP address of this instance
    pub fn secure_vip_address(&self) -> Option<&str> {
        self.secure_vip_address.as_deref()
    }

    /// Ports used for servicing requests
    pub fn ports(&self) -> &BTreeSet<ServicePort> {
        &self.ports
    }

    /// Current reported status
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Home page URL
    pub fn home_page_url(&self) -> Option<&str> {
        self.home_page_url.as_deref()
    }

    /// Status page URL
    pub fn status_page_url(&self) -> Option<&str> {
        self.status_page_url.as_deref()
    }

    /// Health check URLs
    pub fn health_check_urls(&self) -> &BTreeSet<String> {
        &self.health_check_urls
    }

    /// Free-form metadata
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Logical-clock version of this record
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Diff this record against an older record with the same id.
    ///
    /// Returns one [`Delta`] per changed field, stamped with this record's
    /// version. The version itself is not a diffable field; identical data at
    /// a newer version yields an empty set.
    pub fn diff_older(&self, older: &InstanceInfo) -> Vec<Delta> {
        debug_assert_eq!(self.id, older.id, "diff requires matching ids");
        if self.id != older.id {
            return Vec::new();
        }

        let mut deltas = Vec::new();
        let mut push = |value: DeltaValue| {
            deltas.push(Delta::new(self.id.clone(), self.version, value));
        };

        if self.app_group != older.app_group {
            push(DeltaValue::AppGroup(self.app_group.clone()));
        }
        if self.app != older.app {
            push(DeltaValue::App(self.app.clone()));
        }
        if self.asg != older.asg {
            push(DeltaValue::Asg(self.asg.clone()));
        }
        if self.vip_address != older.vip_address {
            push(DeltaValue::VipAddress(self.vip_address.clone()));
        }
        if self.secure_vip_address != older.secure_vip_address {
            push(DeltaValue::SecureVipAddress(self.secure_vip_address.clone()));
        }
        if self.ports != older.ports {
            push(DeltaValue::Ports(self.ports.clone()));
        }
        if self.status != older.status {
            push(DeltaValue::Status(self.status));
        }
        if self.home_page_url != older.home_page_url {
            push(DeltaValue::HomePageUrl(self.home_page_url.clone()));
        }
        if self.status_page_url != older.status_page_url {
            push(DeltaValue::StatusPageUrl(self.status_page_url.clone()));
        }
        if self.health_check_urls != older.health_check_urls {
            push(DeltaValue::HealthCheckUrls(self.health_check_urls.clone()));
        }
        if self.metadata != older.metadata {
            push(DeltaValue::Metadata(self.metadata.clone()));
        }

        deltas
    }

    /// Apply a single delta, producing a new record at the delta's version
    pub fn apply_delta(&self, delta: &Delta) -> Result<InstanceInfo> {
        if delta.id() != self.id {
            return Err(Error::DeltaIdMismatch {
                delta_id: delta.id().to_string(),
                instance_id: self.id.clone(),
            });
        }

        let mut builder = InstanceInfoBuilder::from_instance(self).with_version(delta.version());
        builder = match delta.value() {
            DeltaValue::AppGroup(v) => builder.with_app_group_opt(v.clone()),
            DeltaValue::App(v) => builder.with_app_opt(v.clone()),
            DeltaValue::Asg(v) => builder.with_asg_opt(v.clone()),
            DeltaValue::VipAddress(v) => builder.with_vip_address_opt(v.clone()),
            DeltaValue::SecureVipAddress(v) => builder.with_secure_vip_address_opt(v.clone()),
            DeltaValue::Ports(v) => builder.with_ports(v.clone()),
            DeltaValue::Status(v) => builder.with_status(*v),
            DeltaValue::HomePageUrl(v) => builder.with_home_page_url_opt(v.clone()),
            DeltaValue::StatusPageUrl(v) => builder.with_status_page_url_opt(v.clone()),
            DeltaValue::HealthCheckUrls(v) => builder.with_health_check_urls(v.clone()),
            DeltaValue::Metadata(v) => builder.with_metadata(v.clone()),
        };
        builder.build()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`InstanceInfo`]
#[derive(Debug, Clone, Default)]
pub struct InstanceInfoBuilder {
    id: String,
    app_group: Option<String>,
    app: Option<String>,
    asg: Option<String>,
    vip_address: Option<String>,
    secure_vip_address: Option<String>,
    ports: BTreeSet<ServicePort>,
    status: Option<InstanceStatus>,
    home_page_url: Option<String>,
    status_page_url: Option<String>,
    health_check_urls: BTreeSet<String>,
    metadata: BTreeMap<String, String>,
    version: u64,
}

impl InstanceInfoBuilder {
    /// Start a builder for a new instance id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Seed a builder with every field of an existing record
    pub fn from_instance(instance: &InstanceInfo) -> Self {
        Self {
            id: instance.id.clone(),
            app_group: instance.app_group.clone(),
            app: instance.app.clone(),
            asg: instance.asg.clone(),
            vip_address: instance.vip_address.clone(),
            secure_vip_address: instance.secure_vip_address.clone(),
            ports: instance.ports.clone(),
            status: Some(instance.status),
            home_page_url: instance.home_page_url.clone(),
            status_page_url: instance.status_page_url.clone(),
            health_check_urls: instance.health_check_urls.clone(),
            metadata: instance.metadata.clone(),
            version: instance.version,
        }
    }

    /// Set the application group
    pub fn with_app_group(self, app_group: impl Into<String>) -> Self {
        self.with_app_group_opt(Some(app_group.into()))
    }

    fn with_app_group_opt(mut self, app_group: Option<String>) -> Self {
        self.app_group = app_group;
        self
    }

    /// Set the application
    pub fn with_app(self, app: impl Into<String>) -> Self {
        self.with_app_opt(Some(app.into()))
    }

    fn with_app_opt(mut self, app: Option<String>) -> Self {
        self.app = app;
        self
    }

    /// Set the autoscaling group
    pub fn with_asg(self, asg: impl Into<String>) -> Self {
        self.with_asg_opt(Some(asg.into()))
    }

    fn with_asg_opt(mut self, asg: Option<String>) -> Self {
        self.asg = asg;
        self
    }

    /// Set the VIP address
    pub fn with_vip_address(self, vip: impl Into<String>) -> Self {
        self.with_vip_address_opt(Some(vip.into()))
    }

    fn with_vip_address_opt(mut self, vip: Option<String>) -> Self {
        self.vip_address = vip;
        self
    }

    /// Set the secure VIP address
    pub fn with_secure_vip_address(self, vip: impl Into<String>) -> Self {
        self.with_secure_vip_address_opt(Some(vip.into()))
    }

    fn with_secure_vip_address_opt(mut self, vip: Option<String>) -> Self {
        self.secure_vip_address = vip;
        self
    }

    /// Replace the port set
    pub fn with_ports(mut self, ports: BTreeSet<ServicePort>) -> Self {
        self.ports = ports;
        self
    }

    /// Add a single port
    pub fn with_port(mut self, port: ServicePort) -> Self {
        self.ports.insert(port);
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the home page URL
    pub fn with_home_page_url(self, url: impl Into<String>) -> Self {
        self.with_home_page_url_opt(Some(url.into()))
    }

    fn with_home_page_url_opt(mut self, url: Option<String>) -> Self {
        self.home_page_url = url;
        self
    }

    /// Set the status page URL
    pub fn with_status_page_url(self, url: impl Into<String>) -> Self {
        self.with_status_page_url_opt(Some(url.into()))
    }

    fn with_status_page_url_opt(mut self, url: Option<String>) -> Self {
        self.status_page_url = url;
        self
    }

    /// Replace the health check URL set
    pub fn with_health_check_urls(mut self, urls: BTreeSet<String>) -> Self {
        self.health_check_urls = urls;
        self
    }

    /// Add a single health check URL
    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_urls.insert(url.into());
        self
    }

    /// Replace the metadata map
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata entry
    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the logical-clock version
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Build the record, validating the id
    pub fn build(self) -> Result<InstanceInfo> {
        if self.id.is_empty() {
            return Err(Error::invalid_instance_id(self.id, "id must not be empty"));
        }
        if self.id.len() > INSTANCE_ID_LENGTH_BYTES_MAX {
            return Err(Error::InstanceIdTooLong {
                length: self.id.len(),
                limit: INSTANCE_ID_LENGTH_BYTES_MAX,
            });
        }

        Ok(InstanceInfo {
            id: self.id,
            app_group: self.app_group,
            app: self.app,
            asg: self.asg,
            vip_address: self.vip_address,
            secure_vip_address: self.secure_vip_address,
            ports: self.ports,
            status: self.status.unwrap_or(InstanceStatus::Unknown),
            home_page_url: self.home_page_url,
            status_page_url: self.status_page_url,
            health_check_urls: self.health_check_urls,
            metadata: self.metadata,
            version: self.version,
        })
    }
}
