//! Beacon Core
//!
//! Core model types for the Beacon service registry.
//!
//! # Overview
//!
//! This crate holds the leaves of the registry data model:
//! - Immutable service-instance records ([`InstanceInfo`]) and field-level
//!   deltas between versions of the same record
//! - Data-copy origins ([`Source`]) distinguishing local, replicated and
//!   interest-sourced writes
//! - Registry query predicates ([`Interest`])
//! - Change notifications carried on every registry stream
//! - The I/O abstraction for time, so registry timing logic is testable
//!   against a simulated clock
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g. `INSTANCE_ID_LENGTH_BYTES_MAX`)
//! - Immutable values; every mutation produces a new value
//! - Errors are returned, never panics

pub mod constants;
pub mod delta;
pub mod error;
pub mod instance;
pub mod interest;
pub mod io;
pub mod metrics;
pub mod notification;
pub mod source;

pub use constants::*;
pub use delta::{Delta, DeltaValue};
pub use error::{Error, Result};
pub use instance::{InstanceInfo, InstanceInfoBuilder, InstanceStatus, ServicePort};
pub use interest::Interest;
pub use io::{SimClock, TimeProvider, WallClock};
pub use notification::{ChangeKind, ChangeNotification, SourcedChangeNotification};
pub use source::{Origin, Source, SourceMatcher};
