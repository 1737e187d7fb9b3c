//! Registry query predicates
//!
//! An [`Interest`] selects a subset of registry entries for snapshot and
//! streaming queries. Interests are compared and hashed by value so that
//! index materializations can be interned per distinct interest.

use crate::instance::InstanceInfo;
use serde::{Deserialize, Serialize};

/// Predicate over instance records
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Interest {
    /// Matches nothing
    None,
    /// Matches the full registry
    All,
    /// Matches instances of one application
    Application(String),
    /// Matches instances advertising one VIP address
    Vip(String),
    /// Matches a single instance id
    Instance(String),
    /// Matches the union of the contained interests.
    ///
    /// Always construct through [`Interest::multiple`]: the component list is
    /// kept flattened, sorted and deduplicated so equality is set-like.
    Multiple(Vec<Interest>),
}

impl Interest {
    /// Build a composite interest from the union of the given interests.
    ///
    /// Nested composites are flattened; duplicates are removed; a single
    /// remaining component collapses to itself.
    pub fn multiple(interests: impl IntoIterator<Item = Interest>) -> Self {
        let mut flat = Vec::new();
        for interest in interests {
            match interest {
                Self::Multiple(parts) => flat.extend(parts),
                other => flat.push(other),
            }
        }
        flat.sort();
        flat.dedup();

        match flat.len() {
            0 => Self::None,
            1 => flat.into_iter().next().unwrap_or(Self::None),
            _ => Self::Multiple(flat),
        }
    }

    /// Check whether the given instance matches this interest
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Application(app) => instance.app() == Some(app.as_str()),
            Self::Vip(vip) => instance.vip_address() == Some(vip.as_str()),
            Self::Instance(id) => instance.id() == id,
            Self::Multiple(parts) => parts.iter().any(|part| part.matches(instance)),
        }
    }

    /// Component interests of a composite; a non-composite is its own single
    /// component
    pub fn components(&self) -> &[Interest] {
        match self {
            Self::Multiple(parts) => parts,
            _ => std::slice::from_ref(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceInfoBuilder, InstanceStatus};

    fn instance(id: &str, app: &str, vip: &str) -> InstanceInfo {
        InstanceInfoBuilder::new(id)
            .with_app(app)
            .with_vip_address(vip)
            .with_status(InstanceStatus::Up)
            .with_version(1)
            .build()
            .unwrap()
    }

    #[test]
    fn test_basic_matching() {
        let info = instance("i-1", "shop", "shop.vip");

        assert!(Interest::All.matches(&info));
        assert!(!Interest::None.matches(&info));
        assert!(Interest::Application("shop".into()).matches(&info));
        assert!(!Interest::Application("billing".into()).matches(&info));
        assert!(Interest::Vip("shop.vip".into()).matches(&info));
        assert!(Interest::Instance("i-1".into()).matches(&info));
        assert!(!Interest::Instance("i-2".into()).matches(&info));
    }

    #[test]
    fn test_multiple_matches_union() {
        let interest = Interest::multiple([
            Interest::Application("shop".into()),
            Interest::Application("billing".into()),
        ]);

        assert!(interest.matches(&instance("i-1", "shop", "a.vip")));
        assert!(interest.matches(&instance("i-2", "billing", "b.vip")));
        assert!(!interest.matches(&instance("i-3", "search", "c.vip")));
    }

    #[test]
    fn test_multiple_is_set_like() {
        let a = Interest::multiple([
            Interest::Application("shop".into()),
            Interest::Vip("x.vip".into()),
        ]);
        let b = Interest::multiple([
            Interest::Vip("x.vip".into()),
            Interest::Application("shop".into()),
            Interest::Application("shop".into()),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_multiple_flattens_and_collapses() {
        let nested = Interest::multiple([
            Interest::multiple([Interest::Application("shop".into())]),
            Interest::Application("billing".into()),
        ]);
        assert_eq!(nested.components().len(), 2);

        let single = Interest::multiple([Interest::Application("shop".into())]);
        assert_eq!(single, Interest::Application("shop".into()));

        assert_eq!(Interest::multiple([]), Interest::None);
    }
}
