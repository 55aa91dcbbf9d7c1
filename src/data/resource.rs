//! See [`Resource`].

use serde::{Deserialize, Serialize};

use crate::data::id_type;
use crate::data::interval::TimeInterval;
use crate::data::rule::DnsRule;

id_type! {
    impl Id for ResourceId as "resource"
}

/// A schedulable resource: a worker, a machine, a room — anything that can be
/// assigned to at most one task at a time.
///
/// A resource may belong to zero or more named [`groups`](Resource::groups),
/// which is how the resource-spec DSL's [`Group`](crate::data::spec::Spec::Group)
/// variant resolves to a concrete set of candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Stable identifier, echoed back verbatim in [`ScheduledTask`](crate::algo::ScheduledTask).
    pub id: ResourceId,

    /// Named groups this resource belongs to, e.g. `"electricians"`.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Literal do-not-schedule periods specific to this resource.
    #[serde(default)]
    pub dns_periods: Vec<TimeInterval>,

    /// Recurring do-not-schedule periods (e.g. "every weekend"), materialized
    /// into concrete intervals at schedule time.
    #[serde(default)]
    pub dns_rules: Vec<DnsRule>,
}

impl Resource {
    /// Returns whether this resource belongs to the named group.
    pub fn is_in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}
