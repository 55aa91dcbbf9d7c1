//! The resource-spec DSL: `*`, `a|b|c`, `group_name`, `!exclude`.
//!
//! Parsed once into an AST ([`Spec`]); the resolver in `crate::algo::resolver`
//! walks it to produce an ordered, de-duplicated candidate list. No runtime
//! reflection: a bare identifier is classified as [`Spec::Group`] or
//! [`Spec::Named`] at parse time against the set of declared group names.

use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::data::resource::ResourceId;

/// A parsed resource-spec expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spec {
    /// `*` — every resource, in declaration order.
    All,
    /// A single resource by id.
    Named(ResourceId),
    /// A named group, expanded to its members in declaration order.
    Group(String),
    /// `a|b|c` — candidates in listed order, first match wins ties.
    Alt(Vec<Spec>),
    /// `spec!x,y` — `spec`'s candidates with `x`, `y` filtered out.
    Exclude(Box<Spec>, Vec<ResourceId>),
}

/// Error parsing a resource-spec expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecParseError {
    /// The expression contained no terms at all (e.g. `""` or `"!x"` alone).
    #[error("resource spec `{0}` has no positive candidate terms")]
    Empty(String),
}

/// Error validating a parsed [`Spec`] against a bundle's declared resources
/// and groups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecValidateError {
    /// Referenced a resource id that isn't declared in the bundle.
    #[error("unknown resource `{0}`")]
    UnknownResource(ResourceId),
    /// Referenced a group name that isn't declared in the bundle.
    #[error("unknown group `{0}`")]
    UnknownGroup(String),
}

impl Spec {
    /// Parse a resource-spec expression.
    ///
    /// `known_groups` disambiguates a bare identifier: if it names a
    /// declared group, it parses as [`Spec::Group`]; otherwise [`Spec::Named`].
    pub fn parse(text: &str, known_groups: &FxHashMap<String, Vec<ResourceId>>) -> Result<Self, SpecParseError> {
        let mut positive = Vec::new();
        let mut excluded = Vec::new();

        for raw_term in text.split('|') {
            let term = raw_term.trim();
            if term.is_empty() {
                continue;
            }

            // An exclusion can be its own `|`-separated token (`"!bob"`) or
            // embedded in a term alongside a positive candidate (`"*!bob"`) —
            // split on the first `!` either way before classifying what's
            // left of it.
            let (positive_part, exclude_part) = match term.split_once('!') {
                Some((p, e)) => (p.trim(), Some(e)),
                None => (term, None),
            };

            if let Some(rest) = exclude_part {
                for id in rest.split(',') {
                    let id = id.trim();
                    if !id.is_empty() {
                        excluded.push(ResourceId::from(id));
                    }
                }
            }

            if positive_part.is_empty() {
                continue;
            }
            if positive_part == "*" {
                positive.push(Spec::All);
            } else if known_groups.contains_key(positive_part) {
                positive.push(Spec::Group(positive_part.to_string()));
            } else {
                positive.push(Spec::Named(ResourceId::from(positive_part)));
            }
        }

        if positive.is_empty() {
            return Err(SpecParseError::Empty(text.to_string()));
        }

        let base = if positive.len() == 1 {
            positive.into_iter().next().unwrap()
        } else {
            Spec::Alt(positive)
        };

        Ok(if excluded.is_empty() {
            base
        } else {
            Spec::Exclude(Box::new(base), excluded)
        })
    }

    /// Walk the AST checking every [`Spec::Named`] resource and
    /// [`Spec::Group`] name against what the bundle actually declares.
    /// Run once per task at setup, before the forward pass starts, so that
    /// an unresolvable name is a fatal `schedule()` error rather than a
    /// silent empty expansion mid-run.
    pub fn validate(
        &self,
        known_resources: &FxHashSet<ResourceId>,
        known_groups: &FxHashMap<String, Vec<ResourceId>>,
    ) -> Result<(), SpecValidateError> {
        match self {
            Spec::All => Ok(()),
            Spec::Named(id) => known_resources
                .contains(id)
                .then_some(())
                .ok_or_else(|| SpecValidateError::UnknownResource(id.clone())),
            Spec::Group(name) => known_groups
                .contains_key(name)
                .then_some(())
                .ok_or_else(|| SpecValidateError::UnknownGroup(name.clone())),
            Spec::Alt(specs) => specs
                .iter()
                .try_for_each(|s| s.validate(known_resources, known_groups)),
            Spec::Exclude(inner, excluded) => {
                inner.validate(known_resources, known_groups)?;
                excluded
                    .iter()
                    .find(|id| !known_resources.contains(*id))
                    .map_or(Ok(()), |id| Err(SpecValidateError::UnknownResource(id.clone())))
            }
        }
    }

    /// Expand the AST into an ordered, de-duplicated candidate list.
    ///
    /// `all_resources` gives `*`'s order (config/declaration order);
    /// `groups` maps a group name to its members in declaration order.
    pub fn expand(
        &self,
        all_resources: &[ResourceId],
        groups: &FxHashMap<String, Vec<ResourceId>>,
    ) -> Vec<ResourceId> {
        match self {
            Spec::All => all_resources.to_vec(),
            Spec::Named(id) => vec![id.clone()],
            Spec::Group(name) => groups.get(name).cloned().unwrap_or_default(),
            Spec::Alt(specs) => specs
                .iter()
                .flat_map(|s| s.expand(all_resources, groups))
                .unique()
                .collect(),
            Spec::Exclude(inner, excluded) => inner
                .expand(all_resources, groups)
                .into_iter()
                .filter(|id| !excluded.contains(id))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> FxHashMap<String, Vec<ResourceId>> {
        FxHashMap::from_iter([(
            "electricians".to_string(),
            vec![ResourceId::from("alice"), ResourceId::from("bob")],
        )])
    }

    fn all_resources() -> Vec<ResourceId> {
        vec![
            ResourceId::from("alice"),
            ResourceId::from("bob"),
            ResourceId::from("carol"),
        ]
    }

    #[test]
    fn test_parse_wildcard() {
        let spec = Spec::parse("*", &groups()).unwrap();
        assert_eq!(spec, Spec::All);
        assert_eq!(spec.expand(&all_resources(), &groups()), all_resources());
    }

    #[test]
    fn test_parse_named() {
        let spec = Spec::parse("alice", &groups()).unwrap();
        assert_eq!(spec, Spec::Named(ResourceId::from("alice")));
    }

    #[test]
    fn test_parse_group() {
        let spec = Spec::parse("electricians", &groups()).unwrap();
        assert_eq!(spec, Spec::Group("electricians".to_string()));
        assert_eq!(
            spec.expand(&all_resources(), &groups()),
            vec![ResourceId::from("alice"), ResourceId::from("bob")]
        );
    }

    #[test]
    fn test_parse_alt_preserves_order_and_dedups() {
        let spec = Spec::parse("bob|electricians|alice", &groups()).unwrap();
        assert_eq!(
            spec.expand(&all_resources(), &groups()),
            vec![
                ResourceId::from("bob"),
                ResourceId::from("alice"),
            ]
        );
    }

    #[test]
    fn test_parse_exclude() {
        let spec = Spec::parse("*!bob", &groups()).unwrap();
        assert_eq!(
            spec.expand(&all_resources(), &groups()),
            vec![ResourceId::from("alice"), ResourceId::from("carol")]
        );
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(Spec::parse("!bob", &groups()).is_err());
        assert!(Spec::parse("", &groups()).is_err());
    }

    #[test]
    fn test_validate_catches_unknown_resource() {
        let known: FxHashSet<ResourceId> = all_resources().into_iter().collect();
        let spec = Spec::Named(ResourceId::from("dave"));
        assert_eq!(
            spec.validate(&known, &groups()),
            Err(SpecValidateError::UnknownResource(ResourceId::from("dave")))
        );
    }

    #[test]
    fn test_validate_passes_for_known_group_and_resources() {
        let known: FxHashSet<ResourceId> = all_resources().into_iter().collect();
        let spec = Spec::parse("alice|electricians", &groups()).unwrap();
        assert!(spec.validate(&known, &groups()).is_ok());
    }
}
