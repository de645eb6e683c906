//! Scope compilation and matching.
//!
//! Permissions and scopes are `entity.action` strings split at the last dot.
//! `entity.*` grants every action on the entity, `*` alone grants everything.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Superuser scope.
pub const SUPERUSER_SCOPE: &str = "*";

const WILDCARD_ACTION: &str = "*";

/// Permissions required by a subscription.
///
/// Either one AND-set (`["car.get", "car.list"]`) or an OR of AND-sets
/// (`[["car.get"], ["admin.*"]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredPermissions {
    Any(Vec<Vec<String>>),
    All(Vec<String>),
}

impl RequiredPermissions {
    /// Normalized OR-of-AND-sets form; empty when nothing is required.
    pub fn sets(&self) -> Vec<Vec<String>> {
        match self {
            RequiredPermissions::Any(sets) => sets.clone(),
            RequiredPermissions::All(set) if set.is_empty() => Vec::new(),
            RequiredPermissions::All(set) => vec![set.clone()],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RequiredPermissions::Any(sets) => sets.is_empty(),
            RequiredPermissions::All(set) => set.is_empty(),
        }
    }

    /// `car.get,car.list or admin.*`
    pub fn describe(&self) -> String {
        self.sets()
            .iter()
            .map(|set| set.join(","))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

impl From<Vec<String>> for RequiredPermissions {
    fn from(set: Vec<String>) -> Self {
        RequiredPermissions::All(set)
    }
}

impl From<Vec<&str>> for RequiredPermissions {
    fn from(set: Vec<&str>) -> Self {
        RequiredPermissions::All(set.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RequiredPermissions {
    fn from(set: [&str; N]) -> Self {
        RequiredPermissions::All(set.into_iter().map(String::from).collect())
    }
}

impl From<Vec<Vec<String>>> for RequiredPermissions {
    fn from(sets: Vec<Vec<String>>) -> Self {
        RequiredPermissions::Any(sets)
    }
}

impl From<Vec<Vec<&str>>> for RequiredPermissions {
    fn from(sets: Vec<Vec<&str>>) -> Self {
        RequiredPermissions::Any(
            sets.into_iter()
                .map(|set| set.into_iter().map(String::from).collect())
                .collect(),
        )
    }
}

/// `entity -> {action}` lookup built from a list of permission strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeMap {
    entities: BTreeMap<String, BTreeSet<String>>,
}

impl ScopeMap {
    pub fn compile<S: AsRef<str>>(raw: &[S]) -> Self {
        let mut entities: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for s in raw {
            let (entity, action) = split_scope(s.as_ref());
            entities
                .entry(entity.to_string())
                .or_default()
                .insert(action.to_string());
        }
        Self { entities }
    }

    fn actions(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.entities.get(entity)
    }

    /// Every required `entity.action` is covered by `scopes`.
    pub fn is_satisfied_by(&self, scopes: &ScopeMap) -> bool {
        self.entities.iter().all(|(entity, required)| {
            let Some(granted) = scopes.actions(entity) else {
                return false;
            };
            required.iter().all(|action| {
                granted.contains(action)
                    || granted.contains(WILDCARD_ACTION)
                    || (action == WILDCARD_ACTION && !granted.is_empty())
            })
        })
    }
}

fn split_scope(s: &str) -> (&str, &str) {
    match s.rfind('.') {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => ("", s),
    }
}

/// True when at least one compiled AND-set is satisfied by `scopes`.
///
/// No required sets, or the superuser scope, always pass.
pub fn has_permission(required: &[ScopeMap], scopes: &[String]) -> bool {
    if required.is_empty() || scopes.iter().any(|s| s == SUPERUSER_SCOPE) {
        return true;
    }
    let granted = ScopeMap::compile(scopes);
    required.iter().any(|set| set.is_satisfied_by(&granted))
}
