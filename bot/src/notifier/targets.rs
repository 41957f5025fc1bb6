use std::collections::{BTreeSet, HashSet};

use crate::directory::{GroupId, ServerGroup};

/// Server groups whose members should be notified. Resolved once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetGroups(BTreeSet<GroupId>);

impl TargetGroups {
    /// Every group whose name equals `label` exactly (case-sensitive).
    pub fn resolve(groups: &[ServerGroup], label: &str) -> Self {
        TargetGroups(
            groups
                .iter()
                .filter(|g| g.name == label)
                .map(|g| g.id)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.0.iter().copied()
    }

    /// True if the client belongs to at least one target group.
    pub fn matches(&self, client_groups: &BTreeSet<GroupId>) -> bool {
        !self.0.is_disjoint(client_groups)
    }
}

impl FromIterator<GroupId> for TargetGroups {
    fn from_iter<I: IntoIterator<Item = GroupId>>(iter: I) -> Self {
        TargetGroups(iter.into_iter().collect())
    }
}

/// Display names that are never notified.
#[derive(Debug, Clone, Default)]
pub struct Blacklist(HashSet<String>);

impl Blacklist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Blacklist(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, nickname: &str) -> bool {
        self.0.contains(nickname)
    }
}
