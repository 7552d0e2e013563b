//! Named broadcast groups ("rooms").
//!
//! Every group is a set of [`SessionId`]s. A reverse index from session to
//! group names lets a disconnect leave every group without scanning.

use std::collections::{HashMap, HashSet};

use crate::session::SessionId;

/// Name of the group every registered player joins.
pub const DEFAULT_GROUP: &str = "gamers";

/// Group membership table. Not synchronized; the owner serializes access.
#[derive(Debug, Default)]
pub struct GroupMembership {
    members: HashMap<String, HashSet<SessionId>>,
    memberships: HashMap<SessionId, HashSet<String>>,
}

impl GroupMembership {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a group, creating the group on first use.
    ///
    /// Returns `false` if the session was already a member.
    pub fn join(&mut self, group: &str, id: SessionId) -> bool {
        let added = self.members.entry(group.to_string()).or_default().insert(id);
        if added {
            self.memberships
                .entry(id)
                .or_default()
                .insert(group.to_string());
        }
        added
    }

    /// Remove a session from a group. Absent session or group is a no-op.
    pub fn leave(&mut self, group: &str, id: SessionId) -> bool {
        let Some(set) = self.members.get_mut(group) else {
            return false;
        };
        let removed = set.remove(&id);
        if set.is_empty() {
            self.members.remove(group);
        }

        if let Some(groups) = self.memberships.get_mut(&id) {
            groups.remove(group);
            if groups.is_empty() {
                self.memberships.remove(&id);
            }
        }
        removed
    }

    /// Remove a session from every group it belongs to. Returns the groups
    /// it left.
    pub fn leave_all(&mut self, id: SessionId) -> Vec<String> {
        let Some(groups) = self.memberships.remove(&id) else {
            return Vec::new();
        };

        for group in &groups {
            if let Some(set) = self.members.get_mut(group) {
                set.remove(&id);
                if set.is_empty() {
                    self.members.remove(group);
                }
            }
        }
        groups.into_iter().collect()
    }

    /// Snapshot of every member of a group.
    pub fn members(&self, group: &str) -> HashSet<SessionId> {
        self.members.get(group).cloned().unwrap_or_default()
    }

    /// Snapshot of a group's members minus `excluded`.
    pub fn members_excluding(&self, group: &str, excluded: SessionId) -> HashSet<SessionId> {
        self.members
            .get(group)
            .map(|set| set.iter().copied().filter(|id| *id != excluded).collect())
            .unwrap_or_default()
    }

    /// Whether `id` is currently a member of `group`.
    pub fn contains(&self, group: &str, id: SessionId) -> bool {
        self.members
            .get(group)
            .is_some_and(|set| set.contains(&id))
    }

    /// Names of the groups a session belongs to.
    pub fn groups_of(&self, id: SessionId) -> Vec<String> {
        self.memberships
            .get(&id)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.members.len()
    }
}
