//! Group directory and membership bookkeeping
//!
//! For each live group this module tracks the member roster in insertion
//! order: the creator first, then the requested members in the order they
//! were typed, duplicates skipped. Fan-out delivery iterates this order and
//! always skips the sender.
//!
//! Members are held by name only; the session manager owns the client
//! records. The directory is kept in lock-step with client lifetime through
//! [`GroupDirectory::purge_client`]: a departing client is removed from
//! every roster before its record is destroyed, and any group that drops
//! below two members is dissolved on the spot.

use std::collections::HashMap;

/// One live group: its name and its insertion-ordered roster
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    members: Vec<String>,
}

impl Group {
    /// Creates a group from an already-built roster (see [`member_roster`]).
    pub fn new(name: String, members: Vec<String>) -> Self {
        Self { name, members }
    }

    /// The roster in insertion order; fan-out iterates this.
    pub fn members(&self) -> &[String] {
        &self.members
    }
}

/// Smallest roster a group may have, at creation and throughout its life.
pub const MIN_GROUP_MEMBERS: usize = 2;

/// All live groups, by name
#[derive(Debug, Default)]
pub struct GroupDirectory {
    groups: HashMap<String, Group>,
}

/// Builds the roster for a new group: creator first, then the requested
/// members in typed order, with duplicates (including a self-listed
/// creator) dropped.
pub fn member_roster(creator: &str, requested: &[String]) -> Vec<String> {
    let mut roster = vec![creator.to_owned()];
    for name in requested {
        if !roster.iter().any(|existing| existing == name) {
            roster.push(name.clone());
        }
    }
    roster
}

impl GroupDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully validated group. The caller has already reserved the
    /// name and checked that every member is an online client and that the
    /// roster holds at least [`MIN_GROUP_MEMBERS`] distinct names.
    pub fn insert(&mut self, group: Group) {
        debug_assert!(group.members.len() >= MIN_GROUP_MEMBERS);
        self.groups.insert(group.name.clone(), group);
    }

    /// The group's roster in insertion order, or `None` for an unknown
    /// group name.
    pub fn members(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(|group| group.members())
    }

    /// True when `client` is on the roster of group `name`. Unknown
    /// groups have no members.
    pub fn is_member(&self, name: &str, client: &str) -> bool {
        self.groups
            .get(name)
            .map(|group| group.members.iter().any(|member| member == client))
            .unwrap_or(false)
    }

    /// Drops the group. Returns false when the name was not a group.
    /// Releasing the name from the registry is the caller's job.
    pub fn remove(&mut self, name: &str) -> bool {
        self.groups.remove(name).is_some()
    }

    /// Removes the client from every roster it appears in. Groups left with
    /// fewer than [`MIN_GROUP_MEMBERS`] members are dissolved; their names
    /// are returned so the caller can release them from the registry.
    pub fn purge_client(&mut self, client: &str) -> Vec<String> {
        for group in self.groups.values_mut() {
            group.members.retain(|member| member != client);
        }

        let dissolved: Vec<String> = self
            .groups
            .values()
            .filter(|group| group.members.len() < MIN_GROUP_MEMBERS)
            .map(|group| group.name.clone())
            .collect();
        for name in &dissolved {
            self.groups.remove(name);
        }
        dissolved
    }

    /// Drops every group at once, for server shutdown.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
