//! Universal name registry
//!
//! The single authority for name ownership. Client names and group names
//! live in one namespace: a name held by either kind of entity is
//! unavailable to both until released. The registry stores only the kind;
//! the records themselves are owned by the session manager (clients) and
//! the group directory (groups).
//!
//! The event loop is the sole caller, so a reserve is logically atomic
//! without any locking.

use std::collections::HashMap;

use thiserror::Error;

use parley_shared::protocol::validate_name;

/// What kind of entity holds a registered name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Client,
    Group,
}

/// Reservation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The name violates the shared charset/length rule.
    #[error("invalid name")]
    InvalidName,

    /// Some entity, of either kind, already holds the name.
    #[error("name already in use")]
    InUse,
}

/// Mapping from name to the kind of entity that owns it
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: HashMap<String, EntityKind>,
}

impl NameRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert. Validates the charset rule first, then
    /// fails with [`RegistryError::InUse`] if any entity holds the name.
    pub fn reserve(&mut self, name: &str, kind: EntityKind) -> Result<(), RegistryError> {
        if !validate_name(name) {
            return Err(RegistryError::InvalidName);
        }
        if self.names.contains_key(name) {
            return Err(RegistryError::InUse);
        }
        self.names.insert(name.to_owned(), kind);
        Ok(())
    }

    /// Removes the entry. A no-op when the name is absent, so eager purge
    /// paths can release unconditionally.
    pub fn release(&mut self, name: &str) {
        self.names.remove(name);
    }

    /// Reports which kind of entity holds the name, if any. The owning
    /// record itself lives in the session manager or the group directory.
    pub fn lookup(&self, name: &str) -> Option<EntityKind> {
        self.names.get(name).copied()
    }

    /// Forgets every name at once, for server shutdown.
    pub fn clear(&mut self) {
        self.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_lookup() {
        let mut registry = NameRegistry::new();
        registry.reserve("alice", EntityKind::Client).unwrap();

        assert_eq!(registry.lookup("alice"), Some(EntityKind::Client));
        assert_eq!(registry.lookup("bob"), None);
    }

    #[test]
    fn a_name_is_unique_across_both_kinds() {
        let mut registry = NameRegistry::new();
        registry.reserve("team", EntityKind::Group).unwrap();

        assert_eq!(
            registry.reserve("team", EntityKind::Client),
            Err(RegistryError::InUse)
        );
        assert_eq!(
            registry.reserve("team", EntityKind::Group),
            Err(RegistryError::InUse)
        );
    }

    #[test]
    fn release_frees_the_name_for_either_kind() {
        let mut registry = NameRegistry::new();
        registry.reserve("echo", EntityKind::Client).unwrap();
        registry.release("echo");

        assert_eq!(registry.lookup("echo"), None);
        registry.reserve("echo", EntityKind::Group).unwrap();
    }

    #[test]
    fn release_of_an_absent_name_is_a_no_op() {
        let mut registry = NameRegistry::new();
        registry.release("ghost");
        assert_eq!(registry.lookup("ghost"), None);
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut registry = NameRegistry::new();
        registry.reserve("Alice", EntityKind::Client).unwrap();
        registry.reserve("alice", EntityKind::Client).unwrap();

        assert_eq!(registry.lookup("Alice"), Some(EntityKind::Client));
        assert_eq!(registry.lookup("alice"), Some(EntityKind::Client));
    }

    #[test]
    fn charset_rule_is_enforced_at_reservation() {
        let mut registry = NameRegistry::new();

        assert_eq!(
            registry.reserve("", EntityKind::Client),
            Err(RegistryError::InvalidName)
        );
        assert_eq!(
            registry.reserve(&"x".repeat(31), EntityKind::Client),
            Err(RegistryError::InvalidName)
        );
        assert_eq!(
            registry.reserve("not alnum", EntityKind::Client),
            Err(RegistryError::InvalidName)
        );
        registry.reserve(&"x".repeat(30), EntityKind::Client).unwrap();
    }
}
