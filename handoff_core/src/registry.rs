//! Named capsules for bulk export
//!
//! Mutation of distinct names proceeds concurrently (the map is sharded);
//! `register` and `take` on the same name are serialized by its shard lock.

use crate::capsule::{Capsule, CapsuleInfo};
use crate::error::{HandoffError, HandoffResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct CapsuleRegistry {
    entries: DashMap<String, Capsule>,
}

impl CapsuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `capsule` under `name`
    ///
    /// On [`HandoffError::DuplicateName`] the registry is unchanged and the
    /// rejected capsule is dropped, which frees it if it was unconsumed.
    pub fn register(&self, name: impl Into<String>, capsule: Capsule) -> HandoffResult<()> {
        let name = name.into();
        match self.entries.entry(name) {
            Entry::Occupied(entry) => {
                log::debug!("rejecting duplicate capsule name {:?}", entry.key());
                Err(HandoffError::DuplicateName(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                log::trace!("registered capsule {:?}", entry.key());
                entry.insert(capsule);
                Ok(())
            }
        }
    }

    /// Remove and return the capsule under `name`
    pub fn take(&self, name: &str) -> HandoffResult<Capsule> {
        self.entries
            .remove(name)
            .map(|(_, capsule)| capsule)
            .ok_or_else(|| HandoffError::NotFound(name.to_string()))
    }

    /// Sorted snapshot of the current names
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Metadata of the capsule under `name`, without taking it
    pub fn inspect(&self, name: &str) -> Option<CapsuleInfo> {
        self.entries.get(name).map(|e| e.value().inspect().clone())
    }

    /// Remove every entry, sorted by name
    pub fn drain(&self) -> Vec<(String, Capsule)> {
        let mut drained = Vec::with_capacity(self.entries.len());
        for name in self.list_names() {
            // entries removed concurrently since the snapshot are skipped
            if let Some(entry) = self.entries.remove(&name) {
                drained.push(entry);
            }
        }
        drained
    }
}

impl<S: Into<String>> FromIterator<(S, Capsule)> for CapsuleRegistry {
    /// Later duplicates are dropped (and freed)
    fn from_iter<I: IntoIterator<Item = (S, Capsule)>>(iter: I) -> Self {
        let registry = Self::new();
        for (name, capsule) in iter {
            if let Err(e) = registry.register(name, capsule) {
                log::warn!("{}", e);
            }
        }
        registry
    }
}
