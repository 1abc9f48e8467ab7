//! # Resource Arena
//!
//! Per-device table of live resources, keyed by [`ResourceId`].
//!
//! Command lists never hold resources. They hold ids and look up the entry
//! when they need the resting state or the placement rules, so a record can
//! outlive its resource without dangling: the lookup simply fails.

use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use spin::RwLock;

use crate::error::{Error, Result};
use crate::state::ResourceState;
use crate::types::{HeapType, ResourceDimension, ResourceFlags, ResourceId};

// =============================================================================
// ENTRY
// =============================================================================

/// Arena view of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaEntry {
    /// Advisory state between lists
    pub resting: ResourceState,
    /// Target of a split barrier begun but not ended
    pub pending_split: Option<ResourceState>,
    /// Placement class
    pub heap: HeapType,
    /// Usage flags
    pub flags: ResourceFlags,
    /// Shape
    pub dimension: ResourceDimension,
    /// Size in bytes
    pub size: u64,
}

impl ArenaEntry {
    /// Check if the resource can be used by several queues at once
    pub fn is_simultaneous(&self) -> bool {
        self.dimension.is_buffer() || self.flags.contains(ResourceFlags::ALLOW_SIMULTANEOUS_ACCESS)
    }
}

// =============================================================================
// ARENA
// =============================================================================

/// Arena of live resources
#[derive(Debug)]
pub struct ResourceArena {
    next_id: AtomicU64,
    entries: RwLock<HashMap<ResourceId, ArenaEntry>>,
}

impl ResourceArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Reserve a fresh id
    pub fn reserve(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a resource under a reserved id
    pub fn insert(&self, id: ResourceId, entry: ArenaEntry) {
        self.entries.write().insert(id, entry);
    }

    /// Forget a resource
    pub fn remove(&self, id: ResourceId) -> Option<ArenaEntry> {
        self.entries.write().remove(&id)
    }

    /// Look up a resource
    pub fn get(&self, id: ResourceId) -> Result<ArenaEntry> {
        self.entries
            .read()
            .get(&id)
            .copied()
            .ok_or(Error::UnknownResource(id))
    }

    /// Check if a resource is alive
    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Resting state of a resource
    pub fn resting(&self, id: ResourceId) -> Result<ResourceState> {
        self.get(id).map(|entry| entry.resting)
    }

    /// Update the resting state after a list executed
    ///
    /// Returns `false` if the resource is gone.
    pub fn settle(
        &self,
        id: ResourceId,
        resting: ResourceState,
        pending_split: Option<ResourceState>,
    ) -> bool {
        match self.entries.write().get_mut(&id) {
            Some(entry) => {
                entry.resting = resting;
                entry.pending_split = pending_split;
                true
            }
            None => false,
        }
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if no resource is alive
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ResourceArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(resting: ResourceState) -> ArenaEntry {
        ArenaEntry {
            resting,
            pending_split: None,
            heap: HeapType::Default,
            flags: ResourceFlags::empty(),
            dimension: ResourceDimension::Buffer,
            size: 256,
        }
    }

    #[test]
    fn test_insert_settle_remove() {
        let arena = ResourceArena::new();
        let id = arena.reserve();
        arena.insert(id, entry(ResourceState::COMMON));
        assert_eq!(arena.resting(id).unwrap(), ResourceState::COMMON);

        assert!(arena.settle(id, ResourceState::COPY_SOURCE, None));
        assert_eq!(arena.resting(id).unwrap(), ResourceState::COPY_SOURCE);

        arena.remove(id);
        assert!(!arena.settle(id, ResourceState::COMMON, None));
        assert_eq!(arena.get(id).unwrap_err(), Error::UnknownResource(id));
    }

    #[test]
    fn test_ids_are_unique() {
        let arena = ResourceArena::new();
        let a = arena.reserve();
        let b = arena.reserve();
        assert_ne!(a, b);
    }
}
