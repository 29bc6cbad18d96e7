use glam::Vec2;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use worldcache_common::{ChunkKey, EntityId};

use crate::partition::{EntityFilter, PartitionedTree};
use crate::tree::QuadTreeConfig;
use crate::{SpatialError, SpatialItem};

/// Shared handle to a [`PartitionedTree`] behind one coarse mutex.
///
/// Every operation takes the lock for its whole duration. Reads return owned
/// copies, so no guard outlives a call.
#[derive(Debug)]
pub struct LockedTree<T> {
    inner: Arc<Mutex<PartitionedTree<T>>>,
}

impl<T> Clone for LockedTree<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SpatialItem> LockedTree<T> {
    pub fn new(chunk_size: f32, config: QuadTreeConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PartitionedTree::new(chunk_size, config))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PartitionedTree<T>> {
        // A panic while holding the lock leaves the tree structurally valid.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run several operations under a single lock acquisition.
    pub fn with<R>(&self, f: impl FnOnce(&mut PartitionedTree<T>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.lock().contains(id)
    }

    pub fn insert(&self, item: T) -> Result<ChunkKey, SpatialError> {
        self.lock().insert(item)
    }

    pub fn insert_in(&self, key: ChunkKey, item: T) -> Result<(), SpatialError> {
        self.lock().insert_in(key, item)
    }

    pub fn remove(&self, id: EntityId) -> Option<T> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: EntityId) -> Option<T> {
        self.lock().get(id).cloned()
    }

    pub fn update<F: FnOnce(&mut T)>(&self, id: EntityId, f: F) -> Result<bool, SpatialError> {
        self.lock().update(id, f)
    }

    pub fn query_area(
        &self,
        keys: &[ChunkKey],
        center: Vec2,
        radius: f32,
        filter: EntityFilter,
    ) -> Vec<T> {
        self.lock().query_area(keys, center, radius, filter)
    }

    pub fn query_chunk(&self, key: ChunkKey, filter: EntityFilter) -> Vec<T> {
        self.lock().query_chunk(key, filter)
    }

    /// Items from several chunks under one lock acquisition.
    pub fn query_chunks(&self, keys: &[ChunkKey], filter: EntityFilter) -> Vec<T> {
        let tree = self.lock();
        keys.iter()
            .flat_map(|k| tree.query_chunk(*k, filter))
            .collect()
    }

    pub fn remove_chunk(&self, key: ChunkKey) -> Vec<T> {
        self.lock().remove_chunk(key)
    }

    pub fn remove_not_in(&self, keep: &HashSet<ChunkKey>) -> Vec<T> {
        self.lock().remove_not_in(keep)
    }

    pub fn get_all(&self, filter: EntityFilter) -> Vec<T> {
        self.lock().get_all(filter)
    }

    pub fn membership_count(&self, id: EntityId) -> usize {
        self.lock().membership_count(id)
    }
}
