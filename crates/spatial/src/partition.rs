use glam::Vec2;
use std::collections::HashSet;
use worldcache_common::{ChunkKey, EntityId};

use crate::tree::{QuadTree, QuadTreeConfig};
use crate::{SpatialError, SpatialItem};

/// Which partition(s) a read should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityFilter {
    #[default]
    All,
    StaticOnly,
    MobileOnly,
}

/// Two independent trees, routed by [`SpatialItem::is_static`].
///
/// Static items are indexed separately so collision aggregation can read
/// them without walking mobile entities.
#[derive(Debug, Clone)]
pub struct PartitionedTree<T> {
    statics: QuadTree<T>,
    mobiles: QuadTree<T>,
}

impl<T: SpatialItem> PartitionedTree<T> {
    pub fn new(chunk_size: f32, config: QuadTreeConfig) -> Self {
        Self {
            statics: QuadTree::new(chunk_size, config),
            mobiles: QuadTree::new(chunk_size, config),
        }
    }

    fn partition_mut(&mut self, is_static: bool) -> &mut QuadTree<T> {
        if is_static {
            &mut self.statics
        } else {
            &mut self.mobiles
        }
    }

    pub fn statics(&self) -> &QuadTree<T> {
        &self.statics
    }

    pub fn mobiles(&self) -> &QuadTree<T> {
        &self.mobiles
    }

    pub fn len(&self) -> usize {
        self.statics.len() + self.mobiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.mobiles.contains(id) || self.statics.contains(id)
    }

    pub fn insert(&mut self, item: T) -> Result<ChunkKey, SpatialError> {
        let id = item.id();
        if self.contains(id) {
            return Err(SpatialError::DuplicateId(id));
        }
        self.partition_mut(item.is_static()).insert(item)
    }

    pub fn insert_in(&mut self, key: ChunkKey, item: T) -> Result<(), SpatialError> {
        let id = item.id();
        if self.contains(id) {
            return Err(SpatialError::DuplicateId(id));
        }
        self.partition_mut(item.is_static()).insert_in(key, item)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        self.mobiles.remove(id).or_else(|| self.statics.remove(id))
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.mobiles.get(id).or_else(|| self.statics.get(id))
    }

    /// Mutate in place and re-file; moves the item across partitions if its
    /// static flag flipped. A failed update leaves the item indexed.
    pub fn update<F: FnOnce(&mut T)>(&mut self, id: EntityId, f: F) -> Result<bool, SpatialError> {
        let was_static = if self.mobiles.contains(id) {
            false
        } else if self.statics.contains(id) {
            true
        } else {
            return Ok(false);
        };
        let tree = self.partition_mut(was_static);
        tree.update(id, f)?;
        let flipped = tree.get(id).is_some_and(|item| item.is_static() != was_static);
        if !flipped {
            return Ok(true);
        }
        // The update above already checked the new position, and both trees
        // share a chunk size, so the other partition admits it too.
        if let Some(item) = self.partition_mut(was_static).remove(id) {
            self.partition_mut(!was_static).insert(item)?;
        }
        Ok(true)
    }

    pub fn query_area(
        &self,
        keys: &[ChunkKey],
        center: Vec2,
        radius: f32,
        filter: EntityFilter,
    ) -> Vec<T> {
        match filter {
            EntityFilter::StaticOnly => self.statics.query_area(keys, center, radius),
            EntityFilter::MobileOnly => self.mobiles.query_area(keys, center, radius),
            EntityFilter::All => {
                let mut out = self.mobiles.query_area(keys, center, radius);
                out.extend(self.statics.query_area(keys, center, radius));
                out
            }
        }
    }

    pub fn query_chunk(&self, key: ChunkKey, filter: EntityFilter) -> Vec<T> {
        match filter {
            EntityFilter::StaticOnly => self.statics.query_chunk(key),
            EntityFilter::MobileOnly => self.mobiles.query_chunk(key),
            EntityFilter::All => {
                let mut out = self.mobiles.query_chunk(key);
                out.extend(self.statics.query_chunk(key));
                out
            }
        }
    }

    pub fn remove_chunk(&mut self, key: ChunkKey) -> Vec<T> {
        let mut out = self.mobiles.remove_chunk(key);
        out.extend(self.statics.remove_chunk(key));
        out
    }

    pub fn remove_not_in(&mut self, keep: &HashSet<ChunkKey>) -> Vec<T> {
        let mut out = self.mobiles.remove_not_in(keep);
        out.extend(self.statics.remove_not_in(keep));
        out
    }

    pub fn get_all(&self, filter: EntityFilter) -> Vec<T> {
        match filter {
            EntityFilter::StaticOnly => self.statics.get_all(),
            EntityFilter::MobileOnly => self.mobiles.get_all(),
            EntityFilter::All => {
                let mut out = self.mobiles.get_all();
                out.extend(self.statics.get_all());
                out
            }
        }
    }

    pub fn membership_count(&self, id: EntityId) -> usize {
        self.mobiles.membership_count(id) + self.statics.membership_count(id)
    }
}
