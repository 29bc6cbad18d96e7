use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use worldcache_common::{ChunkKey, EntityId};

use crate::region::{admits, QuadTreeRegion};
use crate::{SpatialError, SpatialItem};

/// Split thresholds for quad-tree regions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadTreeConfig {
    /// Items a leaf may hold before it splits.
    pub max_items: usize,
    /// Depth at which leaves stop splitting.
    pub max_depth: u32,
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self {
            max_items: 5,
            max_depth: 6,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    chunk: ChunkKey,
    position: Vec2,
}

/// Chunk-keyed quad-tree: one [`QuadTreeRegion`] per chunk with content.
///
/// Remembers where each id was filed so removal and update descend straight
/// to the right leaf.
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    config: QuadTreeConfig,
    chunk_size: f32,
    regions: HashMap<ChunkKey, QuadTreeRegion<T>>,
    placements: HashMap<EntityId, Placement>,
}

impl<T: SpatialItem> QuadTree<T> {
    /// `chunk_size` must be positive and finite; callers validate it up front.
    pub fn new(chunk_size: f32, config: QuadTreeConfig) -> Self {
        debug_assert!(chunk_size.is_finite() && chunk_size > 0.0, "chunk_size must be positive");
        Self {
            config,
            chunk_size,
            regions: HashMap::new(),
            placements: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    pub fn config(&self) -> &QuadTreeConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.placements.contains_key(&id)
    }

    /// Chunk an id is currently filed under.
    pub fn chunk_of(&self, id: EntityId) -> Option<ChunkKey> {
        self.placements.get(&id).map(|p| p.chunk)
    }

    pub fn region(&self, key: ChunkKey) -> Option<&QuadTreeRegion<T>> {
        self.regions.get(&key)
    }

    pub fn chunk_keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.regions.keys().copied()
    }

    /// Insert under the chunk derived from the item's position.
    pub fn insert(&mut self, item: T) -> Result<ChunkKey, SpatialError> {
        let key = ChunkKey::from_position(item.position(), self.chunk_size);
        self.insert_in(key, item)?;
        Ok(key)
    }

    /// Insert under an explicit chunk. The item's position must lie inside it.
    pub fn insert_in(&mut self, key: ChunkKey, item: T) -> Result<(), SpatialError> {
        let id = item.id();
        if self.placements.contains_key(&id) {
            return Err(SpatialError::DuplicateId(id));
        }
        let position = item.position();
        let chunk_size = self.chunk_size;
        self.regions
            .entry(key)
            .or_insert_with(|| QuadTreeRegion::new(key.bounds(chunk_size)))
            .insert(item, &self.config)?;
        self.placements.insert(id, Placement { chunk: key, position });
        Ok(())
    }

    /// Remove an item. Unknown ids yield `None`.
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let placement = self.placements.remove(&id)?;
        let region = self.regions.get_mut(&placement.chunk)?;
        let item = region.remove(id, placement.position);
        if item.is_none() {
            tracing::warn!(%id, "placement without a matching leaf item");
        }
        item
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        let placement = self.placements.get(&id)?;
        self.regions.get(&placement.chunk)?.get(id, placement.position)
    }

    /// Whether an item at `p` can be filed anywhere in this tree.
    pub fn admits(&self, p: Vec2) -> bool {
        let key = ChunkKey::from_position(p, self.chunk_size);
        admits(key.bounds(self.chunk_size), p)
    }

    /// Mutate an item in place, then re-file it if it left its leaf.
    ///
    /// The leaf is kept when the new position still descends into it; only
    /// then does the item move via remove + insert. A position no chunk can
    /// hold fails with `OutOfBounds` and leaves the item where it was filed.
    /// Returns `Ok(false)` for unknown ids.
    pub fn update<F: FnOnce(&mut T)>(&mut self, id: EntityId, f: F) -> Result<bool, SpatialError> {
        let Some(placement) = self.placements.get(&id).copied() else {
            return Ok(false);
        };
        let region = self
            .regions
            .get_mut(&placement.chunk)
            .ok_or(SpatialError::Inconsistent(id))?;
        let (new_position, leaf) = {
            let (item, leaf) = region
                .get_mut(id, placement.position)
                .ok_or(SpatialError::Inconsistent(id))?;
            f(item);
            (item.position(), leaf)
        };

        let target = ChunkKey::from_position(new_position, self.chunk_size);
        if !admits(target.bounds(self.chunk_size), new_position) {
            return Err(SpatialError::OutOfBounds {
                id,
                x: new_position.x,
                y: new_position.y,
            });
        }
        let same_chunk = target == placement.chunk;
        if same_chunk && region.leaf_bounds(new_position) == leaf {
            if let Some(p) = self.placements.get_mut(&id) {
                p.position = new_position;
            }
            return Ok(true);
        }

        let item = region
            .remove(id, placement.position)
            .ok_or(SpatialError::Inconsistent(id))?;
        self.placements.remove(&id);
        self.insert_in(target, item)?;
        Ok(true)
    }

    /// Items in `keys` within `radius` of `center`.
    pub fn query_area(&self, keys: &[ChunkKey], center: Vec2, radius: f32) -> Vec<T> {
        let mut out = Vec::new();
        for key in keys {
            if let Some(region) = self.regions.get(key) {
                region.query_circle(center, radius, &mut out);
            }
        }
        out
    }

    /// All items filed under `key`.
    pub fn query_chunk(&self, key: ChunkKey) -> Vec<T> {
        self.regions
            .get(&key)
            .map(|r| r.get_all_items().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a chunk's region, returning its items.
    pub fn remove_chunk(&mut self, key: ChunkKey) -> Vec<T> {
        let Some(region) = self.regions.remove(&key) else {
            return Vec::new();
        };
        let items = region.into_items();
        for item in &items {
            self.placements.remove(&item.id());
        }
        items
    }

    /// Drop every chunk not in `keep`, returning the removed items.
    pub fn remove_not_in(&mut self, keep: &HashSet<ChunkKey>) -> Vec<T> {
        let doomed: Vec<ChunkKey> = self
            .regions
            .keys()
            .filter(|k| !keep.contains(k))
            .copied()
            .collect();
        doomed
            .into_iter()
            .flat_map(|k| self.remove_chunk(k))
            .collect()
    }

    pub fn get_all(&self) -> Vec<T> {
        self.regions
            .values()
            .flat_map(|r| r.get_all_items())
            .cloned()
            .collect()
    }

    /// Number of leaves holding `id` across all regions.
    pub fn membership_count(&self, id: EntityId) -> usize {
        self.regions.values().map(|r| r.membership_count(id)).sum()
    }
}
