use std::sync::Arc;
use worldcache_common::{ChunkKey, EntityId};

use crate::chunk::{Chunk, Trigger};
use crate::entity::Entity;

/// Change notification produced by one drain pass of the world cache.
///
/// Entity payloads are snapshots taken during the drain, with dirty bits as
/// they were before the cache cleared them.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    ChunksLoaded(Vec<Arc<Chunk>>),
    ChunksUpdated(Vec<Arc<Chunk>>),
    /// Trigger data arrived for `chunks`; a chunk may have no triggers.
    TriggersLoaded {
        chunks: Vec<ChunkKey>,
        triggers: Vec<Arc<Trigger>>,
    },
    TriggersUpdated(Vec<Arc<Trigger>>),
    EntitiesDeleted(Vec<EntityId>),
    /// First sight of these entities, whether loaded, generated or added.
    EntitiesLoaded(Vec<Entity>),
    EntitiesUpdated(Vec<Entity>),
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChunksLoaded(_) => "chunks_loaded",
            Self::ChunksUpdated(_) => "chunks_updated",
            Self::TriggersLoaded { .. } => "triggers_loaded",
            Self::TriggersUpdated(_) => "triggers_updated",
            Self::EntitiesDeleted(_) => "entities_deleted",
            Self::EntitiesLoaded(_) => "entities_loaded",
            Self::EntitiesUpdated(_) => "entities_updated",
        }
    }

    /// Number of items carried.
    pub fn len(&self) -> usize {
        match self {
            Self::ChunksLoaded(v) | Self::ChunksUpdated(v) => v.len(),
            Self::TriggersLoaded { triggers, .. } => triggers.len(),
            Self::TriggersUpdated(v) => v.len(),
            Self::EntitiesDeleted(v) => v.len(),
            Self::EntitiesLoaded(v) | Self::EntitiesUpdated(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
