use std::sync::{Arc, Mutex, PoisonError};
use worldcache_common::{ChunkKey, EntityId};

use crate::chunk::{Chunk, Trigger};
use crate::entity::Entity;

/// Source of world data: a loader, a generator or both.
///
/// Requests are fire-and-forget. Results come back through the cache's
/// provider callbacks (`chunks_loaded`, `entities_generated`, ...), possibly
/// from another thread and possibly much later.
pub trait WorldProvider: Send + Sync {
    fn load_chunks(&self, keys: &[ChunkKey]);
    fn load_entities(&self, area: &[ChunkKey]);
    fn load_triggers(&self, area: &[ChunkKey]);
}

/// Sink for changed world data. Fire-and-forget from the cache's side.
pub trait WorldSaver: Send + Sync {
    fn save_chunks(&self, chunks: &[Arc<Chunk>]);
    fn save_entities(&self, entities: &[Entity]);
    fn save_triggers(&self, triggers: &[Arc<Trigger>]);
    fn delete_entity(&self, id: EntityId);
}

/// Saver that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSaver;

impl WorldSaver for NullSaver {
    fn save_chunks(&self, _chunks: &[Arc<Chunk>]) {}
    fn save_entities(&self, _entities: &[Entity]) {}
    fn save_triggers(&self, _triggers: &[Arc<Trigger>]) {}
    fn delete_entity(&self, _id: EntityId) {}
}

/// One request received by a [`RequestQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequest {
    Chunks(Vec<ChunkKey>),
    Entities(Vec<ChunkKey>),
    Triggers(Vec<ChunkKey>),
}

/// Provider that only records requests, to be answered by whoever drains it.
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: Mutex<Vec<ProviderRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, request: ProviderRequest) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }

    /// Take every request received so far, oldest first.
    pub fn drain(&self) -> Vec<ProviderRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WorldProvider for RequestQueue {
    fn load_chunks(&self, keys: &[ChunkKey]) {
        self.push(ProviderRequest::Chunks(keys.to_vec()));
    }

    fn load_entities(&self, area: &[ChunkKey]) {
        self.push(ProviderRequest::Entities(area.to_vec()));
    }

    fn load_triggers(&self, area: &[ChunkKey]) {
        self.push(ProviderRequest::Triggers(area.to_vec()));
    }
}
