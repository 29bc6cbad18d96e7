//! World Kernel: the authoritative cache of chunks, triggers and entities.
//!
//! # Invariants
//! - Staged data reaches the live index only inside
//!   [`WorldCache::process_loaded_data`], except first insertion of newly
//!   generated or added entities, which is immediate.
//! - At most one outstanding provider request exists per chunk key and
//!   category.
//! - An entity absent from the index when its data is drained is reported as
//!   loaded; one already indexed is merged by value and reported as updated.
//! - Within one drain, chunks precede triggers precede entities, and entity
//!   deletions precede creations and updates.
//! - A drain reports everything it applied. An entity that cannot be indexed
//!   is logged and skipped without holding back the rest.
//! - An entity added and deleted before a drain is never reported.

mod cache;
mod chunk;
mod config;
mod entity;
mod error;
mod events;
mod provider;
mod registry;

pub use cache::{AreaId, WorldCache};
pub use chunk::{Chunk, ChunkMesh, Light, Trigger, TriggerKind};
pub use config::CacheConfig;
pub use entity::{builtin, Behaviour, BehaviourId, Entity, EntityRecord, EntityTypeId};
pub use error::{CacheError, RegistryError};
pub use events::CacheEvent;
pub use provider::{NullSaver, ProviderRequest, RequestQueue, WorldProvider, WorldSaver};
pub use registry::{EntityType, EntityTypeRegistry, SpawnContext, SpawnTest};

pub fn crate_info() -> &'static str {
    "worldcache-kernel v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }
}
